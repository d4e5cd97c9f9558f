//! Command parsing

use flashkv_common::Value;
use thiserror::Error;

/// A parsed client command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Set { key: String, value: Value },
    Get { key: String },
    Del { key: String },
    Exists { key: String },
    Keys { pattern: String },
    DbSize,
    FlushDb,
    Ping,
    Info,
}

/// A malformed request line. The connection stays open; the error renders
/// as an `ERROR: …` response line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    #[error("wrong number of arguments for '{0}'")]
    WrongArity(&'static str),
}

/// Parse one request line. Returns `Ok(None)` for a blank line, which is
/// ignored without a response.
///
/// The `SET` value is the remainder of the line after the key. It is
/// interpreted as a JSON literal when it parses as one, and kept as raw
/// text otherwise.
pub fn parse(line: &str) -> Result<Option<Command>, ProtocolError> {
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Ok(None);
    };

    let command = match word.to_ascii_uppercase().as_str() {
        "SET" => {
            let key = parts.next().ok_or(ProtocolError::WrongArity("SET"))?;
            let rest: Vec<&str> = parts.collect();
            if rest.is_empty() {
                return Err(ProtocolError::WrongArity("SET"));
            }
            let raw = rest.join(" ");
            let value =
                serde_json::from_str(&raw).unwrap_or_else(|_| Value::String(raw));
            Command::Set {
                key: key.to_string(),
                value,
            }
        }
        "GET" => Command::Get {
            key: single_arg(&mut parts, "GET")?,
        },
        "DEL" => Command::Del {
            key: single_arg(&mut parts, "DEL")?,
        },
        "EXISTS" => Command::Exists {
            key: single_arg(&mut parts, "EXISTS")?,
        },
        "KEYS" => {
            let pattern = parts.next().unwrap_or("*").to_string();
            if parts.next().is_some() {
                return Err(ProtocolError::WrongArity("KEYS"));
            }
            Command::Keys { pattern }
        }
        "DBSIZE" => no_args(&mut parts, "DBSIZE", Command::DbSize)?,
        "FLUSHDB" => no_args(&mut parts, "FLUSHDB", Command::FlushDb)?,
        "PING" => no_args(&mut parts, "PING", Command::Ping)?,
        "INFO" => no_args(&mut parts, "INFO", Command::Info)?,
        other => return Err(ProtocolError::UnknownCommand(other.to_string())),
    };
    Ok(Some(command))
}

fn single_arg<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    name: &'static str,
) -> Result<String, ProtocolError> {
    let arg = parts.next().ok_or(ProtocolError::WrongArity(name))?;
    if parts.next().is_some() {
        return Err(ProtocolError::WrongArity(name));
    }
    Ok(arg.to_string())
}

fn no_args<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    name: &'static str,
    command: Command,
) -> Result<Command, ProtocolError> {
    if parts.next().is_some() {
        return Err(ProtocolError::WrongArity(name));
    }
    Ok(command)
}
