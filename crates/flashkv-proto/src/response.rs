//! Response rendering

use crate::command::ProtocolError;
use flashkv_common::Value;
use std::fmt;

/// One response line, rendered through `Display` (without the trailing
/// newline; the server appends it)
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// `OK`
    Ok,
    /// `NULL` (key not found)
    Null,
    /// `1` or `0`
    Flag(bool),
    /// A stored value: bare text for strings, JSON otherwise
    Value(Value),
    /// A JSON array of keys
    Keys(Vec<String>),
    /// An integer
    Size(usize),
    /// `PONG`
    Pong,
    /// Whitespace-separated `key:value` fields
    Info(Vec<(String, String)>),
    /// `ERROR: …`; the connection stays open
    Error(String),
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Null => write!(f, "NULL"),
            Self::Flag(true) => write!(f, "1"),
            Self::Flag(false) => write!(f, "0"),
            Self::Value(value) => match value {
                Value::String(text) => write!(f, "{text}"),
                other => write!(f, "{other}"),
            },
            Self::Keys(keys) => {
                let encoded = serde_json::to_string(keys).unwrap_or_else(|_| "[]".to_string());
                write!(f, "{encoded}")
            }
            Self::Size(n) => write!(f, "{n}"),
            Self::Pong => write!(f, "PONG"),
            Self::Info(fields) => {
                let mut first = true;
                for (name, value) in fields {
                    if !first {
                        write!(f, " ")?;
                    }
                    write!(f, "{name}:{value}")?;
                    first = false;
                }
                Ok(())
            }
            Self::Error(message) => write!(f, "ERROR: {message}"),
        }
    }
}

impl From<ProtocolError> for Response {
    fn from(err: ProtocolError) -> Self {
        Self::Error(err.to_string())
    }
}
