//! FlashKV Client - async TCP client
//!
//! A Redis-like interface over the FlashKV line protocol. One request and
//! one response line per call; the connection is not shared between tasks.

use flashkv_common::Value;
use std::collections::HashMap;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

/// Client-side errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server closed the connection")]
    ConnectionClosed,

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Async FlashKV client
pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    /// Connect to a FlashKV server
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read, writer) = stream.into_split();
        debug!("connected to FlashKV server");
        Ok(Self {
            reader: BufReader::new(read),
            writer,
        })
    }

    /// Send one command line and read one response line
    async fn send_command(&mut self, command: &str) -> Result<String> {
        self.writer.write_all(command.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;

        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Store a value. Structured values are sent as JSON, strings as raw
    /// text.
    pub async fn set(&mut self, key: &str, value: &Value) -> Result<bool> {
        let response = self
            .send_command(&format!("SET {key} {}", encode_value(value)))
            .await?;
        Ok(response == "OK")
    }

    /// Fetch a value, `None` if the key does not exist
    pub async fn get(&mut self, key: &str) -> Result<Option<Value>> {
        let response = self.send_command(&format!("GET {key}")).await?;
        if response == "NULL" {
            return Ok(None);
        }
        Ok(Some(decode_value(response)))
    }

    /// Delete a key
    pub async fn delete(&mut self, key: &str) -> Result<bool> {
        let response = self.send_command(&format!("DEL {key}")).await?;
        Ok(response == "1")
    }

    /// Whether a key exists
    pub async fn exists(&mut self, key: &str) -> Result<bool> {
        let response = self.send_command(&format!("EXISTS {key}")).await?;
        Ok(response == "1")
    }

    /// Keys matching a glob pattern
    pub async fn keys(&mut self, pattern: &str) -> Result<Vec<String>> {
        let response = self.send_command(&format!("KEYS {pattern}")).await?;
        serde_json::from_str(&response).map_err(|_| ClientError::UnexpectedResponse(response))
    }

    /// Number of live keys
    pub async fn dbsize(&mut self) -> Result<usize> {
        let response = self.send_command("DBSIZE").await?;
        response
            .parse()
            .map_err(|_| ClientError::UnexpectedResponse(response))
    }

    /// Clear the whole database
    pub async fn flushdb(&mut self) -> Result<bool> {
        let response = self.send_command("FLUSHDB").await?;
        Ok(response == "OK")
    }

    /// Liveness check
    pub async fn ping(&mut self) -> Result<bool> {
        let response = self.send_command("PING").await?;
        Ok(response == "PONG")
    }

    /// Server info as a field map (e.g. `cache_entries`)
    pub async fn info(&mut self) -> Result<HashMap<String, String>> {
        let response = self.send_command("INFO").await?;
        let mut fields = HashMap::new();
        for part in response.split_whitespace() {
            if let Some((name, value)) = part.split_once(':') {
                fields.insert(name.to_string(), value.to_string());
            }
        }
        Ok(fields)
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await?;
        debug!("disconnected from FlashKV server");
        Ok(())
    }
}

/// Wire encoding for a SET payload: raw text for strings, JSON otherwise
fn encode_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Wire decoding for a GET response: JSON when it parses, raw text otherwise
fn decode_value(response: String) -> Value {
    serde_json::from_str(&response).unwrap_or(Value::String(response))
}
