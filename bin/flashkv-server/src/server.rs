//! Connection handling
//!
//! One task per client connection, each running a read-line/respond loop.
//! The number of concurrently served connections is bounded by a semaphore;
//! further clients queue in the accept backlog.

use flashkv_common::Error;
use flashkv_engine::Engine;
use flashkv_proto::{Command, Response, parse};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Accept connections until the listener errors or the semaphore closes
pub async fn serve(
    listener: TcpListener,
    engine: Arc<Engine>,
    max_connections: usize,
) -> std::io::Result<()> {
    let permits = Arc::new(Semaphore::new(max_connections.max(1)));
    loop {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            return Ok(());
        };
        let (stream, addr) = listener.accept().await?;
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            handle_client(engine, stream, addr).await;
            drop(permit);
        });
    }
}

/// Serve one client until end of stream
async fn handle_client(engine: Arc<Engine>, stream: TcpStream, addr: SocketAddr) {
    info!(%addr, "client connected");
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(%addr, error = %err, "read failed");
                break;
            }
        };
        debug!(%addr, line, "received");

        let response = match parse(&line) {
            Ok(None) => continue,
            Ok(Some(command)) => execute(&engine, command).await,
            Err(err) => Response::from(err),
        };

        let payload = format!("{response}\n");
        if let Err(err) = write.write_all(payload.as_bytes()).await {
            warn!(%addr, error = %err, "write failed");
            break;
        }
    }
    info!(%addr, "client disconnected");
}

/// Run one command against the engine and shape the response line
pub async fn execute(engine: &Engine, command: Command) -> Response {
    match command {
        Command::Set { key, value } => match engine.set(&key, value).await {
            Ok(()) => Response::Ok,
            Err(err) => Response::Error(err.to_string()),
        },
        Command::Get { key } => match engine.get(&key).await {
            Ok(Some(value)) => Response::Value(value),
            Ok(None) => Response::Null,
            Err(err) => Response::Error(err.to_string()),
        },
        Command::Del { key } => match engine.delete(&key).await {
            Ok(removed) => Response::Flag(removed),
            // A disk-side failure is a failed delete, not a protocol error
            Err(Error::Io(_) | Error::TaskJoin(_)) => Response::Flag(false),
            Err(err) => Response::Error(err.to_string()),
        },
        Command::Exists { key } => match engine.exists(&key).await {
            Ok(found) => Response::Flag(found),
            Err(err) => Response::Error(err.to_string()),
        },
        Command::Keys { pattern } => match engine.keys(&pattern).await {
            Ok(keys) => Response::Keys(keys),
            Err(err) => Response::Error(err.to_string()),
        },
        Command::DbSize => match engine.dbsize().await {
            Ok(size) => Response::Size(size),
            Err(err) => Response::Error(err.to_string()),
        },
        Command::FlushDb => match engine.flushdb().await {
            Ok(()) => Response::Ok,
            Err(err) => Response::Error(err.to_string()),
        },
        Command::Ping => Response::Pong,
        Command::Info => {
            let stats = engine.stats();
            let fields = vec![
                ("cache_entries".to_string(), engine.cache_len().to_string()),
                ("dirty_entries".to_string(), engine.dirty_len().to_string()),
                (
                    "cache_hits".to_string(),
                    stats
                        .hits
                        .load(std::sync::atomic::Ordering::Relaxed)
                        .to_string(),
                ),
                (
                    "cache_misses".to_string(),
                    stats
                        .misses
                        .load(std::sync::atomic::Ordering::Relaxed)
                        .to_string(),
                ),
            ];
            Response::Info(fields)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashkv_client::Client;
    use flashkv_common::EngineConfig;
    use serde_json::json;
    use tempfile::tempdir;

    async fn spawn_server(dir: &std::path::Path) -> (std::net::SocketAddr, Arc<Engine>) {
        let engine = Arc::new(
            Engine::new(EngineConfig {
                data_dir: dir.to_path_buf(),
                ..EngineConfig::default()
            })
            .unwrap(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let served = Arc::clone(&engine);
        tokio::spawn(async move {
            let _ = serve(listener, served, 4).await;
        });
        (addr, engine)
    }

    #[tokio::test]
    async fn test_end_to_end_session() {
        let dir = tempdir().unwrap();
        let (addr, _engine) = spawn_server(dir.path()).await;

        let mut client = Client::connect(addr).await.unwrap();
        assert!(client.ping().await.unwrap());

        assert!(client.set("user:1", &json!({"name": "Alice"})).await.unwrap());
        assert!(client.set("user:2", &json!("plain")).await.unwrap());
        assert!(client.set("counter", &json!(42)).await.unwrap());

        assert_eq!(
            client.get("user:1").await.unwrap(),
            Some(json!({"name": "Alice"}))
        );
        assert_eq!(client.get("counter").await.unwrap(), Some(json!(42)));
        assert_eq!(client.get("missing").await.unwrap(), None);

        assert!(client.exists("user:1").await.unwrap());
        let mut users = client.keys("user:*").await.unwrap();
        users.sort();
        assert_eq!(users, vec!["user:1", "user:2"]);
        assert_eq!(client.dbsize().await.unwrap(), 3);

        assert!(client.delete("user:2").await.unwrap());
        assert!(!client.exists("user:2").await.unwrap());

        let info = client.info().await.unwrap();
        assert_eq!(info.get("cache_entries"), Some(&"2".to_string()));

        assert!(client.flushdb().await.unwrap());
        assert_eq!(client.dbsize().await.unwrap(), 0);

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_protocol_errors_keep_connection_open() {
        let dir = tempdir().unwrap();
        let (addr, _engine) = spawn_server(dir.path()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"BLORP\nPING\n").await.unwrap();

        let (read, _write) = stream.split();
        let mut lines = BufReader::new(read).lines();
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            "ERROR: Unknown command 'BLORP'"
        );
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "PONG");
    }

    #[tokio::test]
    async fn test_invalid_key_reports_error_line() {
        let dir = tempdir().unwrap();
        let (addr, _engine) = spawn_server(dir.path()).await;

        let long_key = "k".repeat(257);
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(format!("GET {long_key}\n").as_bytes())
            .await
            .unwrap();

        let (read, _write) = stream.split();
        let mut lines = BufReader::new(read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        assert!(line.starts_with("ERROR:"), "got: {line}");
    }
}
