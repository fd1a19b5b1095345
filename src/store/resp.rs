//! Reconnecting RESP client for the shared counter store.
//!
//! Speaks the Redis wire protocol (RESP2) over a single TCP connection.
//! The connection slot sits behind a `tokio::sync::Mutex`, which gives two
//! properties the pipeline depends on:
//!
//! - commands are serialized per connection, so replies always pair with
//!   the command that produced them;
//! - when several tasks race the first call, one of them dials while the
//!   rest await the same in-flight attempt instead of opening duplicates.
//!
//! Reconnection backs off exponentially from a base delay up to a cap, and
//! after `max_retries` consecutive failures the client goes terminal: it
//! stops dialing and every caller sees [`StoreError::Terminal`] (liveness
//! probes report dead).

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::{CounterStore, StoreError};
use crate::config::StoreSettings;

enum Slot {
    Idle { attempts: u32 },
    Ready(BufStream<TcpStream>),
    Dead { attempts: u32 },
}

#[derive(Debug)]
enum Reply {
    Simple(String),
    Int(i64),
    Bulk(Option<String>),
}

/// Counter store client over a shared external store.
///
/// Construct one per process and share it behind an `Arc`; the connection
/// is lazy, nothing is dialed until the first command.
pub struct RespCounterStore {
    settings: StoreSettings,
    slot: Mutex<Slot>,
}

impl RespCounterStore {
    /// Create a lazily-connecting client. No I/O happens here.
    pub fn new(settings: StoreSettings) -> Self {
        Self {
            settings,
            slot: Mutex::new(Slot::Idle { attempts: 0 }),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.settings.retry_base_delay;
        let delay = base.saturating_mul(1u32 << attempt.min(16));
        delay.min(self.settings.retry_max_delay)
    }

    async fn dial(&self) -> Result<BufStream<TcpStream>, StoreError> {
        let connect = TcpStream::connect(&self.settings.addr);
        match timeout(self.settings.connect_timeout, connect).await {
            Ok(Ok(stream)) => Ok(BufStream::new(stream)),
            Ok(Err(e)) => Err(StoreError::Unreachable(e.to_string())),
            Err(_) => Err(StoreError::Timeout),
        }
    }

    /// Make sure the slot holds a live connection, dialing with backoff if
    /// needed. Runs under the slot lock, so concurrent callers wait for the
    /// one in-flight attempt.
    async fn ensure_connected(&self, slot: &mut Slot) -> Result<(), StoreError> {
        loop {
            match slot {
                Slot::Ready(_) => return Ok(()),
                Slot::Dead { attempts } => {
                    return Err(StoreError::Terminal {
                        attempts: *attempts,
                    })
                }
                Slot::Idle { attempts } => {
                    if *attempts >= self.settings.max_retries {
                        let attempts = *attempts;
                        *slot = Slot::Dead { attempts };
                        tracing::warn!(
                            attempts,
                            addr = %self.settings.addr,
                            "counter store client going terminal"
                        );
                        continue;
                    }
                    if *attempts > 0 {
                        tokio::time::sleep(self.backoff(*attempts - 1)).await;
                    }
                    match self.dial().await {
                        Ok(stream) => {
                            *slot = Slot::Ready(stream);
                        }
                        Err(e) => {
                            *attempts += 1;
                            tracing::debug!(
                                attempt = *attempts,
                                error = %e,
                                "counter store connect failed"
                            );
                        }
                    }
                }
            }
        }
    }

    async fn command(&self, parts: &[&str]) -> Result<Reply, StoreError> {
        let mut slot = self.slot.lock().await;
        self.ensure_connected(&mut slot).await?;
        let stream = match &mut *slot {
            Slot::Ready(s) => s,
            _ => unreachable!("ensure_connected leaves the slot ready"),
        };
        let result = timeout(self.settings.command_timeout, roundtrip(stream, parts)).await;
        match result {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                // Connection state is unknown after an I/O error; drop it
                // and let the next caller redial with a fresh retry budget.
                *slot = Slot::Idle { attempts: 0 };
                Err(e)
            }
            Err(_) => {
                *slot = Slot::Idle { attempts: 0 };
                Err(StoreError::Timeout)
            }
        }
    }

    async fn command_int(&self, parts: &[&str]) -> Result<i64, StoreError> {
        match self.command(parts).await? {
            Reply::Int(n) => Ok(n),
            other => Err(StoreError::Protocol(format!(
                "expected integer reply, got {other:?}"
            ))),
        }
    }
}

async fn roundtrip(
    stream: &mut BufStream<TcpStream>,
    parts: &[&str],
) -> Result<Reply, StoreError> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(format!("*{}\r\n", parts.len()).as_bytes());
    for part in parts {
        buf.extend_from_slice(format!("${}\r\n", part.len()).as_bytes());
        buf.extend_from_slice(part.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    stream
        .write_all(&buf)
        .await
        .map_err(|e| StoreError::Unreachable(e.to_string()))?;
    stream
        .flush()
        .await
        .map_err(|e| StoreError::Unreachable(e.to_string()))?;
    read_reply(stream).await
}

async fn read_reply(stream: &mut BufStream<TcpStream>) -> Result<Reply, StoreError> {
    let mut line = String::new();
    let n = stream
        .read_line(&mut line)
        .await
        .map_err(|e| StoreError::Unreachable(e.to_string()))?;
    if n == 0 {
        return Err(StoreError::Unreachable("connection closed".into()));
    }
    let line = line.trim_end_matches(['\r', '\n']);
    let (kind, rest) = line.split_at(1);
    match kind {
        "+" => Ok(Reply::Simple(rest.to_string())),
        "-" => Err(StoreError::Protocol(rest.to_string())),
        ":" => rest
            .parse()
            .map(Reply::Int)
            .map_err(|_| StoreError::Protocol(format!("bad integer reply: {rest}"))),
        "$" => {
            let len: i64 = rest
                .parse()
                .map_err(|_| StoreError::Protocol(format!("bad bulk length: {rest}")))?;
            if len < 0 {
                return Ok(Reply::Bulk(None));
            }
            let mut payload = vec![0u8; len as usize + 2];
            stream
                .read_exact(&mut payload)
                .await
                .map_err(|e| StoreError::Unreachable(e.to_string()))?;
            payload.truncate(len as usize);
            let value = String::from_utf8(payload)
                .map_err(|_| StoreError::Protocol("bulk reply is not utf-8".into()))?;
            Ok(Reply::Bulk(Some(value)))
        }
        other => Err(StoreError::Protocol(format!("unknown reply type: {other}"))),
    }
}

#[async_trait::async_trait]
impl CounterStore for RespCounterStore {
    async fn incr(&self, key: &str) -> Result<u64, StoreError> {
        let n = self.command_int(&["INCR", key]).await?;
        Ok(n.max(0) as u64)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let ttl = ttl_secs.to_string();
        self.command_int(&["EXPIRE", key, &ttl]).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.command(&["GET", key]).await? {
            Reply::Bulk(v) => Ok(v),
            other => Err(StoreError::Protocol(format!(
                "expected bulk reply, got {other:?}"
            ))),
        }
    }

    async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        self.command_int(&["TTL", key]).await
    }

    async fn ping(&self) -> bool {
        match self.command(&["PING"]).await {
            Ok(Reply::Simple(s)) => s == "PONG",
            Ok(_) => false,
            Err(e) => {
                tracing::warn!(error = %e, "counter store liveness probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::AsyncReadExt as _;
    use tokio::net::TcpListener;

    /// Accept one connection and answer each incoming command with the next
    /// scripted reply. The client serializes commands, so a plain
    /// read-then-write loop is enough.
    async fn scripted_server(replies: Vec<&'static str>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 512];
            for reply in replies {
                let n = sock.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                sock.write_all(reply.as_bytes()).await.unwrap();
            }
        });
        addr
    }

    fn fast_settings(addr: &str) -> StoreSettings {
        StoreSettings {
            addr: addr.to_string(),
            connect_timeout: Duration::from_millis(500),
            command_timeout: Duration::from_millis(500),
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(5),
            max_retries: 2,
        }
    }

    #[tokio::test]
    async fn test_incr_and_ttl_replies() {
        let addr = scripted_server(vec![":1\r\n", ":1\r\n", ":60\r\n"]).await;
        let store = RespCounterStore::new(fast_settings(&addr.to_string()));
        assert_eq!(store.incr("w:acme:1.2.3.4").await.unwrap(), 1);
        store.expire("w:acme:1.2.3.4", 60).await.unwrap();
        assert_eq!(store.ttl("w:acme:1.2.3.4").await.unwrap(), 60);
    }

    #[tokio::test]
    async fn test_ping_and_missing_get() {
        let addr = scripted_server(vec!["+PONG\r\n", "$-1\r\n", "$2\r\n17\r\n"]).await;
        let store = RespCounterStore::new(fast_settings(&addr.to_string()));
        assert!(store.ping().await);
        assert_eq!(store.get("missing").await.unwrap(), None);
        assert_eq!(store.get("w").await.unwrap().as_deref(), Some("17"));
    }

    #[tokio::test]
    async fn test_error_reply_is_protocol_error() {
        let addr = scripted_server(vec!["-ERR wrong type\r\n"]).await;
        let store = RespCounterStore::new(fast_settings(&addr.to_string()));
        assert!(matches!(
            store.incr("k").await,
            Err(StoreError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_terminal_after_retry_budget() {
        // Nothing listens on port 1; every dial is refused immediately.
        let store = RespCounterStore::new(fast_settings("127.0.0.1:1"));
        let err = store.incr("k").await.unwrap_err();
        assert!(matches!(err, StoreError::Terminal { attempts: 2 }));
        // Terminal is sticky: no further dialing, probe reports dead.
        assert!(!store.ping().await);
    }
}
