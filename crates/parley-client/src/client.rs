//! The parley client.
//!
//! `RelayClient` owns one TCP connection to the relay: registration,
//! outgoing messages and the stream of incoming envelopes.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time;
use tracing::{debug, info, warn};

use parley_core::{frame_encode, Envelope, FrameDecoder, MsgKind, RelayError, RelayResult};

/// How `connect_and_register` retries.
///
/// Only transport failures (refused connection, connection dropped before
/// the reply) are retried. A rejection from the server, such as a taken
/// username, is returned immediately so the caller can pick another name.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each one after.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1u32 << shift)
    }
}

/// A connection to the relay.
pub struct RelayClient {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    decoder: FrameDecoder,
    /// Envelopes decoded but not yet returned by `recv`.
    pending: VecDeque<Envelope>,
    /// Name accepted by the server, once registered.
    username: Option<String>,
}

impl RelayClient {
    /// Open a TCP connection to the relay.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> RelayResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| RelayError::Transport(format!("connect failed: {e}")))?;
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();

        Ok(Self {
            reader,
            writer,
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            username: None,
        })
    }

    /// Connect and register, retrying transport failures per `policy`.
    pub async fn connect_and_register<A>(addr: A, username: &str, policy: &RetryPolicy) -> RelayResult<Self>
    where
        A: ToSocketAddrs + Clone,
    {
        let attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = match Self::connect(addr.clone()).await {
                Ok(mut client) => client.register(username).await.map(|()| client),
                Err(e) => Err(e),
            };

            match result {
                Ok(client) => return Ok(client),
                Err(e @ RelayError::Rejected(_)) => return Err(e),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    let delay = policy.delay_after(attempt);
                    warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "registration attempt failed, retrying");
                    time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Claim `username` and wait for the server's single reply.
    ///
    /// On a connection that is already registered, relayed messages may
    /// arrive ahead of the reply. They are kept for [`recv`](Self::recv) in
    /// arrival order.
    pub async fn register(&mut self, username: &str) -> RelayResult<()> {
        self.send(&Envelope::register(username)).await?;

        let mut deferred = Vec::new();
        let reply = loop {
            match self.recv().await {
                Ok(Some(envelope)) if matches!(envelope.kind, MsgKind::Ok | MsgKind::Error) => break Ok(envelope),
                Ok(Some(envelope)) => {
                    debug!(kind = ?envelope.kind, "holding envelope received before registration reply");
                    deferred.push(envelope);
                }
                Ok(None) => {
                    break Err(RelayError::Transport(
                        "connection closed before registration reply".into(),
                    ))
                }
                Err(e) => break Err(e),
            }
        };
        for envelope in deferred.into_iter().rev() {
            self.pending.push_front(envelope);
        }

        let reply = reply?;
        if reply.kind == MsgKind::Error {
            return Err(RelayError::Rejected(reply.data));
        }
        info!(username = %username, "registered");
        self.username = Some(username.to_string());
        Ok(())
    }

    /// Send `text` to `receiver`. Delivery failures come back as an ERROR
    /// envelope through [`recv`](Self::recv).
    pub async fn send_message(&mut self, receiver: &str, text: &str) -> RelayResult<()> {
        let sender = self.username.clone().unwrap_or_default();
        self.send(&Envelope::message(sender, receiver, text)).await
    }

    /// Write one raw envelope.
    pub async fn send(&mut self, envelope: &Envelope) -> RelayResult<()> {
        let frame = frame_encode(envelope)?;
        self.writer
            .write_all(&frame)
            .await
            .map_err(|e| RelayError::Transport(format!("write failed: {e}")))?;
        debug!(kind = ?envelope.kind, "sent envelope");
        Ok(())
    }

    /// Next envelope from the server, or `None` once it closes the connection.
    pub async fn recv(&mut self) -> RelayResult<Option<Envelope>> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(envelope) = self.pending.pop_front() {
                return Ok(Some(envelope));
            }

            let n = self
                .reader
                .read(&mut buf)
                .await
                .map_err(|e| RelayError::Transport(format!("read failed: {e}")))?;
            if n == 0 {
                return Ok(None);
            }
            let envelopes: Vec<Envelope> = self.decoder.feed(&buf[..n])?;
            self.pending.extend(envelopes);
        }
    }

    /// Registered username, if registration succeeded.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Close the write direction; the server sees EOF and cleans up.
    pub async fn disconnect(mut self) -> RelayResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
    }

    /// One-shot fake relay: answers the first line with `replies`.
    async fn fake_relay(replies: Vec<Envelope>) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut decoder = FrameDecoder::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                let got: Vec<Envelope> = decoder.feed(&buf[..n]).unwrap();
                if let Some(first) = got.first() {
                    assert_eq!(first.kind, MsgKind::Register);
                    break;
                }
            }
            let mut bytes = Vec::new();
            for reply in &replies {
                bytes.extend(frame_encode(reply).unwrap());
            }
            stream.write_all(&bytes).await.unwrap();
            // Hold the socket open until the client is done.
            let _ = stream.read(&mut buf).await;
        });
        addr
    }

    #[tokio::test]
    async fn register_ok_records_username() {
        let addr = fake_relay(vec![Envelope::ok()]).await;
        let mut client = RelayClient::connect(addr).await.unwrap();
        client.register("alice").await.unwrap();
        assert_eq!(client.username(), Some("alice"));
    }

    #[tokio::test]
    async fn messages_ahead_of_the_reply_are_kept() {
        let addr = fake_relay(vec![
            Envelope::message("alice", "bob", "first"),
            Envelope::message("alice", "bob", "second"),
            Envelope::ok(),
        ])
        .await;
        let mut client = RelayClient::connect(addr).await.unwrap();
        client.register("robert").await.unwrap();
        assert_eq!(client.username(), Some("robert"));

        let first = client.recv().await.unwrap().unwrap();
        let second = client.recv().await.unwrap().unwrap();
        assert_eq!(first.data, "first");
        assert_eq!(second.data, "second");
        assert_eq!(second.sender, "alice");
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let addr = fake_relay(vec![Envelope::error("username \"alice\" is already taken")]).await;
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff: Duration::from_millis(1),
        };
        // The fake relay accepts a single connection; a retry would hang on
        // connect-then-no-reply, so a prompt Rejected proves no retry happened.
        let result = RelayClient::connect_and_register(addr, "alice", &policy).await;
        match result {
            Err(RelayError::Rejected(reason)) => assert!(reason.contains("taken")),
            Err(e) => panic!("expected rejection, got {e}"),
            Ok(_) => panic!("expected rejection, got success"),
        }
    }

    #[tokio::test]
    async fn refused_connection_exhausts_attempts() {
        // Bind then drop to get a port with nothing listening.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let policy = RetryPolicy {
            max_attempts: 2,
            backoff: Duration::from_millis(1),
        };
        let result = RelayClient::connect_and_register(addr, "alice", &policy).await;
        assert!(matches!(result, Err(RelayError::Transport(_))));
    }
}
