//! Per-connection I/O: identity allocation, the read worker and the writer.
//!
//! Every accepted socket is split into two halves. The read half feeds the
//! router's inbound queue; the write half drains a bounded per-connection
//! outbox filled by the dispatcher. Either side reports a terminal failure
//! as [`RouterEvent::Disconnected`], which the router handles idempotently.

use crate::relay::RouterEvent;
use parley_core::{frame_encode, json_decode, Envelope, FrameDecoder, RelayError, RelayResult};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Opaque handle for one live transport connection.
///
/// Distinct from the username: a connection exists before it registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    #[cfg(test)]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Monotonic connection ID source. IDs are never reused.
#[derive(Debug)]
pub struct ConnectionIds {
    next: AtomicU64,
}

impl Default for ConnectionIds {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionIds {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// The dispatcher's side of a connection.
///
/// Dropping the handle closes the outbox (the writer finishes and shuts the
/// write half) and drops `closed` (the read worker stops).
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Bounded queue drained by this connection's writer.
    pub outbox: mpsc::Sender<Envelope>,
    /// Held only to be dropped; the read worker watches for that.
    pub closed: watch::Sender<()>,
}

/// Read worker: decode frames from `reader` and submit them in order.
///
/// Stops on EOF, read error, malformed or oversized frame, or when the
/// connection is detached. Always ends by reporting `Disconnected`.
pub async fn read_loop<R>(
    conn: ConnectionId,
    mut reader: R,
    mut closed: watch::Receiver<()>,
    events: mpsc::Sender<RouterEvent>,
    max_frame_len: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::with_max_frame_len(max_frame_len);
    let mut buf = vec![0u8; 4096];

    let reason = 'read: loop {
        let read = tokio::select! {
            _ = closed.changed() => None,
            result = reader.read(&mut buf) => Some(result),
        };

        let n = match read {
            None => break "detached".to_string(),
            Some(Ok(0)) => break "eof".to_string(),
            Some(Ok(n)) => n,
            Some(Err(e)) => break format!("read failed: {e}"),
        };

        // Frames ahead of a bad one in the same read are still submitted.
        decoder.push(&buf[..n]);
        loop {
            let line = match decoder.next_frame() {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => break 'read e.to_string(),
            };
            let envelope: Envelope = match json_decode(&line) {
                Ok(envelope) => envelope,
                Err(e) => break 'read e.to_string(),
            };

            debug!(conn = %conn, kind = ?envelope.kind, "inbound envelope");
            if events
                .send(RouterEvent::Inbound { conn, envelope })
                .await
                .is_err()
            {
                debug!(conn = %conn, "router gone, stopping read worker");
                return;
            }
        }
    };

    drop(reader);
    debug!(conn = %conn, reason = %reason, "read worker stopped");
    let _ = events.send(RouterEvent::Disconnected { conn }).await;
}

/// Writer: drain `outbox` to `writer` in order.
///
/// A failed or timed-out write closes the outbox first, so the dispatcher
/// never blocks on a dead connection, then reports `Disconnected`.
pub async fn write_loop<W>(
    conn: ConnectionId,
    mut writer: W,
    mut outbox: mpsc::Receiver<Envelope>,
    events: mpsc::Sender<RouterEvent>,
    write_timeout: Duration,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(envelope) = outbox.recv().await {
        if let Err(e) = write_envelope(&mut writer, &envelope, write_timeout).await {
            warn!(conn = %conn, error = %e, "write failed, closing connection");
            outbox.close();
            drop(writer);
            let _ = events.send(RouterEvent::Disconnected { conn }).await;
            return;
        }
    }

    let _ = writer.shutdown().await;
    debug!(conn = %conn, "write path closed");
}

/// Encode and write one envelope within `timeout`.
pub async fn write_envelope<W>(writer: &mut W, envelope: &Envelope, timeout: Duration) -> RelayResult<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = frame_encode(envelope)?;
    let write = async {
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok::<_, std::io::Error>(())
    };
    match tokio::time::timeout(timeout, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(RelayError::Transport(format!("write failed: {e}"))),
        Err(_) => Err(RelayError::Transport(format!(
            "write timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}
