//! TCP accept loop.
//!
//! Each accepted socket gets a fresh [`ConnectionId`], its write path
//! attached at the dispatcher, one writer task and exactly one read worker.
//! Accept errors are logged and the loop keeps going.

use crate::connection::{self, ConnectionHandle, ConnectionId, ConnectionIds};
use crate::relay::{DispatchCommand, RouterEvent};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Pause after a failed accept, so a persistent error (e.g. out of file
/// descriptors) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Per-connection settings and the queues every connection feeds.
#[derive(Clone)]
pub struct AcceptContext {
    pub events: mpsc::Sender<RouterEvent>,
    pub dispatch: mpsc::Sender<DispatchCommand>,
    pub connection_queue: usize,
    pub max_frame_len: usize,
    pub write_timeout: Duration,
}

/// Accept connections until the dispatcher goes away.
pub async fn accept_loop(listener: TcpListener, ctx: AcceptContext) {
    let ids = ConnectionIds::new();

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let conn = ids.next();
                info!(conn = %conn, peer = %peer, "connection accepted");
                if !spawn_connection(conn, stream, &ctx).await {
                    warn!("dispatcher closed, stopping accept loop");
                    break;
                }
            }
            Err(e) => {
                error!(error = %e, "TCP accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Wire up one accepted connection. Returns `false` if the dispatcher is gone.
async fn spawn_connection(conn: ConnectionId, stream: TcpStream, ctx: &AcceptContext) -> bool {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(conn = %conn, error = %e, "could not set TCP_NODELAY");
    }
    let (reader, writer) = stream.into_split();

    let (outbox_tx, outbox_rx) = mpsc::channel(ctx.connection_queue);
    let (closed_tx, closed_rx) = watch::channel(());

    // Attach before the read worker exists, so the write path is in place
    // before any reply to this connection can be routed.
    let attach = DispatchCommand::Attach {
        conn,
        handle: ConnectionHandle {
            outbox: outbox_tx,
            closed: closed_tx,
        },
    };
    if ctx.dispatch.send(attach).await.is_err() {
        return false;
    }

    tokio::spawn(connection::write_loop(
        conn,
        writer,
        outbox_rx,
        ctx.events.clone(),
        ctx.write_timeout,
    ));
    tokio::spawn(connection::read_loop(
        conn,
        reader,
        closed_rx,
        ctx.events.clone(),
        ctx.max_frame_len,
    ));
    true
}
