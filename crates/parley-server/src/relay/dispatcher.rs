//! Dispatcher: fans outbound envelopes out to per-connection writers.
//!
//! Holds the only map from connection to write path. Deliveries go through
//! each connection's bounded outbox, which keeps per-destination FIFO order;
//! nothing is ordered across destinations.
//!
//! There is one dispatcher loop for all connections. While any single
//! outbox is full, delivery to every destination waits, not just to that
//! one. A stalled writer is bounded by the write timeout; a slow reader
//! that keeps draining within it is not.

use crate::connection::{ConnectionHandle, ConnectionId};
use parley_core::Envelope;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Commands consumed by the dispatcher.
#[derive(Debug)]
pub enum DispatchCommand {
    /// A freshly accepted connection's write path.
    Attach { conn: ConnectionId, handle: ConnectionHandle },
    /// Queue `envelope` for `conn`.
    Deliver { conn: ConnectionId, envelope: Envelope },
    /// Drop the write path, closing both halves of the connection.
    Detach { conn: ConnectionId },
}

/// Owner of all per-connection write paths.
pub struct Dispatcher {
    commands: mpsc::Receiver<DispatchCommand>,
    connections: HashMap<ConnectionId, ConnectionHandle>,
}

impl Dispatcher {
    pub fn new(commands: mpsc::Receiver<DispatchCommand>) -> Self {
        Self {
            commands,
            connections: HashMap::new(),
        }
    }

    /// Consume commands until every sender is gone.
    pub async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            self.handle(command).await;
        }
        info!(attached = self.connections.len(), "dispatcher stopped");
    }

    async fn handle(&mut self, command: DispatchCommand) {
        match command {
            DispatchCommand::Attach { conn, handle } => {
                debug!(conn = %conn, "write path attached");
                self.connections.insert(conn, handle);
            }
            DispatchCommand::Deliver { conn, envelope } => match self.connections.get(&conn) {
                // Blocks the whole loop while this outbox is full; a dead
                // writer closes its outbox, so this fails fast instead.
                Some(handle) => {
                    if handle.outbox.send(envelope).await.is_err() {
                        debug!(conn = %conn, "write path closed, dropping envelope");
                    }
                }
                None => warn!(conn = %conn, kind = ?envelope.kind, "no write path, dropping envelope"),
            },
            DispatchCommand::Detach { conn } => {
                if self.connections.remove(&conn).is_some() {
                    debug!(conn = %conn, "write path detached");
                }
            }
        }
    }
}
