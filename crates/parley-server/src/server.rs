//! Core server: binds the listener and wires router, dispatcher and
//! per-connection workers together.
//!
//! Owns the queue bounds and per-connection settings from [`ServerConfig`].
//! Every bounded queue blocks its submitter when full; nothing is dropped.

use crate::config::ServerConfig;
use crate::listener::{self, AcceptContext};
use crate::relay::{Dispatcher, Router};
use parley_core::{RelayError, RelayResult};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;

/// The parley relay server.
pub struct RelayServer {
    /// Server configuration.
    config: ServerConfig,
    /// Bound, not yet accepting.
    listener: TcpListener,
}

impl RelayServer {
    /// Validate `config` and bind its listen address.
    pub async fn bind(config: ServerConfig) -> RelayResult<Self> {
        config.validate()?;
        let addr = config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayError::Transport(format!("bind {addr} failed: {e}")))?;
        Ok(Self { config, listener })
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> RelayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Start the router and dispatcher, then accept connections forever.
    ///
    /// Returns only if the relay core stops underneath the accept loop.
    pub async fn run(self) -> RelayResult<()> {
        let addr = self.local_addr()?;
        let config = self.config;

        let (events_tx, events_rx) = mpsc::channel(config.inbound_queue);
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.outbound_queue);

        tokio::spawn(Dispatcher::new(dispatch_rx).run());
        tokio::spawn(Router::new(events_rx, dispatch_tx.clone()).run());

        info!(
            addr = %addr,
            inbound_queue = config.inbound_queue,
            outbound_queue = config.outbound_queue,
            connection_queue = config.connection_queue,
            "parley-server ready"
        );

        let ctx = AcceptContext {
            events: events_tx,
            dispatch: dispatch_tx,
            connection_queue: config.connection_queue,
            max_frame_len: config.max_frame_len,
            write_timeout: config.write_timeout,
        };
        listener::accept_loop(self.listener, ctx).await;

        Err(RelayError::Transport("relay core stopped".into()))
    }
}
