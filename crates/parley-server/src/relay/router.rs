//! Router: the single consumer that owns the registry.
//!
//! Every registration, routing decision and cleanup goes through one
//! inbound queue, so the registry needs no locking and all decisions are
//! totally ordered. Outbound envelopes are handed to the dispatcher; the
//! router itself never touches a socket.

use super::dispatcher::DispatchCommand;
use super::registry::Registry;
use crate::connection::ConnectionId;
use parley_core::{Envelope, MsgKind, RelayError, RelayResult};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Events consumed by the router.
#[derive(Debug)]
pub enum RouterEvent {
    /// A decoded envelope from `conn`, in arrival order.
    Inbound { conn: ConnectionId, envelope: Envelope },
    /// `conn` hit a terminal transport failure. May arrive more than once.
    Disconnected { conn: ConnectionId },
}

/// The relay actor.
pub struct Router {
    registry: Registry,
    inbound: mpsc::Receiver<RouterEvent>,
    outbound: mpsc::Sender<DispatchCommand>,
}

impl Router {
    /// Create a router reading `inbound` and feeding the dispatcher via `outbound`.
    pub fn new(inbound: mpsc::Receiver<RouterEvent>, outbound: mpsc::Sender<DispatchCommand>) -> Self {
        Self {
            registry: Registry::new(),
            inbound,
            outbound,
        }
    }

    /// Consume events until every inbound sender is gone.
    pub async fn run(mut self) {
        while let Some(event) = self.inbound.recv().await {
            self.handle(event).await;
        }
        if self.registry.is_empty() {
            info!("router stopped");
        } else {
            info!(registered = self.registry.len(), "router stopped with clients still registered");
        }
    }

    async fn handle(&mut self, event: RouterEvent) {
        match event {
            RouterEvent::Inbound { conn, envelope } => {
                let (dest, reply) = match self.route(conn, envelope) {
                    Ok(routed) => routed,
                    Err(e) => {
                        if !e.is_protocol() {
                            warn!(conn = %conn, error = %e, "routing failed");
                        }
                        (conn, Envelope::error(e.to_string()))
                    }
                };
                self.dispatch(DispatchCommand::Deliver {
                    conn: dest,
                    envelope: reply,
                })
                .await;
            }
            RouterEvent::Disconnected { conn } => {
                match self.registry.remove(conn) {
                    Some(username) => info!(conn = %conn, username = %username, "client disconnected"),
                    None => debug!(conn = %conn, "connection closed"),
                }
                self.dispatch(DispatchCommand::Detach { conn }).await;
            }
        }
    }

    /// Apply protocol rules to one envelope from `source`.
    ///
    /// Returns the destination and the envelope to deliver there; an error
    /// is reported back to `source` by the caller.
    fn route(&mut self, source: ConnectionId, mut envelope: Envelope) -> RelayResult<(ConnectionId, Envelope)> {
        match envelope.kind {
            MsgKind::Register => {
                match self.registry.register(source, &envelope.sender) {
                    Ok(Some(previous)) => {
                        info!(conn = %source, username = %envelope.sender, previous = %previous, "client renamed")
                    }
                    Ok(None) => info!(conn = %source, username = %envelope.sender, "client registered"),
                    Err(e) => {
                        debug!(conn = %source, username = %envelope.sender, error = %e, "registration rejected");
                        return Err(e);
                    }
                }
                Ok((source, Envelope::ok()))
            }
            MsgKind::Message => {
                let sender = self
                    .registry
                    .identity_of(source)
                    .ok_or(RelayError::NotRegistered)?
                    .to_string();
                let dest = self
                    .registry
                    .lookup(&envelope.receiver)
                    .ok_or_else(|| RelayError::ReceiverNotFound(envelope.receiver.clone()))?;

                debug!(from = %sender, to = %envelope.receiver, "routing message");
                envelope.sender = sender;
                Ok((dest, envelope))
            }
            MsgKind::Ok | MsgKind::Error | MsgKind::Unknown => Err(RelayError::UnknownMessageType),
        }
    }

    async fn dispatch(&self, command: DispatchCommand) {
        if self.outbound.send(command).await.is_err() {
            warn!("dispatcher gone, dropping outbound command");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        router: Router,
        dispatched: mpsc::Receiver<DispatchCommand>,
        _inbound: mpsc::Sender<RouterEvent>,
    }

    fn harness() -> Harness {
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let (outbound_tx, outbound_rx) = mpsc::channel(16);
        Harness {
            router: Router::new(inbound_rx, outbound_tx),
            dispatched: outbound_rx,
            _inbound: inbound_tx,
        }
    }

    fn conn(n: u64) -> ConnectionId {
        ConnectionId::from_raw(n)
    }

    impl Harness {
        async fn inbound(&mut self, from: ConnectionId, envelope: Envelope) -> (ConnectionId, Envelope) {
            self.router
                .handle(RouterEvent::Inbound { conn: from, envelope })
                .await;
            match self.dispatched.try_recv().unwrap() {
                DispatchCommand::Deliver { conn, envelope } => (conn, envelope),
                other => panic!("expected delivery, got {other:?}"),
            }
        }

        async fn register(&mut self, from: ConnectionId, name: &str) {
            let (dest, reply) = self.inbound(from, Envelope::register(name)).await;
            assert_eq!(dest, from);
            assert_eq!(reply.kind, MsgKind::Ok, "register {name}: {}", reply.data);
        }

        async fn disconnect(&mut self, c: ConnectionId) {
            self.router.handle(RouterEvent::Disconnected { conn: c }).await;
            assert!(matches!(
                self.dispatched.try_recv().unwrap(),
                DispatchCommand::Detach { conn } if conn == c
            ));
        }
    }

    #[tokio::test]
    async fn register_replies_ok_to_registrant() {
        let mut h = harness();
        h.register(conn(1), "alice").await;
        assert_eq!(h.router.registry.lookup("alice"), Some(conn(1)));
    }

    #[tokio::test]
    async fn duplicate_username_gets_error_and_keeps_original() {
        let mut h = harness();
        h.register(conn(1), "alice").await;

        let (dest, reply) = h.inbound(conn(2), Envelope::register("alice")).await;
        assert_eq!(dest, conn(2));
        assert_eq!(reply.kind, MsgKind::Error);
        assert!(reply.data.contains("taken"));
        assert_eq!(h.router.registry.lookup("alice"), Some(conn(1)));
        assert_eq!(h.router.registry.identity_of(conn(2)), None);
    }

    #[tokio::test]
    async fn empty_username_gets_error() {
        let mut h = harness();
        let (dest, reply) = h.inbound(conn(1), Envelope::register("")).await;
        assert_eq!(dest, conn(1));
        assert_eq!(reply.kind, MsgKind::Error);
        assert!(h.router.registry.is_empty());
    }

    #[tokio::test]
    async fn unregistered_sender_is_refused() {
        let mut h = harness();
        h.register(conn(2), "bob").await;

        let (dest, reply) = h
            .inbound(conn(1), Envelope::message("mallory", "bob", "hi"))
            .await;
        assert_eq!(dest, conn(1));
        assert_eq!(reply.kind, MsgKind::Error);
        assert_eq!(reply.data, RelayError::NotRegistered.to_string());
    }

    #[tokio::test]
    async fn unknown_receiver_is_reported_to_sender() {
        let mut h = harness();
        h.register(conn(1), "alice").await;

        let (dest, reply) = h
            .inbound(conn(1), Envelope::message("alice", "nobody", "hi"))
            .await;
        assert_eq!(dest, conn(1));
        assert_eq!(reply.kind, MsgKind::Error);
        assert!(reply.data.contains("does not exist"));
    }

    #[tokio::test]
    async fn message_sender_is_overwritten_with_registered_name() {
        let mut h = harness();
        h.register(conn(1), "alice").await;
        h.register(conn(2), "bob").await;

        let (dest, delivered) = h
            .inbound(conn(1), Envelope::message("mallory", "bob", "hi"))
            .await;
        assert_eq!(dest, conn(2));
        assert_eq!(delivered.kind, MsgKind::Message);
        assert_eq!(delivered.sender, "alice");
        assert_eq!(delivered.receiver, "bob");
        assert_eq!(delivered.data, "hi");
    }

    #[tokio::test]
    async fn unexpected_kinds_are_answered_not_fatal() {
        let mut h = harness();
        for envelope in [
            Envelope::ok(),
            Envelope::error("client-side"),
            Envelope {
                kind: MsgKind::Unknown,
                ..Default::default()
            },
        ] {
            let (dest, reply) = h.inbound(conn(1), envelope).await;
            assert_eq!(dest, conn(1));
            assert_eq!(reply.kind, MsgKind::Error);
            assert_eq!(reply.data, "unknown message type");
        }
        // Still serving the same connection afterwards.
        h.register(conn(1), "alice").await;
    }

    #[tokio::test]
    async fn repeated_disconnect_removes_once_and_frees_name() {
        let mut h = harness();
        h.register(conn(1), "alice").await;
        h.register(conn(2), "bob").await;

        h.disconnect(conn(1)).await;
        h.disconnect(conn(1)).await;
        assert_eq!(h.router.registry.len(), 1);
        assert_eq!(h.router.registry.lookup("alice"), None);
        assert_eq!(h.router.registry.lookup("bob"), Some(conn(2)));

        h.register(conn(3), "alice").await;
        assert_eq!(h.router.registry.lookup("alice"), Some(conn(3)));
    }

    #[tokio::test]
    async fn message_to_departed_user_is_not_delivered() {
        let mut h = harness();
        h.register(conn(1), "alice").await;
        h.register(conn(2), "bob").await;
        h.disconnect(conn(2)).await;

        let (dest, reply) = h.inbound(conn(1), Envelope::message("", "bob", "hi")).await;
        assert_eq!(dest, conn(1));
        assert_eq!(reply.kind, MsgKind::Error);
    }

    #[tokio::test]
    async fn run_exits_when_senders_are_gone() {
        let (inbound_tx, inbound_rx) = mpsc::channel(4);
        let (outbound_tx, mut outbound_rx) = mpsc::channel(4);
        let router = tokio::spawn(Router::new(inbound_rx, outbound_tx).run());

        inbound_tx
            .send(RouterEvent::Inbound {
                conn: conn(1),
                envelope: Envelope::register("alice"),
            })
            .await
            .unwrap();
        drop(inbound_tx);

        router.await.unwrap();
        assert!(matches!(
            outbound_rx.recv().await,
            Some(DispatchCommand::Deliver { envelope, .. }) if envelope.kind == MsgKind::Ok
        ));
    }
}
