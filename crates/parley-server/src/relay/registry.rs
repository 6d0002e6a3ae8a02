//! Username registry for live connections.
//!
//! Keeps `username -> connection` and `connection -> username` as one unit.
//! The registry is plain owned state with no interior locking: it lives
//! inside the [`Router`](super::Router) task and is only reached through
//! that task's inbound queue.

use crate::connection::ConnectionId;
use parley_core::{RelayError, RelayResult};
use std::collections::HashMap;

/// Bijection between registered usernames and their connections.
#[derive(Debug, Default)]
pub struct Registry {
    /// Username bound to each registered connection.
    user_of: HashMap<ConnectionId, String>,
    /// Connection holding each registered username.
    connection_of: HashMap<String, ConnectionId>,
}

impl Registry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `username` to `conn`.
    ///
    /// Fails without touching either map when the username is blank or held
    /// by another connection. A connection that is already bound is rebound:
    /// its previous name is released in the same step and returned.
    pub fn register(&mut self, conn: ConnectionId, username: &str) -> RelayResult<Option<String>> {
        if username.trim().is_empty() {
            return Err(RelayError::EmptyUsername);
        }
        match self.connection_of.get(username) {
            Some(holder) if *holder == conn => return Ok(None),
            Some(_) => return Err(RelayError::UsernameTaken(username.to_string())),
            None => {}
        }

        let previous = self.user_of.insert(conn, username.to_string());
        if let Some(ref old) = previous {
            self.connection_of.remove(old);
        }
        self.connection_of.insert(username.to_string(), conn);
        Ok(previous)
    }

    /// Connection currently holding `username`.
    pub fn lookup(&self, username: &str) -> Option<ConnectionId> {
        self.connection_of.get(username).copied()
    }

    /// Username bound to `conn`, if it has registered and not yet left.
    pub fn identity_of(&self, conn: ConnectionId) -> Option<&str> {
        self.user_of.get(&conn).map(String::as_str)
    }

    /// Drop `conn` from both maps. Unknown connections are a no-op.
    ///
    /// Returns the username that was released, so callers can tell the first
    /// removal apart from repeats.
    pub fn remove(&mut self, conn: ConnectionId) -> Option<String> {
        let username = self.user_of.remove(&conn)?;
        self.connection_of.remove(&username);
        Some(username)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.user_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.user_of.is_empty()
    }

    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        self.user_of.len() == self.connection_of.len()
            && self
                .user_of
                .iter()
                .all(|(conn, user)| self.connection_of.get(user) == Some(conn))
    }
}
