//! Wire envelope exchanged between clients and the relay.
//!
//! Every frame is one JSON object:
//!
//! ```text
//! { "type": "register" | "message" | "ok" | "error",
//!   "data": "...", "sender": "...", "receiver": "..." }
//! ```

use serde::{Deserialize, Serialize};

/// Envelope kind, carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MsgKind {
    Register,
    Message,
    Ok,
    Error,
    /// Any `type` value the relay does not understand, or a missing one.
    #[default]
    #[serde(other)]
    Unknown,
}

/// One protocol message unit.
///
/// Which fields are meaningful depends on [`MsgKind`]:
///
/// * `Register`: `sender` is the requested username.
/// * `Message`: `receiver` is the target, `data` the body; `sender` is
///   advisory inbound and set by the relay outbound.
/// * `Ok`: no fields.
/// * `Error`: `data` is a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type", default)]
    pub kind: MsgKind,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub receiver: String,
}

impl Envelope {
    /// Registration request for `username`.
    pub fn register(username: impl Into<String>) -> Self {
        Self {
            kind: MsgKind::Register,
            sender: username.into(),
            ..Default::default()
        }
    }

    /// Directed text message. `sender` is filled in by the relay.
    pub fn message(sender: impl Into<String>, receiver: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            kind: MsgKind::Message,
            data: data.into(),
            sender: sender.into(),
            receiver: receiver.into(),
        }
    }

    pub fn ok() -> Self {
        Self {
            kind: MsgKind::Ok,
            ..Default::default()
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            kind: MsgKind::Error,
            data: reason.into(),
            ..Default::default()
        }
    }
}
