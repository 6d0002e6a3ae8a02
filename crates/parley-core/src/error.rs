use thiserror::Error;

/// Errors produced by the parley protocol layer.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("username must not be empty")]
    EmptyUsername,

    #[error("username {0:?} is already taken")]
    UsernameTaken(String),

    #[error("not registered: send a register message first")]
    NotRegistered,

    #[error("receiver {0:?} does not exist")]
    ReceiverNotFound(String),

    #[error("unknown message type")]
    UnknownMessageType,

    #[error("codec error: {0}")]
    Codec(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected by server: {0}")]
    Rejected(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Whether this error is a recoverable protocol error that is reported
    /// back to the offending connection instead of closing it.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            RelayError::EmptyUsername
                | RelayError::UsernameTaken(_)
                | RelayError::NotRegistered
                | RelayError::ReceiverNotFound(_)
                | RelayError::UnknownMessageType
        )
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Codec(e.to_string())
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_are_recoverable() {
        assert!(RelayError::EmptyUsername.is_protocol());
        assert!(RelayError::UsernameTaken("alice".into()).is_protocol());
        assert!(RelayError::NotRegistered.is_protocol());
        assert!(RelayError::ReceiverNotFound("bob".into()).is_protocol());
        assert!(RelayError::UnknownMessageType.is_protocol());
    }

    #[test]
    fn transport_errors_are_terminal() {
        assert!(!RelayError::Transport("reset".into()).is_protocol());
        assert!(!RelayError::Codec("bad json".into()).is_protocol());
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(!RelayError::from(io).is_protocol());
    }

    #[test]
    fn display_names_the_username() {
        let msg = RelayError::UsernameTaken("alice".into()).to_string();
        assert!(msg.contains("alice"));
        assert!(msg.contains("taken"));
    }
}
