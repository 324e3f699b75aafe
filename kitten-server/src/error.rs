//! Server error types.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] kitten_protocol::ProtocolError),

    #[error("upgrade rejected: {0}")]
    UpgradeRejected(String),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("request has no method")]
    MissingMethod,

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Returns whether the error ends the connection.
    ///
    /// Handler-level errors are reported to the peer as exception responses
    /// and the connection stays usable.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ServerError::UnknownMethod(_) | ServerError::MissingMethod | ServerError::Handler(_)
        )
    }

    /// Returns whether the error counts as a connection failure.
    ///
    /// Rejected upgrades and server shutdown end a connection without
    /// anything having gone wrong.
    pub fn is_failure(&self) -> bool {
        self.is_fatal()
            && !matches!(
                self,
                ServerError::UpgradeRejected(_) | ServerError::ShuttingDown
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kitten_protocol::ProtocolError;

    #[test]
    fn test_fatal_classification() {
        assert!(!ServerError::UnknownMethod("X.Y".into()).is_fatal());
        assert!(!ServerError::MissingMethod.is_fatal());
        assert!(!ServerError::Handler("bad input".into()).is_fatal());
        assert!(ServerError::ShuttingDown.is_fatal());
        assert!(ServerError::Protocol(ProtocolError::InvalidMagic(0)).is_fatal());
    }

    #[test]
    fn test_failure_classification() {
        assert!(ServerError::Protocol(ProtocolError::InvalidMagic(0)).is_failure());
        assert!(!ServerError::UpgradeRejected("method GET not allowed".into()).is_failure());
        assert!(!ServerError::ShuttingDown.is_failure());
        assert!(!ServerError::Handler("bad input".into()).is_failure());
    }

    #[test]
    fn test_display() {
        let err = ServerError::UnknownMethod("Author.Login".into());
        assert!(err.to_string().contains("Author.Login"));

        let err = ServerError::from(ProtocolError::Truncated { section: "header" });
        assert!(err.to_string().contains("header"));
    }
}
