//! Error taxonomy for the broker.
//!
//! Display strings double as the wire `error` phrases, so every variant
//! reads as a human sentence naming the failing stage. The facade catches
//! every [`LinkError`] and folds it into the response DTO; nothing here
//! ever crosses the transport as a panic.

use thiserror::Error;

pub type LinkResult<T> = std::result::Result<T, LinkError>;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Manipulator {0} not registered")]
    NotRegistered(String),

    #[error("Manipulator {0} already registered")]
    AlreadyRegistered(String),

    #[error("Invalid manipulator ID: {0}")]
    InvalidId(String),

    #[error("Manipulator {0} is not connected")]
    NotConnected(String),

    #[error("Write disabled")]
    WriteDisabled,

    #[error("Manipulator {0} is not calibrated")]
    CalibrationIncomplete(String),

    #[error("Movement cancelled")]
    MovementCancelled,

    #[error("Movement interrupted: {0}")]
    MovementInterrupted(String),

    #[error("Manipulator {0} did not reach target position")]
    DidNotReachTarget(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for LinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            LinkError::Protocol(err.to_string())
        } else {
            LinkError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_phrases_match_protocol() {
        assert_eq!(LinkError::WriteDisabled.to_string(), "Write disabled");
        assert_eq!(
            LinkError::NotRegistered("1".into()).to_string(),
            "Manipulator 1 not registered"
        );
        assert_eq!(LinkError::MovementCancelled.to_string(), "Movement cancelled");
    }
}
