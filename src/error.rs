//! Error types for the game session.
//!
//! Nothing here is fatal to the process. Illegal and out-of-turn moves are
//! rejected without touching state, transport failures degrade connectivity,
//! and reconciliation failures roll back to the last confirmed position.

use thiserror::Error;

/// Failure of an action taken against the session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The rules engine refused the move
    #[error("Illegal move {from}-{to}: {reason}")]
    IllegalMove {
        from: String,
        to: String,
        reason: String,
    },

    /// Move or action attempted out of turn, or after the game ended
    #[error("Invalid turn: {0}")]
    InvalidTurn(String),

    /// No game is attached to the session
    #[error("No game attached")]
    NotAttached,

    /// The synchronization channel could not deliver an event
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server disagreed with a move applied optimistically
    #[error("Reconciliation failed: expected {expected}, server has {actual}")]
    Reconciliation { expected: String, actual: String },
}

impl SessionError {
    pub fn illegal(from: &str, to: &str, reason: impl Into<String>) -> Self {
        SessionError::IllegalMove {
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_turn(message: impl Into<String>) -> Self {
        SessionError::InvalidTurn(message.into())
    }
}

/// Failure of the realtime channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Send failed: {0}")]
    Send(String),

    /// Outbound queue is full while the channel is down
    #[error("Outbound queue full ({0} events waiting)")]
    QueueFull(usize),

    #[error("Channel closed")]
    Closed,
}

/// Failure writing durable local storage. Reads never fail; bad data reads as absent.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
