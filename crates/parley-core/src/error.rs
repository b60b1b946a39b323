//! Shared error type across parley crates.

use thiserror::Error;

/// Stable error classification (used in logs, metrics and tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Undecodable envelope or message bytes.
    Malformed,
    /// Structurally invalid message (ids, target, reference).
    InvalidMessage,
    /// Message is not a legal next step of its dialogue.
    ProtocolViolation,
    /// No dialogue matches the message and it cannot open one.
    NoDialogue,
    /// No connection resolves for an outbound envelope.
    Routing,
    /// Transport-level failure (connect/send/receive).
    Connection,
    /// Operation requires a connected component.
    NotConnected,
    /// Invalid configuration.
    Config,
    /// Internal invariant failure.
    Internal,
}

impl ErrorKind {
    /// String representation used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Malformed => "MALFORMED",
            ErrorKind::InvalidMessage => "INVALID_MESSAGE",
            ErrorKind::ProtocolViolation => "PROTOCOL_VIOLATION",
            ErrorKind::NoDialogue => "NO_DIALOGUE",
            ErrorKind::Routing => "ROUTING",
            ErrorKind::Connection => "CONNECTION",
            ErrorKind::NotConnected => "NOT_CONNECTED",
            ErrorKind::Config => "CONFIG",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, ParleyError>;

/// Unified error type used by core and runtime.
#[derive(Debug, Clone, Error)]
pub enum ParleyError {
    #[error("malformed: {0}")]
    Malformed(String),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("no dialogue: {0}")]
    NoDialogue(String),
    #[error("routing: {0}")]
    Routing(String),
    #[error("connection: {0}")]
    Connection(String),
    #[error("not connected: {0}")]
    NotConnected(String),
    #[error("config: {0}")]
    Config(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl ParleyError {
    /// Map the error to its stable kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ParleyError::Malformed(_) => ErrorKind::Malformed,
            ParleyError::InvalidMessage(_) => ErrorKind::InvalidMessage,
            ParleyError::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            ParleyError::NoDialogue(_) => ErrorKind::NoDialogue,
            ParleyError::Routing(_) => ErrorKind::Routing,
            ParleyError::Connection(_) => ErrorKind::Connection,
            ParleyError::NotConnected(_) => ErrorKind::NotConnected,
            ParleyError::Config(_) => ErrorKind::Config,
            ParleyError::Internal(_) => ErrorKind::Internal,
        }
    }
}
