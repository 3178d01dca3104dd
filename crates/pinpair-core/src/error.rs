//! Error types for the pinpair broker

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broker-level errors
///
/// The `Display` strings are short and stable; clients should branch on
/// [`SignalError::kind`] rather than on the text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    #[error("PIN must be a 6-digit number.")]
    InvalidCode,

    #[error("Invalid peer ID.")]
    InvalidSecret,

    #[error("Invalid signal type.")]
    InvalidKind,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Unauthorized peer.")]
    Unauthorized,

    #[error("Connection is not paired.")]
    NotPaired,

    #[error("PIN does not match current room.")]
    CodeMismatch,

    #[error("Room not found.")]
    RoomNotFound,

    #[error("Room expired.")]
    RoomExpired,

    #[error("Room already has a receiver.")]
    RoomOccupied,

    #[error("Connection is already in a room.")]
    AlreadyPaired,

    #[error("Peer is not connected.")]
    PeerUnavailable,

    #[error("Unable to create room PIN.")]
    CodeSpaceExhausted,

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("entropy source unavailable: {0}")]
    Entropy(String),
}

/// Error classification exposed on the wire
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed code, secret id, kind, or envelope
    Validation,

    /// Well-formed identity that matches no role
    Auth,

    /// Room absent
    NotFound,

    /// Joiner slot occupied, or connection already paired
    Conflict,

    /// Target role currently absent
    PeerUnavailable,

    /// Room code space exhausted
    Capacity,

    /// Persistence layer failure
    Storage,

    /// Anything else the broker cannot recover from for this request
    Internal,
}

impl SignalError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SignalError::InvalidCode
            | SignalError::InvalidSecret
            | SignalError::InvalidKind
            | SignalError::InvalidRequest(_) => ErrorKind::Validation,
            SignalError::Unauthorized | SignalError::NotPaired | SignalError::CodeMismatch => {
                ErrorKind::Auth
            }
            SignalError::RoomNotFound | SignalError::RoomExpired => ErrorKind::NotFound,
            SignalError::RoomOccupied | SignalError::AlreadyPaired => ErrorKind::Conflict,
            SignalError::PeerUnavailable => ErrorKind::PeerUnavailable,
            SignalError::CodeSpaceExhausted => ErrorKind::Capacity,
            SignalError::Storage(_) => ErrorKind::Storage,
            SignalError::Entropy(_) => ErrorKind::Internal,
        }
    }

    /// Server-side failures, as opposed to problems with the request
    pub fn is_server_fault(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Capacity | ErrorKind::Storage | ErrorKind::Internal
        )
    }
}

impl From<getrandom::Error> for SignalError {
    fn from(e: getrandom::Error) -> Self {
        SignalError::Entropy(e.to_string())
    }
}
