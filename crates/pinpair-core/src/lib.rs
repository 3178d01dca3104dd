//! Pinpair Core - Shared identity, error, and configuration types
//!
//! This crate contains the foundational types used by the pinpair broker.
//! It has no dependencies on networking or storage code.

pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigError, Policy, SignalConfig};
pub use crypto::{MessageId, RoomCode, SecretId};
pub use error::{ErrorKind, SignalError};

/// Number of digits in a room code
pub const ROOM_CODE_LENGTH: usize = 6;

/// Number of hex characters in a peer secret id
pub const SECRET_ID_LENGTH: usize = 32;

/// Maximum queued messages per peer per room
pub const MAX_QUEUE_LEN: usize = 400;

/// Seconds a room may live without a joiner (15 minutes)
pub const ROOM_IDLE_SECS: u64 = 900;

/// Seconds since the last authorized action before a peer is stale
pub const PEER_STALE_SECS: u64 = 90;

/// Attempts at drawing an unused room code before giving up
pub const PIN_ATTEMPTS: usize = 1000;
