//! Identity utilities for pinpair
//!
//! Provides:
//! - Room code generation and validation (6 decimal digits)
//! - Peer secret ids (32 lowercase hex characters) with constant-time matching
//! - Opaque message ids

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SignalError;
use crate::{ROOM_CODE_LENGTH, SECRET_ID_LENGTH};

/// Number of distinct room codes
const CODE_SPACE: u32 = 1_000_000;

/// Largest multiple of `CODE_SPACE` that fits in a u32; draws at or above
/// it are rejected so every code is equally likely.
const CODE_SAMPLE_LIMIT: u32 = (u32::MAX / CODE_SPACE) * CODE_SPACE;

/// Fill a buffer from the OS entropy source
fn random_bytes<const N: usize>() -> Result<[u8; N], SignalError> {
    let mut bytes = [0u8; N];
    getrandom::fill(&mut bytes)?;
    Ok(bytes)
}

/// A human-typeable room code, e.g. "482193"
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Draw a random code. Uniqueness against live rooms is the caller's job.
    pub fn generate() -> Result<Self, SignalError> {
        loop {
            let draw = u32::from_le_bytes(random_bytes::<4>()?);
            if draw < CODE_SAMPLE_LIMIT {
                return Ok(Self(format!(
                    "{:0width$}",
                    draw % CODE_SPACE,
                    width = ROOM_CODE_LENGTH
                )));
            }
        }
    }

    /// Parse a client-supplied code; exactly six ASCII digits
    pub fn parse(input: &str) -> Result<Self, SignalError> {
        if is_valid_room_code(input) {
            Ok(Self(input.to_string()))
        } else {
            Err(SignalError::InvalidCode)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate a room code format
pub fn is_valid_room_code(code: &str) -> bool {
    code.len() == ROOM_CODE_LENGTH && code.bytes().all(|b| b.is_ascii_digit())
}

/// Unguessable token proving a peer's role in a room
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretId(String);

impl SecretId {
    pub fn generate() -> Result<Self, SignalError> {
        Ok(Self(hex::encode(random_bytes::<16>()?)))
    }

    pub fn parse(input: &str) -> Result<Self, SignalError> {
        if is_valid_secret_id(input) {
            Ok(Self(input.to_string()))
        } else {
            Err(SignalError::InvalidSecret)
        }
    }

    /// Constant-time comparison
    ///
    /// Both sides are hashed and compared as `blake3::Hash`, whose equality
    /// does not short-circuit on the first differing byte.
    pub fn matches(&self, candidate: &SecretId) -> bool {
        blake3::hash(self.0.as_bytes()) == blake3::hash(candidate.0.as_bytes())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Keep secrets out of logs
impl fmt::Debug for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(4).collect();
        write!(f, "SecretId({}…)", prefix)
    }
}

/// Validate a secret id format
pub fn is_valid_secret_id(id: &str) -> bool {
    id.len() == SECRET_ID_LENGTH && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Opaque per-message identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn generate() -> Result<Self, SignalError> {
        Ok(Self(hex::encode(random_bytes::<8>()?)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_room_code_generation() {
        for _ in 0..200 {
            let code = RoomCode::generate().unwrap();
            assert_eq!(code.as_str().len(), 6);
            assert!(is_valid_room_code(code.as_str()));
        }
    }

    #[test]
    fn test_room_code_parse() {
        assert_eq!(RoomCode::parse("000123").unwrap().as_str(), "000123");
        assert_eq!(RoomCode::parse(" 482193\n"), Err(SignalError::InvalidCode));
        assert_eq!(RoomCode::parse("482193 "), Err(SignalError::InvalidCode));

        assert_eq!(RoomCode::parse("12345"), Err(SignalError::InvalidCode));
        assert_eq!(RoomCode::parse("1234567"), Err(SignalError::InvalidCode));
        assert_eq!(RoomCode::parse("12a456"), Err(SignalError::InvalidCode));
        assert_eq!(RoomCode::parse(""), Err(SignalError::InvalidCode));
        // Non-ASCII digits are not accepted
        assert_eq!(RoomCode::parse("١٢٣٤٥٦"), Err(SignalError::InvalidCode));
    }

    #[test]
    fn test_secret_generation() {
        let a = SecretId::generate().unwrap();
        let b = SecretId::generate().unwrap();
        assert_eq!(a.as_str().len(), 32);
        assert!(is_valid_secret_id(a.as_str()));
        assert_ne!(a.as_str(), b.as_str());
    }

    #[test]
    fn test_secret_parse() {
        let ok = "0123456789abcdef0123456789abcdef";
        assert!(SecretId::parse(ok).is_ok());

        let upper = "0123456789ABCDEF0123456789ABCDEF";
        assert_eq!(SecretId::parse(upper), Err(SignalError::InvalidSecret));
        assert_eq!(SecretId::parse(&ok[..31]), Err(SignalError::InvalidSecret));
        assert_eq!(
            SecretId::parse("0123456789abcdef0123456789abcdeg"),
            Err(SignalError::InvalidSecret)
        );
    }

    #[test]
    fn test_secret_matches() {
        let a = SecretId::parse("0123456789abcdef0123456789abcdef").unwrap();
        let same = SecretId::parse("0123456789abcdef0123456789abcdef").unwrap();
        let other = SecretId::parse("f123456789abcdef0123456789abcdef").unwrap();
        assert!(a.matches(&same));
        assert!(!a.matches(&other));
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let a = SecretId::parse("0123456789abcdef0123456789abcdef").unwrap();
        let shown = format!("{:?}", a);
        assert!(!shown.contains("0123456789abcdef0123456789abcdef"));
    }

    #[test]
    fn test_secret_debug_with_unchecked_contents() {
        // Deserialized secrets skip format validation
        let odd: SecretId = serde_json::from_str(r#""é☃x""#).unwrap();
        assert_eq!(format!("{:?}", odd), "SecretId(é☃x…)");

        let multibyte: SecretId = serde_json::from_str(r#""aaaé""#).unwrap();
        assert_eq!(format!("{:?}", multibyte), "SecretId(aaaé…)");
    }

    #[test]
    fn test_message_ids_unique() {
        let ids: HashSet<String> = (0..100)
            .map(|_| MessageId::generate().unwrap().as_str().to_string())
            .collect();
        assert_eq!(ids.len(), 100);
    }
}
