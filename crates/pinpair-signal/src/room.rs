//! Room data model shared by both bindings
//!
//! A room pairs exactly one initiator with at most one joiner. Each peer
//! carries a delivery channel `C`: a bounded [`Mailbox`](crate::Mailbox)
//! in the polling binding, a live connection handle in the push binding.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use pinpair_core::{MessageId, RoomCode, SecretId, SignalError};

/// Which side of the pairing a peer occupies
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Initiator,
    Joiner,
}

impl Role {
    pub fn opposite(self) -> Role {
        match self {
            Role::Initiator => Role::Joiner,
            Role::Joiner => Role::Initiator,
        }
    }
}

/// Message kinds carried through the broker
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Offer,
    Answer,
    IceCandidate,
    /// Broker-originated: a joiner took the empty slot
    JoinerConnected,
    /// Broker-originated: the opposite peer left or timed out
    PeerDisconnected,
}

impl MessageKind {
    /// Parse a kind a client is allowed to send
    pub fn parse_signal(kind: &str) -> Result<Self, SignalError> {
        match kind {
            "offer" => Ok(MessageKind::Offer),
            "answer" => Ok(MessageKind::Answer),
            "ice-candidate" => Ok(MessageKind::IceCandidate),
            _ => Err(SignalError::InvalidKind),
        }
    }

    /// True for kinds clients may send; broker notifications are excluded
    pub fn is_client_signal(self) -> bool {
        matches!(
            self,
            MessageKind::Offer | MessageKind::Answer | MessageKind::IceCandidate
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Offer => "offer",
            MessageKind::Answer => "answer",
            MessageKind::IceCandidate => "ice-candidate",
            MessageKind::JoinerConnected => "joiner-connected",
            MessageKind::PeerDisconnected => "peer-disconnected",
        }
    }
}

/// Signal body, kept as the exact JSON text the sender supplied
///
/// Never re-encoded: key order, whitespace and number precision survive
/// the mailbox, SQLite, and the WebSocket relay unchanged.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Box<RawValue>);

impl Payload {
    pub fn null() -> Self {
        Self(RawValue::NULL.to_owned())
    }

    /// Wrap JSON text, rejecting anything that does not parse
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        RawValue::from_string(json.to_string()).map(Self)
    }

    pub fn get(&self) -> &str {
        self.0.get()
    }

    pub fn is_null(&self) -> bool {
        self.get() == "null"
    }

    /// Parsed view of the payload
    pub fn value(&self) -> serde_json::Value {
        serde_json::from_str(self.get()).unwrap_or(serde_json::Value::Null)
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::null()
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        serde_json::value::to_raw_value(&value)
            .map(Self)
            .unwrap_or_else(|_| Self::null())
    }
}

/// A message addressed to one peer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub id: MessageId,
    pub kind: MessageKind,
    /// Opaque to the broker
    #[serde(default)]
    pub payload: Payload,
    pub enqueued_at: u64,
}

impl Signal {
    pub fn new(kind: MessageKind, payload: impl Into<Payload>, now: u64) -> Result<Self, SignalError> {
        Ok(Self {
            id: MessageId::generate()?,
            kind,
            payload: payload.into(),
            enqueued_at: now,
        })
    }

    /// A broker notification with no payload
    pub fn notice(kind: MessageKind, now: u64) -> Result<Self, SignalError> {
        Self::new(kind, Payload::null(), now)
    }
}

/// A participant in a room
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer<C> {
    pub secret_id: SecretId,
    pub last_seen_at: u64,
    pub channel: C,
}

impl<C> Peer<C> {
    pub fn new(secret_id: SecretId, now: u64, channel: C) -> Self {
        Self {
            secret_id,
            last_seen_at: now,
            channel,
        }
    }

    pub fn is_stale(&self, now: u64, stale_secs: u64) -> bool {
        now.saturating_sub(self.last_seen_at) > stale_secs
    }
}

/// A rendezvous room keyed by its code
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room<C> {
    pub code: RoomCode,
    pub created_at: u64,
    pub updated_at: u64,
    pub initiator: Peer<C>,
    pub joiner: Option<Peer<C>>,
}

impl<C> Room<C> {
    pub fn new(code: RoomCode, initiator: Peer<C>, now: u64) -> Self {
        Self {
            code,
            created_at: now,
            updated_at: now,
            initiator,
            joiner: None,
        }
    }

    /// Resolve which role, if any, a secret id authorizes
    ///
    /// Both slots are always compared so the time taken does not depend on
    /// which one matched.
    pub fn role_of(&self, secret_id: &SecretId) -> Option<Role> {
        let as_initiator = self.initiator.secret_id.matches(secret_id);
        let as_joiner = self
            .joiner
            .as_ref()
            .map_or(false, |joiner| joiner.secret_id.matches(secret_id));

        if as_initiator {
            Some(Role::Initiator)
        } else if as_joiner {
            Some(Role::Joiner)
        } else {
            None
        }
    }

    pub fn peer(&self, role: Role) -> Option<&Peer<C>> {
        match role {
            Role::Initiator => Some(&self.initiator),
            Role::Joiner => self.joiner.as_ref(),
        }
    }

    pub fn peer_mut(&mut self, role: Role) -> Option<&mut Peer<C>> {
        match role {
            Role::Initiator => Some(&mut self.initiator),
            Role::Joiner => self.joiner.as_mut(),
        }
    }

    pub fn has_joiner(&self) -> bool {
        self.joiner.is_some()
    }

    /// Record an authorized action by `role`
    pub fn touch(&mut self, role: Role, now: u64) {
        if let Some(peer) = self.peer_mut(role) {
            peer.last_seen_at = now;
        }
        self.updated_at = now;
    }

    /// Seconds since creation
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }

    /// Seconds since the last update
    pub fn idle_for(&self, now: u64) -> u64 {
        now.saturating_sub(self.updated_at)
    }
}

/// All live rooms, keyed by code
#[derive(Debug)]
pub struct RoomTable<C> {
    rooms: HashMap<RoomCode, Room<C>>,
}

impl<C> Default for RoomTable<C> {
    fn default() -> Self {
        Self {
            rooms: HashMap::new(),
        }
    }
}

impl<C> RoomTable<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rooms(rooms: impl IntoIterator<Item = Room<C>>) -> Self {
        Self {
            rooms: rooms
                .into_iter()
                .map(|room| (room.code.clone(), room))
                .collect(),
        }
    }

    pub fn get(&self, code: &RoomCode) -> Option<&Room<C>> {
        self.rooms.get(code)
    }

    pub fn get_mut(&mut self, code: &RoomCode) -> Option<&mut Room<C>> {
        self.rooms.get_mut(code)
    }

    pub fn contains(&self, code: &RoomCode) -> bool {
        self.rooms.contains_key(code)
    }

    pub fn insert(&mut self, room: Room<C>) {
        self.rooms.insert(room.code.clone(), room);
    }

    pub fn remove(&mut self, code: &RoomCode) -> Option<Room<C>> {
        self.rooms.remove(code)
    }

    pub fn codes(&self) -> Vec<RoomCode> {
        self.rooms.keys().cloned().collect()
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room<C>> {
        self.rooms.values()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(c: char) -> SecretId {
        SecretId::parse(&c.to_string().repeat(32)).unwrap()
    }

    fn make_room() -> Room<()> {
        let code = RoomCode::parse("482193").unwrap();
        Room::new(code, Peer::new(secret('a'), 10, ()), 10)
    }

    #[test]
    fn test_room_creation() {
        let room = make_room();
        assert_eq!(room.code.as_str(), "482193");
        assert!(!room.has_joiner());
        assert_eq!(room.created_at, 10);
        assert_eq!(room.updated_at, 10);
    }

    #[test]
    fn test_role_resolution() {
        let mut room = make_room();
        assert_eq!(room.role_of(&secret('a')), Some(Role::Initiator));
        assert_eq!(room.role_of(&secret('b')), None);

        room.joiner = Some(Peer::new(secret('b'), 12, ()));
        assert_eq!(room.role_of(&secret('b')), Some(Role::Joiner));
        assert_eq!(room.role_of(&secret('c')), None);
    }

    #[test]
    fn test_touch() {
        let mut room = make_room();
        room.joiner = Some(Peer::new(secret('b'), 12, ()));

        room.touch(Role::Joiner, 50);
        assert_eq!(room.joiner.as_ref().unwrap().last_seen_at, 50);
        assert_eq!(room.initiator.last_seen_at, 10);
        assert_eq!(room.updated_at, 50);
        assert_eq!(room.idle_for(80), 30);
        assert_eq!(room.age(80), 70);
    }

    #[test]
    fn test_peer_staleness() {
        let peer = Peer::new(secret('a'), 100, ());
        assert!(!peer.is_stale(190, 90));
        assert!(peer.is_stale(191, 90));
        // Clock going backwards never marks a peer stale
        assert!(!peer.is_stale(50, 90));
    }

    #[test]
    fn test_message_kind_parse() {
        assert_eq!(MessageKind::parse_signal("offer"), Ok(MessageKind::Offer));
        assert_eq!(
            MessageKind::parse_signal("ice-candidate"),
            Ok(MessageKind::IceCandidate)
        );
        assert_eq!(
            MessageKind::parse_signal("peer-disconnected"),
            Err(SignalError::InvalidKind)
        );
        assert!(!MessageKind::JoinerConnected.is_client_signal());
    }

    #[test]
    fn test_signal_serialization() {
        let signal = Signal::new(
            MessageKind::IceCandidate,
            serde_json::json!({"candidate": "c"}),
            42,
        )
        .unwrap();
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["kind"], "ice-candidate");
        assert_eq!(json["enqueuedAt"], 42);
        assert_eq!(json["payload"]["candidate"], "c");
        assert_eq!(json["id"].as_str().unwrap().len(), 16);
    }

    #[test]
    fn test_payload_kept_verbatim() {
        let text = r#"{"z":1,"a":123456789012345678901234567890}"#;
        let signal = Signal::new(MessageKind::Offer, Payload::from_json(text).unwrap(), 7).unwrap();

        let stored = serde_json::to_string(&signal).unwrap();
        assert!(stored.contains(text));

        let restored: Signal = serde_json::from_str(&stored).unwrap();
        assert_eq!(restored.payload.get(), text);
        assert_eq!(restored, signal);
    }

    #[test]
    fn test_payload_defaults_to_null() {
        assert!(Payload::default().is_null());
        assert!(Payload::from_json("{oops").is_err());
        assert_eq!(Payload::from(serde_json::json!({"n": 1})).value()["n"], 1);
    }

    #[test]
    fn test_table() {
        let mut table = RoomTable::new();
        table.insert(make_room());
        let code = RoomCode::parse("482193").unwrap();
        assert!(table.contains(&code));
        assert_eq!(table.len(), 1);
        assert!(table.remove(&code).is_some());
        assert!(table.is_empty());
    }
}
