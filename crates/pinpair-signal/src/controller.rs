//! Room state machine
//!
//! [`RoomController`] is a short-lived view over a [`RoomTable`] for one
//! point in time. The polling binding builds one inside each storage
//! transaction; the push hub builds one per event. Both share every rule
//! below and differ only in the delivery channel `C`.

use tracing::{debug, info, warn};

use pinpair_core::{Policy, RoomCode, SecretId, SignalError};

use crate::delivery::{Delivery, Mailbox};
use crate::room::{MessageKind, Payload, Peer, Role, Room, RoomTable, Signal};

/// Credentials handed to a newly created initiator
#[derive(Clone, Debug)]
pub struct Created {
    pub code: RoomCode,
    pub secret_id: SecretId,
}

/// What a leave did to the room
#[derive(Debug)]
pub enum Departure<C> {
    /// Unknown room or unknown peer
    Noop,
    /// The initiator left; the room is gone
    RoomClosed {
        code: RoomCode,
        joiner: Option<Peer<C>>,
    },
    /// The joiner left; the room is empty and re-joinable
    JoinerLeft { code: RoomCode, joiner: Peer<C> },
}

pub struct RoomController<'a, C> {
    pub(crate) table: &'a mut RoomTable<C>,
    pub(crate) policy: &'a Policy,
    pub(crate) now: u64,
}

impl<'a, C: Delivery> RoomController<'a, C> {
    pub fn new(table: &'a mut RoomTable<C>, policy: &'a Policy, now: u64) -> Self {
        Self { table, policy, now }
    }

    /// Create a room with the caller as initiator
    pub fn create_room(&mut self, channel: C) -> Result<Created, SignalError> {
        for _ in 0..self.policy.pin_attempts {
            let code = RoomCode::generate()?;
            if self.table.contains(&code) {
                continue;
            }

            let secret_id = SecretId::generate()?;
            let initiator = Peer::new(secret_id.clone(), self.now, channel);
            self.table.insert(Room::new(code.clone(), initiator, self.now));

            info!("Room created: {}", code);
            return Ok(Created { code, secret_id });
        }

        warn!(
            "No free room code after {} attempts ({} rooms live)",
            self.policy.pin_attempts,
            self.table.len()
        );
        Err(SignalError::CodeSpaceExhausted)
    }

    /// Take the joiner slot of an existing room
    pub fn join_room(&mut self, code: &RoomCode, channel: C) -> Result<SecretId, SignalError> {
        let now = self.now;
        let room = self.table.get_mut(code).ok_or(SignalError::RoomNotFound)?;

        if room.has_joiner() {
            return Err(SignalError::RoomOccupied);
        }

        let secret_id = SecretId::generate()?;
        room.joiner = Some(Peer::new(secret_id.clone(), now, channel));
        room.updated_at = now;
        notify(room, Role::Initiator, MessageKind::JoinerConnected, now);

        info!("Joiner entered room {}", code);
        Ok(secret_id)
    }

    /// Relay a client signal to the opposite peer
    pub fn send_signal(
        &mut self,
        code: &RoomCode,
        secret_id: &SecretId,
        kind: MessageKind,
        payload: impl Into<Payload>,
    ) -> Result<(), SignalError> {
        if !kind.is_client_signal() {
            return Err(SignalError::InvalidKind);
        }

        let now = self.now;
        let room = self.table.get_mut(code).ok_or(SignalError::RoomNotFound)?;
        let role = room.role_of(secret_id).ok_or(SignalError::Unauthorized)?;
        let target = role.opposite();

        if room.peer(target).is_none() {
            return Err(SignalError::PeerUnavailable);
        }

        room.touch(role, now);
        let signal = Signal::new(kind, payload, now)?;
        let peer = room.peer_mut(target).ok_or(SignalError::PeerUnavailable)?;
        peer.channel.deliver(code, signal)?;

        debug!("Relayed {} in room {} to {:?}", kind.as_str(), code, target);
        Ok(())
    }

    /// Leave a room; unknown rooms and peers are a successful no-op
    pub fn leave(&mut self, code: &RoomCode, secret_id: &SecretId) -> Departure<C> {
        let now = self.now;
        let role = match self.table.get(code).and_then(|room| room.role_of(secret_id)) {
            Some(role) => role,
            None => return Departure::Noop,
        };

        match role {
            Role::Initiator => {
                let Some(mut room) = self.table.remove(code) else {
                    return Departure::Noop;
                };
                notify(&mut room, Role::Joiner, MessageKind::PeerDisconnected, now);
                info!("Room {} closed by initiator", code);
                Departure::RoomClosed {
                    code: code.clone(),
                    joiner: room.joiner.take(),
                }
            }
            Role::Joiner => {
                let Some(room) = self.table.get_mut(code) else {
                    return Departure::Noop;
                };
                let Some(joiner) = room.joiner.take() else {
                    return Departure::Noop;
                };
                room.updated_at = now;
                notify(room, Role::Initiator, MessageKind::PeerDisconnected, now);
                info!("Joiner left room {}", code);
                Departure::JoinerLeft {
                    code: code.clone(),
                    joiner,
                }
            }
        }
    }

    pub fn room_count(&self) -> usize {
        self.table.len()
    }
}

impl RoomController<'_, Mailbox> {
    /// Pop every signal queued for the caller, in enqueue order
    pub fn drain(
        &mut self,
        code: &RoomCode,
        secret_id: &SecretId,
    ) -> Result<Vec<Signal>, SignalError> {
        let now = self.now;
        let room = self.table.get_mut(code).ok_or(SignalError::RoomNotFound)?;
        let role = room.role_of(secret_id).ok_or(SignalError::Unauthorized)?;

        room.touch(role, now);
        let peer = room.peer_mut(role).ok_or(SignalError::Unauthorized)?;
        Ok(peer.channel.drain())
    }
}

/// Deliver a broker notification to `role` if present
///
/// Notifications are best-effort: a dead push connection is about to be
/// cleaned up by its own close event.
pub(crate) fn notify<C: Delivery>(room: &mut Room<C>, role: Role, kind: MessageKind, now: u64) {
    let code = room.code.clone();
    let Some(peer) = room.peer_mut(role) else {
        return;
    };
    let result = Signal::notice(kind, now).and_then(|signal| peer.channel.deliver(&code, signal));
    if let Err(e) = result {
        warn!("Failed to notify {:?} in room {}: {}", role, code, e);
    }
}
