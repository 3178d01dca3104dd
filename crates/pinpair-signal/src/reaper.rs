//! Stale room reaping
//!
//! Rules, applied per room in order:
//! 1. No joiner and older than the idle threshold: destroy.
//! 2. Initiator silent past the liveness threshold: destroy.
//! 3. Joiner silent past the liveness threshold: clear the joiner, notify
//!    the initiator.
//! 4. No joiner and not updated within the idle threshold: destroy.
//!
//! Rules 2 and 3 only apply when the policy carries a liveness threshold;
//! the push binding learns about departures from connection close instead.

use tracing::info;

use pinpair_core::RoomCode;

use crate::controller::{notify, RoomController};
use crate::delivery::Delivery;
use crate::room::{MessageKind, Peer, Role, Room};

/// Why a room was destroyed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpiryReason {
    /// Never (or no longer) joined and past the idle threshold since creation
    Unjoined,
    /// The initiator stopped making requests
    InitiatorStale,
    /// Empty and untouched past the idle threshold
    Idle,
}

/// Outcome of a sweep for one room
#[derive(Debug)]
pub enum Reaped<C> {
    RoomExpired {
        code: RoomCode,
        room: Room<C>,
        reason: ExpiryReason,
    },
    JoinerExpired {
        code: RoomCode,
        joiner: Peer<C>,
    },
}

enum Verdict {
    Keep,
    Destroy(ExpiryReason),
    ClearJoiner,
}

fn verdict<C>(room: &Room<C>, now: u64, idle_secs: u64, stale_secs: Option<u64>) -> Verdict {
    if !room.has_joiner() && room.age(now) > idle_secs {
        return Verdict::Destroy(ExpiryReason::Unjoined);
    }

    if let Some(stale_secs) = stale_secs {
        if room.initiator.is_stale(now, stale_secs) {
            return Verdict::Destroy(ExpiryReason::InitiatorStale);
        }
    }

    match &room.joiner {
        Some(joiner) => match stale_secs {
            Some(stale_secs) if joiner.is_stale(now, stale_secs) => Verdict::ClearJoiner,
            _ => Verdict::Keep,
        },
        None if room.idle_for(now) > idle_secs => Verdict::Destroy(ExpiryReason::Idle),
        None => Verdict::Keep,
    }
}

impl<C: Delivery> RoomController<'_, C> {
    /// Sweep every live room, returning what was removed
    pub fn sweep(&mut self) -> Vec<Reaped<C>> {
        let now = self.now;
        let idle_secs = self.policy.room_idle_secs;
        let stale_secs = self.policy.peer_stale_secs;
        let mut reaped = Vec::new();

        for code in self.table.codes() {
            let Some(room) = self.table.get(&code) else {
                continue;
            };

            match verdict(room, now, idle_secs, stale_secs) {
                Verdict::Keep => {}
                Verdict::Destroy(reason) => {
                    if let Some(room) = self.table.remove(&code) {
                        info!("Room {} removed ({:?})", code, reason);
                        reaped.push(Reaped::RoomExpired { code, room, reason });
                    }
                }
                Verdict::ClearJoiner => {
                    let Some(room) = self.table.get_mut(&code) else {
                        continue;
                    };
                    if let Some(joiner) = room.joiner.take() {
                        room.updated_at = now;
                        notify(room, Role::Initiator, MessageKind::PeerDisconnected, now);
                        info!("Joiner in room {} timed out", code);
                        reaped.push(Reaped::JoinerExpired { code, joiner });
                    }
                }
            }
        }

        reaped
    }
}
