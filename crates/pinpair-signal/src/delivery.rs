//! Delivery strategies: how a signal reaches the target peer
//!
//! - [`Mailbox`]: bounded store-and-forward queue, drained by polling
//! - [`PushHandle`]: immediate hand-off to a live WebSocket connection

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use pinpair_core::{RoomCode, SignalError, MAX_QUEUE_LEN};

use crate::messages::ServerFrame;
use crate::room::Signal;

/// Hands a signal to the peer owning this channel
pub trait Delivery {
    fn deliver(&mut self, code: &RoomCode, signal: Signal) -> Result<(), SignalError>;
}

fn default_capacity() -> usize {
    MAX_QUEUE_LEN
}

/// Bounded FIFO of signals awaiting a poll
///
/// When full, the oldest entries are dropped to make room.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mailbox {
    #[serde(default = "default_capacity")]
    capacity: usize,
    #[serde(default)]
    messages: VecDeque<Signal>,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new(MAX_QUEUE_LEN)
    }
}

impl Mailbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            messages: VecDeque::new(),
        }
    }

    pub fn push(&mut self, signal: Signal) {
        self.messages.push_back(signal);
        while self.messages.len() > self.capacity {
            self.messages.pop_front();
        }
    }

    /// Take every queued signal in enqueue order, leaving the mailbox empty
    pub fn drain(&mut self) -> Vec<Signal> {
        self.messages.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signal> {
        self.messages.iter()
    }
}

impl Delivery for Mailbox {
    fn deliver(&mut self, _code: &RoomCode, signal: Signal) -> Result<(), SignalError> {
        self.push(signal);
        Ok(())
    }
}

/// Identifier of one WebSocket connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outbound side of a live connection
#[derive(Clone, Debug)]
pub struct PushHandle {
    pub conn: ConnId,
    tx: UnboundedSender<ServerFrame>,
}

impl PushHandle {
    pub fn new(conn: ConnId, tx: UnboundedSender<ServerFrame>) -> Self {
        Self { conn, tx }
    }

    /// Send a frame outside the signal path (errors, acknowledgements)
    pub fn send(&self, frame: ServerFrame) -> Result<(), SignalError> {
        self.tx.send(frame).map_err(|_| SignalError::PeerUnavailable)
    }
}

impl Delivery for PushHandle {
    fn deliver(&mut self, code: &RoomCode, signal: Signal) -> Result<(), SignalError> {
        self.send(ServerFrame::from_signal(code, signal))
    }
}
