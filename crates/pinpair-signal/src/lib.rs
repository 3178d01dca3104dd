//! Pinpair Signal Broker
//!
//! Rendezvous broker that pairs two peers through a short numeric room code
//! and relays the offer/answer/ICE messages they need to open a direct
//! connection. The broker never touches the media itself.
//!
//! # Protocol
//!
//! 1. Initiator creates a room and receives a 6-digit code plus a secret id
//! 2. Joiner enters the code and receives its own secret id
//! 3. Broker relays signals between the two roles
//! 4. Either side leaves, or the room is reaped once it goes stale
//!
//! # Bindings
//!
//! - [`poll`]: store-and-forward over `POST /api`; each peer drains a
//!   bounded mailbox
//! - [`push`]: WebSocket; signals go straight to the open connection

pub mod controller;
pub mod delivery;
pub mod messages;
pub mod poll;
pub mod push;
pub mod reaper;
pub mod room;
pub mod storage;

pub use controller::{Created, Departure, RoomController};
pub use delivery::{ConnId, Delivery, Mailbox, PushHandle};
pub use messages::{ApiRequest, ApiResponse, ClientFrame, ServerFrame};
pub use poll::{router, Call, PollBroker, PollServer};
pub use push::{HubEvent, HubStats, PushHub, PushServer};
pub use reaper::{ExpiryReason, Reaped};
pub use room::{MessageKind, Payload, Role, Room, RoomTable, Signal};
pub use storage::{MemoryStore, RoomStore, SqliteStore, StorageError};

