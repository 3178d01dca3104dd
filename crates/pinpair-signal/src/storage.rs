//! Room table storage for the polling binding
//!
//! Every request runs inside [`RoomStore::transact`]: one exclusive critical
//! section that loads the whole table, lets the caller sweep and mutate it,
//! and writes it back. There is no per-room locking.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, Connection, TransactionBehavior};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use pinpair_core::SignalError;

use crate::delivery::Mailbox;
use crate::room::{Room, RoomTable};

/// Authoritative table of polling rooms
pub trait RoomStore: Send + Sync {
    /// Run `f` against the whole table under exclusive access, then persist it
    ///
    /// The table is written back even when `f` reports an operation failure,
    /// so sweep results made before the failure stick.
    fn transact<R, F>(&self, f: F) -> Result<R, StorageError>
    where
        F: FnOnce(&mut RoomTable<Mailbox>) -> R;
}

/// Process-local store
#[derive(Default)]
pub struct MemoryStore {
    table: parking_lot::Mutex<RoomTable<Mailbox>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoomStore for MemoryStore {
    fn transact<R, F>(&self, f: F) -> Result<R, StorageError>
    where
        F: FnOnce(&mut RoomTable<Mailbox>) -> R,
    {
        let mut table = self.table.lock();
        Ok(f(&mut table))
    }
}

/// SQLite store; several broker processes may share one database file
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;

        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS rooms (
                code TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;

        info!("Storage schema initialized");
        Ok(())
    }

    /// Number of stored rooms
    pub fn room_count(&self) -> Result<usize, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM rooms", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl RoomStore for SqliteStore {
    fn transact<R, F>(&self, f: F) -> Result<R, StorageError>
    where
        F: FnOnce(&mut RoomTable<Mailbox>) -> R,
    {
        let mut conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        // IMMEDIATE takes the database write lock up front, so concurrent
        // processes serialize on the whole table
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut table = load_table(&tx)?;
        let result = f(&mut table);
        save_table(&tx, &table)?;

        tx.commit()?;
        Ok(result)
    }
}

fn load_table(conn: &Connection) -> Result<RoomTable<Mailbox>, StorageError> {
    let mut stmt = conn.prepare("SELECT code, state FROM rooms")?;
    let rows = stmt.query_map([], |row| {
        let code: String = row.get(0)?;
        let state: String = row.get(1)?;
        Ok((code, state))
    })?;

    let mut rooms = Vec::new();
    for row in rows {
        let (code, state) = row?;
        match serde_json::from_str::<Room<Mailbox>>(&state) {
            Ok(room) => rooms.push(room),
            Err(e) => warn!("Dropping undecodable room {}: {}", code, e),
        }
    }

    Ok(RoomTable::from_rooms(rooms))
}

fn save_table(conn: &Connection, table: &RoomTable<Mailbox>) -> Result<(), StorageError> {
    conn.execute("DELETE FROM rooms", [])?;

    let mut stmt =
        conn.prepare("INSERT INTO rooms (code, state, updated_at) VALUES (?1, ?2, ?3)")?;
    for room in table.rooms() {
        let state = serde_json::to_string(room)?;
        stmt.execute(params![room.code.as_str(), state, room.updated_at as i64])?;
    }

    debug!("Persisted {} rooms", table.len());
    Ok(())
}

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Mutex lock was poisoned (indicates a panic occurred while holding the lock)
    #[error("Lock poisoned: a thread panicked while holding the lock")]
    LockPoisoned,
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        error!("Database error: {:?}", e);
        StorageError::Database(e)
    }
}

impl From<StorageError> for SignalError {
    fn from(e: StorageError) -> Self {
        SignalError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::RoomController;
    use crate::room::{MessageKind, Signal};
    use pinpair_core::{Policy, RoomCode, SecretId};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    const SENDERS: usize = 4;
    const PER_SENDER: usize = 50;

    fn create_and_join<S: RoomStore>(store: &S) -> (RoomCode, SecretId, SecretId) {
        let policy = Policy::default();
        store
            .transact(|table| {
                let mut rooms = RoomController::new(table, &policy, 100);
                let created = rooms.create_room(Mailbox::default()).unwrap();
                let joiner = rooms.join_room(&created.code, Mailbox::default()).unwrap();
                (created.code, created.secret_id, joiner)
            })
            .unwrap()
    }

    /// Senders on `send_store` race a drainer on `drain_store`; returns
    /// every relayed signal the drainer saw
    fn relay_while_draining<A: RoomStore, B: RoomStore>(send_store: &A, drain_store: &B) -> Vec<Signal> {
        let (code, initiator, joiner) = create_and_join(send_store);
        let policy = Policy::default();
        let finished = AtomicUsize::new(0);

        thread::scope(|scope| {
            for sender in 0..SENDERS {
                let (code, joiner, policy, finished) = (&code, &joiner, &policy, &finished);
                scope.spawn(move || {
                    for n in 0..PER_SENDER {
                        send_store
                            .transact(|table| {
                                RoomController::new(table, policy, 100).send_signal(
                                    code,
                                    joiner,
                                    MessageKind::IceCandidate,
                                    json!({ "sender": sender, "n": n }),
                                )
                            })
                            .unwrap()
                            .unwrap();
                    }
                    finished.fetch_add(1, Ordering::SeqCst);
                });
            }

            let drainer = scope.spawn(|| {
                let mut seen = Vec::new();
                loop {
                    // Read before draining so the last pass sees every send
                    let done = finished.load(Ordering::SeqCst) == SENDERS;
                    let batch = drain_store
                        .transact(|table| RoomController::new(table, &policy, 100).drain(&code, &initiator))
                        .unwrap()
                        .unwrap();
                    seen.extend(batch.into_iter().filter(|s| s.kind == MessageKind::IceCandidate));
                    if done {
                        break;
                    }
                }
                seen
            });
            drainer.join().unwrap()
        })
    }

    fn assert_exactly_once(seen: &[Signal]) {
        assert_eq!(seen.len(), SENDERS * PER_SENDER);

        let ids: HashSet<&str> = seen.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids.len(), seen.len());

        let sent: HashSet<(u64, u64)> = seen
            .iter()
            .map(|s| {
                let value = s.payload.value();
                (value["sender"].as_u64().unwrap(), value["n"].as_u64().unwrap())
            })
            .collect();
        assert_eq!(sent.len(), SENDERS * PER_SENDER);

        // Each sender's own messages arrive in the order it sent them
        for sender in 0..SENDERS as u64 {
            let order: Vec<u64> = seen
                .iter()
                .map(|s| s.payload.value())
                .filter(|v| v["sender"] == sender)
                .map(|v| v["n"].as_u64().unwrap())
                .collect();
            assert!(order.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_memory_store_overlapping_drains() {
        let store = MemoryStore::new();
        let seen = relay_while_draining(&store, &store);
        assert_exactly_once(&seen);
    }

    #[test]
    fn test_sqlite_shared_file_overlapping_drains() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rooms.db");
        let senders = SqliteStore::open(&path).unwrap();
        let drainer = SqliteStore::open(&path).unwrap();

        let seen = relay_while_draining(&senders, &drainer);
        assert_exactly_once(&seen);
        assert_eq!(drainer.room_count().unwrap(), 1);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        let (code, initiator, _) = create_and_join(&store);

        let policy = Policy::default();
        let drained = store
            .transact(|table| RoomController::new(table, &policy, 101).drain(&code, &initiator))
            .unwrap()
            .unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].kind, MessageKind::JoinerConnected);
    }

    #[test]
    fn test_sqlite_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.room_count().unwrap(), 0);

        let (code, initiator, joiner) = create_and_join(&store);
        assert_eq!(store.room_count().unwrap(), 1);

        let policy = Policy::default();
        store
            .transact(|table| {
                let room = table.get(&code).unwrap();
                assert!(room.initiator.secret_id.matches(&initiator));
                assert!(room.joiner.as_ref().unwrap().secret_id.matches(&joiner));
                assert_eq!(room.initiator.channel.len(), 1);
            })
            .unwrap();

        // Drained state is persisted
        store
            .transact(|table| RoomController::new(table, &policy, 101).drain(&code, &initiator))
            .unwrap()
            .unwrap();
        let left = store
            .transact(|table| RoomController::new(table, &policy, 102).drain(&code, &initiator))
            .unwrap()
            .unwrap();
        assert!(left.is_empty());
    }

    #[test]
    fn test_sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rooms.db");

        let (code, initiator, _) = {
            let store = SqliteStore::open(&path).unwrap();
            create_and_join(&store)
        };

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.room_count().unwrap(), 1);
        let policy = Policy::default();
        let drained = store
            .transact(|table| RoomController::new(table, &policy, 101).drain(&code, &initiator))
            .unwrap()
            .unwrap();
        assert_eq!(drained[0].kind, MessageKind::JoinerConnected);
    }

    #[test]
    fn test_sqlite_removal_is_persisted() {
        let store = SqliteStore::in_memory().unwrap();
        let (code, initiator, _) = create_and_join(&store);
        let policy = Policy::default();

        store
            .transact(|table| {
                RoomController::new(table, &policy, 101).leave(&code, &initiator);
            })
            .unwrap();
        assert_eq!(store.room_count().unwrap(), 0);
    }

    #[test]
    fn test_sqlite_skips_corrupt_rows() {
        let store = SqliteStore::in_memory().unwrap();
        create_and_join(&store);
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO rooms (code, state, updated_at) VALUES ('123456', 'not json', 0)",
                [],
            )
            .unwrap();
        }

        let count = store.transact(|table| table.len()).unwrap();
        assert_eq!(count, 1);
        // The corrupt row was not written back
        assert_eq!(store.room_count().unwrap(), 1);
    }

    #[test]
    fn test_storage_error_maps_to_signal_error() {
        let err: SignalError = StorageError::LockPoisoned.into();
        assert_eq!(err.kind(), pinpair_core::ErrorKind::Storage);
    }
}
