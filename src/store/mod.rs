//! Persistence seam: the event log, dedup records, sequence allocation,
//! and snapshots, behind an async trait so a SQL backend can slot in
//! without touching the engine. The in-memory backend ships in
//! [`memory`].

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::EventRecord;
use crate::protocol::{CommandId, RoomId, RoomMeta, RoomStatus, Seq, UserId};

pub use memory::MemoryStore;

/// Storage failures. `SequenceConflict` and `DuplicateCommand` are
/// integrity signals, not transient faults; the actor does not retry them.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("room not found")]
    RoomNotFound,
    #[error("room already exists")]
    RoomExists,
    #[error("sequence conflict: expected next seq {expected}, store has {found}")]
    SequenceConflict { expected: Seq, found: Seq },
    #[error("duplicate command for dedup key")]
    DuplicateCommand,
    #[error("duplicate event id")]
    DuplicateEventId,
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StorageError {
    /// Transient faults are worth the actor's bounded retries; integrity
    /// conflicts are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

/// Dedup key: all four components are required.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub room_id: RoomId,
    pub actor_user_id: UserId,
    pub idempotency_key: String,
    pub command_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupStatus {
    Applied,
    Rejected,
}

/// Memoized command outcome. `result_json` is returned verbatim to
/// duplicate submissions, so retries observe a byte-identical result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupRecord {
    pub key: DedupKey,
    pub command_id: CommandId,
    pub status: DedupStatus,
    pub result_json: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Serialized reducer state at a known seq, content-addressed by
/// `(room_id, last_seq)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub room_id: RoomId,
    pub last_seq: Seq,
    pub state_json: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Storage abstraction for the per-room engine.
///
/// All writes are short transactions keyed by room; reads never block
/// other rooms.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create the durable room record. Fails if the room exists.
    async fn create_room(&self, meta: RoomMeta) -> Result<(), StorageError>;

    async fn room_meta(&self, room_id: &RoomId) -> Result<Option<RoomMeta>, StorageError>;

    async fn set_room_status(
        &self,
        room_id: &RoomId,
        status: RoomStatus,
    ) -> Result<(), StorageError>;

    async fn list_rooms(&self) -> Result<Vec<RoomMeta>, StorageError>;

    /// Atomically append a command's events, write its `applied` dedup
    /// record, and advance the sequence allocator. The first event must
    /// carry `expected_first_seq`; on any failure nothing is written.
    async fn commit(
        &self,
        room_id: &RoomId,
        expected_first_seq: Seq,
        events: &[EventRecord],
        dedup: DedupRecord,
    ) -> Result<(), StorageError>;

    /// Record a `rejected` outcome. First writer wins: if the key already
    /// has a record, the stored one is kept.
    async fn record_rejection(&self, dedup: DedupRecord) -> Result<(), StorageError>;

    async fn dedup_lookup(&self, key: &DedupKey) -> Result<Option<DedupRecord>, StorageError>;

    /// Events with `seq > after_seq`, in seq order, at most `limit`
    /// (0 means no limit).
    async fn events_after(
        &self,
        room_id: &RoomId,
        after_seq: Seq,
        limit: usize,
    ) -> Result<Vec<EventRecord>, StorageError>;

    /// Highest seq written for the room (0 when empty).
    async fn last_seq(&self, room_id: &RoomId) -> Result<Seq, StorageError>;

    /// Persist a snapshot. Last-writer-wins per `(room, last_seq)`; the
    /// store retains the newest few for corruption fallback.
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), StorageError>;

    /// Newest snapshots first, at most `limit`.
    async fn latest_snapshots(
        &self,
        room_id: &RoomId,
        limit: usize,
    ) -> Result<Vec<Snapshot>, StorageError>;

    /// Drop events, dedup records, and snapshots of rooms that ended
    /// longer than `retention` ago. Returns how many rooms were removed.
    async fn sweep_ended_rooms(&self, retention: chrono::Duration) -> Result<usize, StorageError>;

    async fn health_check(&self) -> bool;
}

/// Open a storage backend for the configured DSN. Only the in-memory
/// backend ships; the DSN is the seam where a SQL backend would hang.
pub fn open(db_dsn: &str) -> Result<std::sync::Arc<dyn Storage>, StorageError> {
    match db_dsn {
        "memory" | "" => Ok(std::sync::Arc::new(MemoryStore::new())),
        other => Err(StorageError::Backend(format!(
            "unsupported db_dsn '{other}' (only 'memory' is built in)"
        ))),
    }
}
