//! In-memory storage backend. Per-room slots behind an async mutex keep
//! commits atomic per room without any cross-room contention.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{DedupKey, DedupRecord, Snapshot, Storage, StorageError};
use crate::engine::EventRecord;
use crate::protocol::{EventId, RoomId, RoomMeta, RoomStatus, Seq, UserId};

/// Snapshots retained per room for corruption fallback.
const SNAPSHOT_HISTORY: usize = 2;

#[derive(Debug)]
struct RoomSlot {
    meta: RoomMeta,
    events: Vec<EventRecord>,
    next_seq: Seq,
    dedup: HashMap<(UserId, String, String), DedupRecord>,
    snapshots: VecDeque<Snapshot>,
    ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// In-memory [`Storage`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    rooms: DashMap<RoomId, Arc<Mutex<RoomSlot>>>,
    event_ids: DashSet<EventId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, room_id: &RoomId) -> Result<Arc<Mutex<RoomSlot>>, StorageError> {
        self.rooms
            .get(room_id)
            .map(|entry| entry.value().clone())
            .ok_or(StorageError::RoomNotFound)
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn create_room(&self, meta: RoomMeta) -> Result<(), StorageError> {
        use dashmap::mapref::entry::Entry;
        match self.rooms.entry(meta.id) {
            Entry::Occupied(_) => Err(StorageError::RoomExists),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Mutex::new(RoomSlot {
                    meta,
                    events: Vec::new(),
                    next_seq: 1,
                    dedup: HashMap::new(),
                    snapshots: VecDeque::new(),
                    ended_at: None,
                })));
                Ok(())
            }
        }
    }

    async fn room_meta(&self, room_id: &RoomId) -> Result<Option<RoomMeta>, StorageError> {
        match self.rooms.get(room_id) {
            Some(entry) => {
                let slot = entry.value().clone();
                drop(entry);
                let slot = slot.lock().await;
                Ok(Some(slot.meta.clone()))
            }
            None => Ok(None),
        }
    }

    async fn set_room_status(
        &self,
        room_id: &RoomId,
        status: RoomStatus,
    ) -> Result<(), StorageError> {
        let slot = self.slot(room_id)?;
        let mut slot = slot.lock().await;
        slot.meta.status = status;
        if status == RoomStatus::Ended && slot.ended_at.is_none() {
            slot.ended_at = Some(chrono::Utc::now());
        }
        Ok(())
    }

    async fn list_rooms(&self) -> Result<Vec<RoomMeta>, StorageError> {
        let slots: Vec<Arc<Mutex<RoomSlot>>> = self
            .rooms
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let mut metas = Vec::with_capacity(slots.len());
        for slot in slots {
            metas.push(slot.lock().await.meta.clone());
        }
        metas.sort_by_key(|m| m.created_at);
        Ok(metas)
    }

    async fn commit(
        &self,
        room_id: &RoomId,
        expected_first_seq: Seq,
        events: &[EventRecord],
        dedup: DedupRecord,
    ) -> Result<(), StorageError> {
        let slot = self.slot(room_id)?;
        let mut slot = slot.lock().await;

        if slot.next_seq != expected_first_seq {
            return Err(StorageError::SequenceConflict {
                expected: expected_first_seq,
                found: slot.next_seq,
            });
        }
        for (i, event) in events.iter().enumerate() {
            let want = expected_first_seq + i as Seq;
            if event.seq != want {
                return Err(StorageError::SequenceConflict {
                    expected: want,
                    found: event.seq,
                });
            }
            if self.event_ids.contains(&event.event_id) {
                return Err(StorageError::DuplicateEventId);
            }
        }
        let dedup_key = (
            dedup.key.actor_user_id,
            dedup.key.idempotency_key.clone(),
            dedup.key.command_type.clone(),
        );
        if slot.dedup.contains_key(&dedup_key) {
            return Err(StorageError::DuplicateCommand);
        }

        for event in events {
            self.event_ids.insert(event.event_id);
            slot.events.push(event.clone());
        }
        slot.next_seq = expected_first_seq + events.len() as Seq;
        slot.dedup.insert(dedup_key, dedup);
        Ok(())
    }

    async fn record_rejection(&self, dedup: DedupRecord) -> Result<(), StorageError> {
        let slot = self.slot(&dedup.key.room_id)?;
        let mut slot = slot.lock().await;
        let key = (
            dedup.key.actor_user_id,
            dedup.key.idempotency_key.clone(),
            dedup.key.command_type.clone(),
        );
        slot.dedup.entry(key).or_insert(dedup);
        Ok(())
    }

    async fn dedup_lookup(&self, key: &DedupKey) -> Result<Option<DedupRecord>, StorageError> {
        let slot = self.slot(&key.room_id)?;
        let slot = slot.lock().await;
        Ok(slot
            .dedup
            .get(&(
                key.actor_user_id,
                key.idempotency_key.clone(),
                key.command_type.clone(),
            ))
            .cloned())
    }

    async fn events_after(
        &self,
        room_id: &RoomId,
        after_seq: Seq,
        limit: usize,
    ) -> Result<Vec<EventRecord>, StorageError> {
        let slot = self.slot(room_id)?;
        let slot = slot.lock().await;
        // Events are stored densely in seq order; seq n sits at index n-1.
        let start = (after_seq as usize).min(slot.events.len());
        let tail = &slot.events[start..];
        let take = if limit == 0 { tail.len() } else { limit.min(tail.len()) };
        Ok(tail[..take].to_vec())
    }

    async fn last_seq(&self, room_id: &RoomId) -> Result<Seq, StorageError> {
        let slot = self.slot(room_id)?;
        let slot = slot.lock().await;
        Ok(slot.next_seq - 1)
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), StorageError> {
        let slot = self.slot(&snapshot.room_id)?;
        let mut slot = slot.lock().await;
        slot.snapshots.retain(|s| s.last_seq != snapshot.last_seq);
        slot.snapshots.push_back(snapshot);
        while slot.snapshots.len() > SNAPSHOT_HISTORY {
            slot.snapshots.pop_front();
        }
        Ok(())
    }

    async fn latest_snapshots(
        &self,
        room_id: &RoomId,
        limit: usize,
    ) -> Result<Vec<Snapshot>, StorageError> {
        let slot = self.slot(room_id)?;
        let slot = slot.lock().await;
        let mut snapshots: Vec<Snapshot> = slot.snapshots.iter().cloned().collect();
        snapshots.sort_by(|a, b| b.last_seq.cmp(&a.last_seq));
        snapshots.truncate(limit);
        Ok(snapshots)
    }

    async fn sweep_ended_rooms(&self, retention: chrono::Duration) -> Result<usize, StorageError> {
        let cutoff = chrono::Utc::now() - retention;
        // Snapshot the slots first; locking while iterating the map would
        // pin a shard across an await.
        let slots: Vec<(RoomId, Arc<Mutex<RoomSlot>>)> = self
            .rooms
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        let mut expired: Vec<RoomId> = Vec::new();
        for (room_id, slot) in slots {
            let slot = slot.lock().await;
            if let Some(ended_at) = slot.ended_at {
                if ended_at < cutoff {
                    expired.push(room_id);
                }
            }
        }
        for room_id in &expired {
            if let Some((_, slot)) = self.rooms.remove(room_id) {
                let slot = slot.lock().await;
                for event in &slot.events {
                    self.event_ids.remove(&event.event_id);
                }
            }
        }
        Ok(expired.len())
    }

    async fn health_check(&self) -> bool {
        true
    }
}
