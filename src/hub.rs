//! Per-room subscriber fan-out.
//!
//! Each connected session owns a bounded outbound queue. Publishing never
//! blocks the room actor: frames are projected per viewer and offered with
//! `try_send`; a full queue means the consumer is too slow and the session
//! is evicted on the spot (the client reconnects and resyncs via resume).

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::engine::EventRecord;
use crate::metrics::ServerMetrics;
use crate::projection::{project_event, Viewer};
use crate::protocol::{RoomId, ServerFrame};

/// Unique identifier for a hub session (one per WebSocket subscription).
pub type SessionId = Uuid;

/// A registered subscription, handed back to the connection task.
pub struct Subscription {
    pub session_id: SessionId,
    pub receiver: mpsc::Receiver<Arc<ServerFrame>>,
    /// Set when the hub dropped this session for falling behind.
    pub evicted: Arc<AtomicBool>,
}

struct SessionHandle {
    room_id: RoomId,
    viewer: Viewer,
    tx: mpsc::Sender<Arc<ServerFrame>>,
    evicted: Arc<AtomicBool>,
}

/// Fan-out registry for all rooms on this instance.
pub struct SubscriberHub {
    sessions: DashMap<SessionId, SessionHandle>,
    rooms: DashMap<RoomId, HashSet<SessionId>>,
    queue_depth: usize,
    metrics: Arc<ServerMetrics>,
}

impl SubscriberHub {
    pub fn new(queue_depth: usize, metrics: Arc<ServerMetrics>) -> Self {
        Self {
            sessions: DashMap::new(),
            rooms: DashMap::new(),
            queue_depth: queue_depth.max(1),
            metrics,
        }
    }

    /// Register a session for live events of a room.
    pub fn subscribe(&self, room_id: RoomId, viewer: Viewer) -> Subscription {
        let session_id = Uuid::new_v4();
        let (tx, receiver) = mpsc::channel(self.queue_depth);
        let evicted = Arc::new(AtomicBool::new(false));
        self.sessions.insert(
            session_id,
            SessionHandle {
                room_id,
                viewer,
                tx,
                evicted: evicted.clone(),
            },
        );
        self.rooms.entry(room_id).or_default().insert(session_id);
        self.metrics.increment_sessions_opened();
        Subscription {
            session_id,
            receiver,
            evicted,
        }
    }

    /// Remove a session (normal disconnect).
    pub fn unsubscribe(&self, session_id: &SessionId) {
        if let Some((_, handle)) = self.sessions.remove(session_id) {
            if let Some(mut room) = self.rooms.get_mut(&handle.room_id) {
                room.remove(session_id);
            }
            self.metrics.increment_sessions_closed();
        }
    }

    /// Publish a batch of events to every session of the room. Slow
    /// consumers are evicted rather than ever blocking the caller.
    pub fn publish(&self, room_id: &RoomId, records: &[Arc<EventRecord>]) {
        let Some(session_ids) = self
            .rooms
            .get(room_id)
            .map(|room| room.iter().copied().collect::<Vec<_>>())
        else {
            return;
        };

        let mut to_evict: Vec<SessionId> = Vec::new();
        for session_id in session_ids {
            let Some(handle) = self.sessions.get(&session_id) else {
                continue;
            };
            let mut delivered = 0u64;
            let mut full = false;
            for record in records {
                let Some(event) = project_event(record, &handle.viewer) else {
                    continue;
                };
                match handle.tx.try_send(Arc::new(ServerFrame::Event { event })) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        full = true;
                        break;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        full = true;
                        break;
                    }
                }
            }
            self.metrics.add_events_delivered(delivered);
            if full {
                handle.evicted.store(true, Ordering::Release);
                to_evict.push(session_id);
            }
        }

        for session_id in to_evict {
            tracing::warn!(%session_id, %room_id, "evicting slow subscriber");
            self.metrics.increment_sessions_evicted_slow();
            // Dropping the sender wakes the connection task, which closes
            // the socket with a "too slow" reason.
            self.unsubscribe(&session_id);
        }
    }

    /// Drop every session of a room (actor tainted or unloading with
    /// prejudice). Connection tasks observe the closed channel.
    pub fn evict_room(&self, room_id: &RoomId) {
        let Some((_, session_ids)) = self.rooms.remove(room_id) else {
            return;
        };
        for session_id in session_ids {
            if let Some((_, handle)) = self.sessions.remove(&session_id) {
                handle.evicted.store(true, Ordering::Release);
                self.metrics.increment_sessions_closed();
            }
        }
    }

    pub fn session_count(&self, room_id: &RoomId) -> usize {
        self.rooms.get(room_id).map(|r| r.len()).unwrap_or(0)
    }

    /// Whether any session is watching the room (actor idle-unload guard).
    pub fn has_subscribers(&self, room_id: &RoomId) -> bool {
        self.session_count(room_id) > 0
    }
}
