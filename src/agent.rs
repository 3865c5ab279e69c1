//! The storyteller agent hook: an optional DM-privileged outbound channel.
//!
//! A room may have one hook attached. The actor pushes DM-projected events
//! into the hook's channel with `try_send`; if the agent (or the LLM behind
//! it) is slow, notifications are dropped and counted, never awaited. The
//! agent talks back exclusively by submitting commands through the normal
//! command path with the DM's identity.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::engine::EventRecord;
use crate::metrics::ServerMetrics;
use crate::projection::{project_event, Viewer};
use crate::protocol::{ProjectedEvent, RoomId, UserId};

/// Queue depth for agent notifications. Agents that fall further behind
/// than this resync from the log like any other client.
const AGENT_QUEUE_DEPTH: usize = 256;

/// One batch of DM-projected events for the external storyteller.
#[derive(Debug, Clone)]
pub struct AgentNotification {
    pub room_id: RoomId,
    pub events: Vec<ProjectedEvent>,
}

struct Hook {
    dm_user_id: UserId,
    tx: mpsc::Sender<AgentNotification>,
}

/// Registry of attached agent hooks, one per room at most.
pub struct AgentHooks {
    hooks: DashMap<RoomId, Hook>,
    metrics: Arc<ServerMetrics>,
}

impl AgentHooks {
    pub fn new(metrics: Arc<ServerMetrics>) -> Self {
        Self {
            hooks: DashMap::new(),
            metrics,
        }
    }

    /// Attach a hook for a room, replacing any previous one. Returns the
    /// receiving end for the agent task.
    pub fn attach(&self, room_id: RoomId, dm_user_id: UserId) -> mpsc::Receiver<AgentNotification> {
        let (tx, rx) = mpsc::channel(AGENT_QUEUE_DEPTH);
        self.hooks.insert(room_id, Hook { dm_user_id, tx });
        rx
    }

    pub fn detach(&self, room_id: &RoomId) {
        self.hooks.remove(room_id);
    }

    pub fn is_attached(&self, room_id: &RoomId) -> bool {
        self.hooks.contains_key(room_id)
    }

    /// Forward a committed event batch. Never blocks; a full or closed
    /// channel drops the notification (and a closed one detaches the hook).
    pub fn notify(&self, room_id: &RoomId, records: &[Arc<EventRecord>]) {
        let Some(hook) = self.hooks.get(room_id) else {
            return;
        };
        let viewer = Viewer::dm(hook.dm_user_id);
        let events: Vec<ProjectedEvent> = records
            .iter()
            .filter_map(|record| project_event(record, &viewer))
            .collect();
        if events.is_empty() {
            return;
        }
        match hook.tx.try_send(AgentNotification {
            room_id: *room_id,
            events,
        }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.increment_agent_notifications_dropped();
                tracing::warn!(%room_id, "agent hook backlogged; dropping notification");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                drop(hook);
                self.hooks.remove(room_id);
                tracing::info!(%room_id, "agent hook channel closed; detaching");
            }
        }
    }
}
