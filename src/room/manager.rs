//! Room actor lifecycle: cold start from snapshot+replay, a registry of
//! live mailboxes, idle unloading, and graceful drain on shutdown.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::actor::{ActorConfig, ActorMessage, CommandRequest, ResyncInfo, RoomActor};
use crate::agent::AgentHooks;
use crate::engine::RoomState;
use crate::hub::SubscriberHub;
use crate::metrics::ServerMetrics;
use crate::protocol::{CommandEnvelope, CommandResult, ErrorReason, RoomId, UserId};
use crate::store::Storage;

/// Mailbox capacity per room actor.
const MAILBOX_DEPTH: usize = 64;

/// Why a submit could not produce a result.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("room not found")]
    NotFound,
    #[error("not a member of this room")]
    NotAMember,
    #[error("room actor unavailable: {0}")]
    Unavailable(String),
    #[error("storage failure: {0}")]
    Storage(#[from] crate::store::StorageError),
}

struct LiveRoom {
    tx: mpsc::Sender<ActorMessage>,
    task: JoinHandle<()>,
    last_activity: Instant,
}

/// Creates, caches, and retires one actor per room.
pub struct RoomManager {
    rooms: DashMap<RoomId, LiveRoom>,
    storage: Arc<dyn Storage>,
    hub: Arc<SubscriberHub>,
    agents: Arc<AgentHooks>,
    metrics: Arc<ServerMetrics>,
    actor_config: ActorConfig,
}

impl RoomManager {
    pub fn new(
        storage: Arc<dyn Storage>,
        hub: Arc<SubscriberHub>,
        agents: Arc<AgentHooks>,
        metrics: Arc<ServerMetrics>,
        actor_config: ActorConfig,
    ) -> Self {
        Self {
            rooms: DashMap::new(),
            storage,
            hub,
            agents,
            metrics,
            actor_config,
        }
    }

    /// Enqueue a command for a room, cold-starting its actor if needed.
    /// The returned receiver resolves to the command's result.
    pub async fn submit(
        &self,
        room_id: RoomId,
        actor_user_id: UserId,
        envelope: CommandEnvelope,
        deadline: Instant,
    ) -> Result<oneshot::Receiver<CommandResult>, RoomError> {
        let (reply, rx) = oneshot::channel();
        let request = ActorMessage::Command(Box::new(CommandRequest {
            envelope,
            actor_user_id,
            deadline,
            reply,
        }));
        self.send(room_id, request).await?;
        Ok(rx)
    }

    /// Ask the actor for membership, viewer, and a projected state.
    pub async fn resync(&self, room_id: RoomId, user_id: UserId) -> Result<ResyncInfo, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(room_id, ActorMessage::Resync { user_id, reply })
            .await?;
        rx.await
            .map_err(|_| RoomError::Unavailable("room actor stopped mid-request".to_string()))
    }

    async fn send(&self, room_id: RoomId, message: ActorMessage) -> Result<(), RoomError> {
        // One reload attempt: the first send can race an actor that just
        // drained or tainted; the second goes to a fresh cold start.
        let mut message = message;
        for _ in 0..2 {
            let tx = self.handle_for(room_id).await?;
            match tx.try_send(message) {
                Ok(()) => {
                    if let Some(mut live) = self.rooms.get_mut(&room_id) {
                        live.last_activity = Instant::now();
                    }
                    return Ok(());
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    return Err(RoomError::Unavailable("room mailbox is full".to_string()));
                }
                Err(mpsc::error::TrySendError::Closed(returned)) => {
                    self.rooms.remove(&room_id);
                    message = returned;
                }
            }
        }
        Err(RoomError::Unavailable(
            "room actor restarting; retry".to_string(),
        ))
    }

    async fn handle_for(&self, room_id: RoomId) -> Result<mpsc::Sender<ActorMessage>, RoomError> {
        if let Some(live) = self.rooms.get(&room_id) {
            return Ok(live.tx.clone());
        }

        let (state, next_seq) = self.load_state(room_id).await?;
        let (tx, mailbox) = mpsc::channel(MAILBOX_DEPTH);
        let actor = RoomActor::new(
            room_id,
            state,
            next_seq,
            self.storage.clone(),
            self.hub.clone(),
            self.agents.clone(),
            self.metrics.clone(),
            self.actor_config,
        );

        use dashmap::mapref::entry::Entry;
        match self.rooms.entry(room_id) {
            Entry::Occupied(entry) => {
                // Lost a cold-start race; use the winner's actor.
                Ok(entry.get().tx.clone())
            }
            Entry::Vacant(entry) => {
                let task = tokio::spawn(actor.run(mailbox));
                entry.insert(LiveRoom {
                    tx: tx.clone(),
                    task,
                    last_activity: Instant::now(),
                });
                self.metrics.increment_rooms_loaded();
                Ok(tx)
            }
        }
    }

    /// Cold start: newest readable snapshot, then replay the tail.
    async fn load_state(&self, room_id: RoomId) -> Result<(RoomState, u64), RoomError> {
        if self.storage.room_meta(&room_id).await?.is_none() {
            return Err(RoomError::NotFound);
        }

        let mut state = RoomState::empty(room_id);
        for snapshot in self.storage.latest_snapshots(&room_id, 2).await? {
            match serde_json::from_str::<RoomState>(&snapshot.state_json) {
                Ok(restored) if restored.last_applied_seq == snapshot.last_seq => {
                    state = restored;
                    break;
                }
                Ok(_) => {
                    tracing::warn!(
                        %room_id,
                        last_seq = snapshot.last_seq,
                        "snapshot seq mismatch; trying older snapshot"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        %room_id,
                        last_seq = snapshot.last_seq,
                        error = %err,
                        "corrupt snapshot; trying older snapshot"
                    );
                }
            }
        }

        let tail = self
            .storage
            .events_after(&room_id, state.last_applied_seq, 0)
            .await?;
        for record in &tail {
            state.apply(record);
        }

        let last_seq = self.storage.last_seq(&room_id).await?;
        if state.last_applied_seq != last_seq {
            return Err(RoomError::Unavailable(format!(
                "replay ended at seq {} but the log is at {last_seq}",
                state.last_applied_seq
            )));
        }
        Ok((state, last_seq + 1))
    }

    /// Unload actors idle past `idle_timeout` with no subscribers, and let
    /// the store GC rooms whose game ended more than `retention` ago.
    pub async fn sweep(&self, idle_timeout: Duration, retention: chrono::Duration) {
        let now = Instant::now();
        let idle: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|entry| {
                now.duration_since(entry.value().last_activity) >= idle_timeout
                    && !self.hub.has_subscribers(entry.key())
            })
            .map(|entry| *entry.key())
            .collect();
        for room_id in idle {
            if let Some((_, live)) = self.rooms.remove(&room_id) {
                // Dropping the sender lets the actor drain and exit.
                drop(live.tx);
                self.metrics.increment_rooms_unloaded();
                tracing::info!(%room_id, "unloaded idle room actor");
            }
        }

        match self.storage.sweep_ended_rooms(retention).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(swept = n, "garbage-collected ended rooms"),
            Err(err) => tracing::warn!(error = %err, "ended-room sweep failed"),
        }
    }

    /// Drain all actors, waiting up to `deadline` before aborting the
    /// stragglers. Aborted commands are simply not applied.
    pub async fn shutdown(&self, deadline: Duration) {
        let rooms: Vec<(RoomId, LiveRoom)> = {
            let keys: Vec<RoomId> = self.rooms.iter().map(|e| *e.key()).collect();
            keys.into_iter()
                .filter_map(|k| self.rooms.remove(&k))
                .collect()
        };
        let mut tasks = Vec::with_capacity(rooms.len());
        for (room_id, live) in rooms {
            drop(live.tx);
            tasks.push((room_id, live.task));
        }

        let drain = async {
            for (room_id, task) in &mut tasks {
                if let Err(err) = task.await {
                    tracing::warn!(%room_id, error = %err, "room actor ended abnormally");
                }
            }
        };
        if tokio::time::timeout(deadline, drain).await.is_err() {
            tracing::warn!("shutdown deadline reached; aborting remaining room actors");
            for (_, task) in &tasks {
                task.abort();
            }
        }
    }

    pub fn live_room_count(&self) -> usize {
        self.rooms.len()
    }
}

/// Map a room error onto a rejected result for a specific command.
pub fn room_error_result(command_id: crate::protocol::CommandId, err: &RoomError) -> CommandResult {
    let reason = match err {
        RoomError::NotFound => ErrorReason::NotFound,
        RoomError::NotAMember => ErrorReason::Forbidden,
        RoomError::Unavailable(_) => ErrorReason::Internal,
        RoomError::Storage(_) => ErrorReason::Internal,
    };
    CommandResult::rejected(command_id, reason, err.to_string())
}
