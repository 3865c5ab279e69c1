//! Single-writer room actor.
//!
//! One actor task owns one room's `RoomState` and sequence allocator. It
//! drains a bounded mailbox one command at a time: dedup lookup, staleness
//! check, pure reduction, atomic persistence, in-memory fold, fan-out.
//! Nothing inside the loop ever waits on a subscriber or an agent.

use lru::LruCache;
use smallvec::SmallVec;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

use crate::agent::AgentHooks;
use crate::engine::{decide, EventPayload, EventRecord, Phase, RoomState};
use crate::hub::SubscriberHub;
use crate::metrics::ServerMetrics;
use crate::projection::{project_state, Viewer};
use crate::protocol::{
    validate_idempotency_key, CommandEnvelope, CommandResult, ErrorReason, RoomId, RoomStatus,
    Seq, UserId,
};
use crate::store::{DedupKey, DedupRecord, DedupStatus, Snapshot, Storage};

/// Bounded persistence retries before the actor taints itself.
const COMMIT_RETRIES: u32 = 3;
/// Backoff between persistence retries.
const COMMIT_RETRY_BACKOFF: Duration = Duration::from_millis(50);
/// Hot dedup results kept in front of the durable store.
const RESULT_CACHE_SIZE: usize = 512;

/// A command waiting in the mailbox.
pub struct CommandRequest {
    pub envelope: CommandEnvelope,
    pub actor_user_id: UserId,
    pub deadline: Instant,
    pub reply: oneshot::Sender<CommandResult>,
}

/// Viewer-specific resync data, answered by the actor so reads see the
/// same state commands do.
pub struct ResyncInfo {
    pub member: bool,
    pub viewer: Viewer,
    pub seq: Seq,
    pub state: serde_json::Value,
}

pub enum ActorMessage {
    Command(Box<CommandRequest>),
    Resync {
        user_id: UserId,
        reply: oneshot::Sender<ResyncInfo>,
    },
}

/// Tunables the actor needs from the server config.
#[derive(Debug, Clone, Copy)]
pub struct ActorConfig {
    /// Applied events between snapshots.
    pub snapshot_interval: u64,
}

pub struct RoomActor {
    room_id: RoomId,
    state: RoomState,
    next_seq: Seq,
    storage: Arc<dyn Storage>,
    hub: Arc<SubscriberHub>,
    agents: Arc<AgentHooks>,
    metrics: Arc<ServerMetrics>,
    config: ActorConfig,
    events_since_snapshot: u64,
    result_cache: LruCache<DedupKey, CommandResult>,
}

impl RoomActor {
    pub fn new(
        room_id: RoomId,
        state: RoomState,
        next_seq: Seq,
        storage: Arc<dyn Storage>,
        hub: Arc<SubscriberHub>,
        agents: Arc<AgentHooks>,
        metrics: Arc<ServerMetrics>,
        config: ActorConfig,
    ) -> Self {
        Self {
            room_id,
            state,
            next_seq,
            storage,
            hub,
            agents,
            metrics,
            config,
            events_since_snapshot: 0,
            result_cache: LruCache::new(
                NonZeroUsize::new(RESULT_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
            ),
        }
    }

    /// Drain the mailbox until every sender is gone (graceful unload) or a
    /// persistence failure taints the actor.
    pub async fn run(mut self, mut mailbox: mpsc::Receiver<ActorMessage>) {
        while let Some(message) = mailbox.recv().await {
            match message {
                ActorMessage::Command(request) => {
                    if self.handle_command(*request).await.is_err() {
                        // Tainted: refuse everything still queued, then die.
                        self.metrics.increment_rooms_tainted();
                        self.hub.evict_room(&self.room_id);
                        mailbox.close();
                        while let Some(message) = mailbox.recv().await {
                            if let ActorMessage::Command(request) = message {
                                let _ = request.reply.send(CommandResult::rejected(
                                    request.envelope.command_id,
                                    ErrorReason::Internal,
                                    "room is reloading after a storage failure".to_string(),
                                ));
                            }
                        }
                        tracing::error!(room_id = %self.room_id, "room actor tainted; unloading");
                        return;
                    }
                }
                ActorMessage::Resync { user_id, reply } => {
                    let viewer = Viewer {
                        user_id,
                        is_dm: user_id == self.state.dm_user_id,
                    };
                    let _ = reply.send(ResyncInfo {
                        member: self.state.is_member(&user_id),
                        viewer,
                        seq: self.state.last_applied_seq,
                        state: project_state(&self.state, &viewer),
                    });
                }
            }
        }
        tracing::debug!(room_id = %self.room_id, "room actor drained; unloading");
    }

    /// Returns `Err(())` only when the actor must taint itself.
    async fn handle_command(&mut self, request: CommandRequest) -> Result<(), ()> {
        self.metrics.increment_commands_received();
        let CommandRequest {
            envelope,
            actor_user_id,
            deadline,
            reply,
        } = request;
        let command_id = envelope.command_id;

        // Commands that sat in the queue past their deadline are refused
        // without side effects; the dedup slot stays free for a retry.
        if Instant::now() >= deadline {
            self.metrics.increment_commands_expired();
            let _ = reply.send(CommandResult::rejected(
                command_id,
                ErrorReason::RateLimited,
                "command deadline elapsed before processing".to_string(),
            ));
            return Ok(());
        }

        if let Err(message) = validate_idempotency_key(&envelope.idempotency_key) {
            let _ = reply.send(CommandResult::rejected(
                command_id,
                ErrorReason::BadRequest,
                message,
            ));
            return Ok(());
        }

        let dedup_key = DedupKey {
            room_id: self.room_id,
            actor_user_id,
            idempotency_key: envelope.idempotency_key.clone(),
            command_type: envelope.command.kind().to_string(),
        };

        // Dedup: a stored outcome is returned verbatim, no state change.
        if let Some(result) = self.lookup_result(&dedup_key).await {
            self.metrics.increment_commands_deduplicated();
            let _ = reply.send(result);
            return Ok(());
        }

        // Optimistic-concurrency check for staleness-sensitive commands.
        if envelope.command.is_staleness_sensitive() {
            if let Some(last_seen) = envelope.last_seen_seq {
                if last_seen < self.state.stale_guard_seq {
                    let result = CommandResult::rejected(
                        command_id,
                        ErrorReason::Conflict,
                        format!(
                            "view is stale: saw seq {last_seen}, room is at {}",
                            self.state.last_applied_seq
                        ),
                    );
                    self.record_rejection(&dedup_key, &result).await;
                    self.metrics.increment_commands_rejected();
                    let _ = reply.send(result);
                    return Ok(());
                }
            }
        }

        // Reduce.
        let payloads = match decide(&self.state, actor_user_id, &envelope.command) {
            Ok(payloads) => payloads,
            Err(err) => {
                let result = CommandResult::rejected(command_id, err.reason, err.message);
                self.record_rejection(&dedup_key, &result).await;
                self.metrics.increment_commands_rejected();
                let _ = reply.send(result);
                return Ok(());
            }
        };

        // Materialize records with consecutive seqs.
        let now_ms = chrono::Utc::now().timestamp_millis();
        let first_seq = self.next_seq;
        let records: SmallVec<[Arc<EventRecord>; 8]> = payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| {
                Arc::new(EventRecord {
                    room_id: self.room_id,
                    seq: first_seq + i as Seq,
                    event_id: Uuid::new_v4(),
                    actor_user_id: Some(actor_user_id),
                    causation_command_id: command_id,
                    payload,
                    server_ts_ms: now_ms,
                })
            })
            .collect();

        let result = if records.is_empty() {
            CommandResult::ok(command_id, None, None)
        } else {
            CommandResult::ok(
                command_id,
                Some(first_seq),
                Some(first_seq + records.len() as Seq - 1),
            )
        };
        let dedup = DedupRecord {
            key: dedup_key.clone(),
            command_id,
            status: DedupStatus::Applied,
            result_json: serde_json::to_string(&result).unwrap_or_default(),
            created_at: chrono::Utc::now(),
        };

        // Persist atomically, with bounded retries for transient faults.
        let owned: Vec<EventRecord> = records.iter().map(|r| (**r).clone()).collect();
        if let Err(err) = self.commit_with_retries(first_seq, &owned, dedup).await {
            tracing::error!(
                room_id = %self.room_id,
                error = %err,
                "persistence failed after retries; tainting room actor"
            );
            let _ = reply.send(CommandResult::rejected(
                command_id,
                ErrorReason::Internal,
                "persistence failure; the command was not applied".to_string(),
            ));
            return Err(());
        }

        // Fold into the in-memory state.
        for record in &records {
            self.state.apply(record);
        }
        self.next_seq = first_seq + records.len() as Seq;
        self.metrics.increment_commands_applied();
        self.metrics.add_events_appended(records.len() as u64);
        self.result_cache.put(dedup_key, result.clone());

        self.sync_room_status(&records).await;

        // The submitter's result is sent only after persistence; fan-out
        // never blocks this loop.
        let _ = reply.send(result);
        if !records.is_empty() {
            self.hub.publish(&self.room_id, &records);
            self.agents.notify(&self.room_id, &records);
        }

        self.maybe_snapshot(records.len() as u64);
        Ok(())
    }

    async fn lookup_result(&mut self, key: &DedupKey) -> Option<CommandResult> {
        if let Some(result) = self.result_cache.get(key) {
            return Some(result.clone());
        }
        match self.storage.dedup_lookup(key).await {
            Ok(Some(record)) => match serde_json::from_str::<CommandResult>(&record.result_json) {
                Ok(result) => {
                    self.result_cache.put(key.clone(), result.clone());
                    Some(result)
                }
                Err(err) => {
                    tracing::warn!(
                        room_id = %self.room_id,
                        error = %err,
                        "stored dedup result is unreadable; treating as fresh command"
                    );
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(room_id = %self.room_id, error = %err, "dedup lookup failed");
                None
            }
        }
    }

    async fn record_rejection(&mut self, key: &DedupKey, result: &CommandResult) {
        let record = DedupRecord {
            key: key.clone(),
            command_id: result.command_id,
            status: DedupStatus::Rejected,
            result_json: serde_json::to_string(result).unwrap_or_default(),
            created_at: chrono::Utc::now(),
        };
        if let Err(err) = self.storage.record_rejection(record).await {
            tracing::warn!(room_id = %self.room_id, error = %err, "failed to record rejection");
        }
        self.result_cache.put(key.clone(), result.clone());
    }

    async fn commit_with_retries(
        &mut self,
        first_seq: Seq,
        events: &[EventRecord],
        dedup: DedupRecord,
    ) -> Result<(), crate::store::StorageError> {
        let mut attempt = 0u32;
        loop {
            match self
                .storage
                .commit(&self.room_id, first_seq, events, dedup.clone())
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < COMMIT_RETRIES => {
                    attempt += 1;
                    self.metrics.increment_storage_retries();
                    tracing::warn!(
                        room_id = %self.room_id,
                        attempt,
                        error = %err,
                        "transient persistence failure; retrying"
                    );
                    tokio::time::sleep(COMMIT_RETRY_BACKOFF * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Mirror lifecycle transitions onto the durable room record.
    async fn sync_room_status(&self, records: &[Arc<EventRecord>]) {
        for record in records {
            let status = match &record.payload {
                EventPayload::PhaseChanged { phase, .. } if *phase == Phase::FirstNight => {
                    Some(RoomStatus::Active)
                }
                EventPayload::GameEnded { .. } => Some(RoomStatus::Ended),
                _ => None,
            };
            if let Some(status) = status {
                if let Err(err) = self.storage.set_room_status(&self.room_id, status).await {
                    tracing::warn!(
                        room_id = %self.room_id,
                        error = %err,
                        "failed to update room status"
                    );
                }
            }
        }
    }

    /// Fire-and-forget snapshot write on the configured cadence.
    /// Last-writer-wins; a failed write only logs.
    fn maybe_snapshot(&mut self, appended: u64) {
        self.events_since_snapshot += appended;
        if self.config.snapshot_interval == 0
            || self.events_since_snapshot < self.config.snapshot_interval
        {
            return;
        }
        self.events_since_snapshot = 0;

        let state_json = match serde_json::to_string(&self.state) {
            Ok(json) => json,
            Err(err) => {
                self.metrics.increment_snapshot_failures();
                tracing::error!(room_id = %self.room_id, error = %err, "snapshot serialization failed");
                return;
            }
        };
        let snapshot = Snapshot {
            room_id: self.room_id,
            last_seq: self.state.last_applied_seq,
            state_json,
            created_at: chrono::Utc::now(),
        };
        let storage = self.storage.clone();
        let metrics = self.metrics.clone();
        let room_id = self.room_id;
        tokio::spawn(async move {
            match storage.save_snapshot(snapshot).await {
                Ok(()) => metrics.increment_snapshots_written(),
                Err(err) => {
                    metrics.increment_snapshot_failures();
                    tracing::warn!(%room_id, error = %err, "snapshot write failed");
                }
            }
        });
    }
}
