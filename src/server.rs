//! `GameServer`: the wired-together engine an HTTP/WebSocket surface talks
//! to. Owns storage, the subscriber hub, agent hooks, the room manager, and
//! metrics. Commands are always enqueued to the owning room actor; nothing
//! here mutates game state directly.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::agent::{AgentHooks, AgentNotification};
use crate::auth::TokenAuthority;
use crate::config::Config;
use crate::engine::{EventPayload, EventRecord};
use crate::hub::SubscriberHub;
use crate::metrics::ServerMetrics;
use crate::projection::project_event;
use crate::protocol::{
    CommandEnvelope, CommandResult, ErrorReason, ProjectedEvent, RoomId, RoomMeta, RoomStatus,
    Seq, UserId,
};
use crate::room::{room_error_result, ActorConfig, ResyncInfo, RoomError, RoomManager};
use crate::store::{self, DedupKey, DedupRecord, DedupStatus, Storage};

/// Cap on events returned by a single HTTP tail read.
const HTTP_EVENT_PAGE: usize = 1_000;

#[derive(Clone)]
pub struct GameServer {
    config: Arc<Config>,
    storage: Arc<dyn Storage>,
    hub: Arc<SubscriberHub>,
    agents: Arc<AgentHooks>,
    manager: Arc<RoomManager>,
    metrics: Arc<ServerMetrics>,
    tokens: TokenAuthority,
}

impl GameServer {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let storage = store::open(&config.db_dsn)
            .map_err(|err| anyhow::anyhow!("failed to open storage: {err}"))?;
        let metrics = Arc::new(ServerMetrics::new());
        let hub = Arc::new(SubscriberHub::new(
            config.engine.subscriber_queue_depth,
            metrics.clone(),
        ));
        let agents = Arc::new(AgentHooks::new(metrics.clone()));
        let manager = Arc::new(RoomManager::new(
            storage.clone(),
            hub.clone(),
            agents.clone(),
            metrics.clone(),
            ActorConfig {
                snapshot_interval: config.engine.snapshot_interval,
            },
        ));
        let tokens = TokenAuthority::new(&config.auth.jwt_secret, config.auth.jwt_ttl);

        Ok(Self {
            config: Arc::new(config),
            storage,
            hub,
            agents,
            manager,
            metrics,
            tokens,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    pub fn tokens(&self) -> &TokenAuthority {
        &self.tokens
    }

    pub fn hub(&self) -> &SubscriberHub {
        &self.hub
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Create a room with the caller as both creator and storyteller, and
    /// write its opening event (which pins the RNG seed).
    pub async fn create_room(&self, created_by: UserId) -> Result<RoomMeta, RoomError> {
        let room_id = Uuid::new_v4();
        let seed: u64 = rand::random();
        let meta = RoomMeta {
            id: room_id,
            created_by,
            dm_user_id: created_by,
            status: RoomStatus::Lobby,
            created_at: chrono::Utc::now(),
        };
        self.storage.create_room(meta.clone()).await?;

        let creation_command = Uuid::new_v4();
        let record = EventRecord {
            room_id,
            seq: 1,
            event_id: Uuid::new_v4(),
            actor_user_id: Some(created_by),
            causation_command_id: creation_command,
            payload: EventPayload::RoomCreated {
                created_by,
                dm_user_id: created_by,
                seed,
            },
            server_ts_ms: chrono::Utc::now().timestamp_millis(),
        };
        let dedup = DedupRecord {
            key: DedupKey {
                room_id,
                actor_user_id: created_by,
                idempotency_key: format!("create:{room_id}"),
                command_type: "create_room".to_string(),
            },
            command_id: creation_command,
            status: DedupStatus::Applied,
            result_json: serde_json::to_string(&CommandResult::ok(
                creation_command,
                Some(1),
                Some(1),
            ))
            .unwrap_or_default(),
            created_at: chrono::Utc::now(),
        };
        self.storage.commit(&room_id, 1, &[record], dedup).await?;

        tracing::info!(%room_id, dm_user_id = %created_by, "room created");
        Ok(meta)
    }

    /// Enqueue a command into its room's mailbox. Returns quickly; the
    /// receiver resolves once the actor has decided the command. Enqueue
    /// order from one caller is the order the actor observes.
    pub async fn enqueue_command(
        &self,
        actor_user_id: UserId,
        envelope: CommandEnvelope,
    ) -> Result<tokio::sync::oneshot::Receiver<CommandResult>, RoomError> {
        let room_id = envelope.room_id;
        let deadline =
            Instant::now() + Duration::from_millis(self.config.engine.command_deadline_ms);
        self.manager
            .submit(room_id, actor_user_id, envelope, deadline)
            .await
    }

    /// Wait for an enqueued command's result, guarding against an actor
    /// dying mid-flight (the actor itself enforces the command deadline).
    pub async fn await_result(
        &self,
        command_id: crate::protocol::CommandId,
        receiver: tokio::sync::oneshot::Receiver<CommandResult>,
    ) -> CommandResult {
        let deadline_ms = self.config.engine.command_deadline_ms;
        let grace = Duration::from_millis(deadline_ms.saturating_mul(2).max(1_000));
        match tokio::time::timeout(grace, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => CommandResult::rejected(
                command_id,
                ErrorReason::Internal,
                "room actor dropped the command".to_string(),
            ),
            Err(_) => CommandResult::rejected(
                command_id,
                ErrorReason::RateLimited,
                "command timed out".to_string(),
            ),
        }
    }

    /// Submit a command on behalf of an authenticated actor and wait for
    /// its result. This is the only write path; the gateway and the agent
    /// hook both land here.
    pub async fn submit_command(
        &self,
        actor_user_id: UserId,
        envelope: CommandEnvelope,
    ) -> CommandResult {
        let command_id = envelope.command_id;
        match self.enqueue_command(actor_user_id, envelope).await {
            Ok(receiver) => self.await_result(command_id, receiver).await,
            Err(err) => room_error_result(command_id, &err),
        }
    }

    /// Membership, viewer, and projected state for a user in a room.
    pub async fn resync(&self, room_id: RoomId, user_id: UserId) -> Result<ResyncInfo, RoomError> {
        self.manager.resync(room_id, user_id).await
    }

    /// Projected event tail for an already-verified viewer, read from the
    /// log (resume never uses a transient buffer).
    pub async fn tail_events(
        &self,
        room_id: RoomId,
        viewer: &crate::projection::Viewer,
        after_seq: Seq,
        limit: usize,
    ) -> Result<Vec<ProjectedEvent>, RoomError> {
        let records = self.storage.events_after(&room_id, after_seq, limit).await?;
        Ok(records
            .iter()
            .filter_map(|record| project_event(record, viewer))
            .collect())
    }

    /// Projected event tail for an authenticated member.
    pub async fn events_after(
        &self,
        room_id: RoomId,
        user_id: UserId,
        after_seq: Seq,
    ) -> Result<Vec<ProjectedEvent>, RoomError> {
        let info = self.resync(room_id, user_id).await?;
        if !info.member {
            return Err(RoomError::NotAMember);
        }
        self.tail_events(room_id, &info.viewer, after_seq, HTTP_EVENT_PAGE)
            .await
    }

    /// Rebuild the room state as of `to_seq` by folding the log from the
    /// beginning, and project it for a viewer. Historical reads never
    /// touch the live actor.
    pub async fn replay_state(
        &self,
        room_id: RoomId,
        requester: UserId,
        viewer_user: UserId,
        to_seq: Seq,
    ) -> Result<serde_json::Value, RoomError> {
        let meta = self
            .storage
            .room_meta(&room_id)
            .await?
            .ok_or(RoomError::NotFound)?;
        // Only the storyteller may borrow someone else's eyes.
        if viewer_user != requester && requester != meta.dm_user_id {
            return Err(RoomError::NotAMember);
        }
        let viewer = crate::projection::Viewer {
            user_id: viewer_user,
            is_dm: viewer_user == meta.dm_user_id,
        };

        let mut state = crate::engine::RoomState::empty(room_id);
        let records = self.storage.events_after(&room_id, 0, 0).await?;
        for record in records.iter().take_while(|r| r.seq <= to_seq) {
            state.apply(record);
        }
        if !state.is_member(&requester) && requester != meta.dm_user_id {
            return Err(RoomError::NotAMember);
        }
        Ok(crate::projection::project_state(&state, &viewer))
    }

    /// Attach the storyteller agent hook for a room. The agent receives
    /// DM-projected event batches and submits commands with the DM's
    /// identity through [`Self::submit_command`].
    pub async fn attach_agent(
        &self,
        room_id: RoomId,
    ) -> Result<(UserId, tokio::sync::mpsc::Receiver<AgentNotification>), RoomError> {
        let meta = self
            .storage
            .room_meta(&room_id)
            .await?
            .ok_or(RoomError::NotFound)?;
        let receiver = self.agents.attach(room_id, meta.dm_user_id);
        tracing::info!(%room_id, "agent hook attached");
        Ok((meta.dm_user_id, receiver))
    }

    pub fn detach_agent(&self, room_id: &RoomId) {
        self.agents.detach(room_id);
    }

    /// Spawn the periodic maintenance task: idle actor unload and ended
    /// room GC.
    pub fn start_maintenance(&self) -> JoinHandle<()> {
        let manager = self.manager.clone();
        let idle = Duration::from_secs(self.config.engine.room_idle_timeout);
        let retention = chrono::Duration::hours(self.config.engine.event_retention_hours as i64);
        let interval = Duration::from_secs(self.config.engine.sweep_interval.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                manager.sweep(idle, retention).await;
            }
        })
    }

    /// Drain room queues, then abort stragglers at the grace deadline.
    pub async fn shutdown(&self) {
        let grace = Duration::from_secs(self.config.engine.shutdown_grace);
        tracing::info!(grace_secs = grace.as_secs(), "draining room actors");
        self.manager.shutdown(grace).await;
    }

    pub async fn health(&self) -> bool {
        self.storage.health_check().await
    }

    pub fn live_room_count(&self) -> usize {
        self.manager.live_room_count()
    }
}
