use serde::{Deserialize, Serialize};

use super::error_codes::ErrorReason;
use super::types::{CommandId, RoomId, Seq, UserId};
use crate::engine::Command;

/// Client-supplied command envelope. The actor identity is attached by the
/// gateway from the verified token, never taken from the payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandEnvelope {
    pub command_id: CommandId,
    pub idempotency_key: String,
    pub room_id: RoomId,
    /// Contributes the wire `type` and `data` fields.
    #[serde(flatten)]
    pub command: Command,
    /// The highest seq the submitter had seen. Staleness-sensitive commands
    /// older than the room's latest day-progress event are rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_seq: Option<Seq>,
}

/// Outcome status of a command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Ok,
    Rejected,
}

/// Result returned to the submitter (and memoized in the dedup store; a
/// duplicate submission receives this record byte-for-byte).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResult {
    pub command_id: CommandId,
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ErrorReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_seq_from: Option<Seq>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_seq_to: Option<Seq>,
}

impl CommandResult {
    pub fn ok(command_id: CommandId, from: Option<Seq>, to: Option<Seq>) -> Self {
        Self {
            command_id,
            status: CommandStatus::Ok,
            reason: None,
            message: None,
            applied_seq_from: from,
            applied_seq_to: to,
        }
    }

    pub fn rejected(command_id: CommandId, reason: ErrorReason, message: String) -> Self {
        Self {
            command_id,
            status: CommandStatus::Rejected,
            reason: Some(reason),
            message: Some(message),
            applied_seq_from: None,
            applied_seq_to: None,
        }
    }
}

/// A viewer-specific event as delivered on the wire. `data` is the
/// projected payload; fields the viewer may not see are already gone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectedEvent {
    pub room_id: RoomId,
    pub seq: Seq,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_user_id: Option<UserId>,
    pub data: serde_json::Value,
    pub server_ts: i64,
}

/// How a subscriber wants to be brought up to date.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeMode {
    /// Replay events after `after_seq`, then stream.
    #[default]
    Events,
    /// Send a projected state snapshot first, then the event tail.
    SnapshotThenEvents,
}

/// Message frames sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Command {
        envelope: CommandEnvelope,
    },
    Subscribe {
        room_id: RoomId,
        #[serde(default)]
        after_seq: Option<Seq>,
        #[serde(default)]
        mode: SubscribeMode,
    },
    Ping,
}

/// Message frames sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Event {
        event: ProjectedEvent,
    },
    CommandResult {
        result: CommandResult,
    },
    /// Projected state snapshot, sent for `snapshot_then_events` resyncs.
    State {
        room_id: RoomId,
        seq: Seq,
        state: serde_json::Value,
    },
    Error {
        code: ErrorReason,
        message: String,
    },
    Pong,
}
