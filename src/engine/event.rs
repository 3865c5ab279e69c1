use serde::{Deserialize, Serialize};

use super::command::AbilityAction;
use super::roles::{RoleId, Team};
use crate::protocol::{CommandId, EventId, NominationId, RoomId, Seq, UserId};

/// Game phase. `Nomination` covers the floor-open-for-votes window;
/// voting happens in the same state while a nomination is open.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Lobby,
    Setup,
    FirstNight,
    Day,
    Nomination,
    Night,
    Ended,
}

impl Phase {
    pub fn is_night(&self) -> bool {
        matches!(self, Self::FirstNight | Self::Night)
    }

    pub fn is_day(&self) -> bool {
        matches!(self, Self::Day | Self::Nomination)
    }
}

/// Recorded game outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Good,
    Evil,
    Draw,
}

/// Why a player died.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeathCause {
    Demon,
    Execution,
    Slayer,
    Storyteller,
}

/// Tally outcome of a closed vote.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TallyOutcome {
    /// Below threshold; nothing changes.
    Insufficient,
    /// New highest tally today; nominee is about to die.
    Scheduled,
    /// Tied the current highest tally; nobody is about to die.
    Tie,
}

/// Typed event payloads. The `type`/`data` pair is the wire and storage
/// form; the reducer and `apply` only ever see these variants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    /// First event of every room. Records the RNG seed so replay is
    /// bit-identical; the seed is DM-visible only.
    #[serde(rename = "room.created")]
    RoomCreated {
        created_by: UserId,
        dm_user_id: UserId,
        seed: u64,
    },
    #[serde(rename = "player.joined")]
    PlayerJoined {
        user_id: UserId,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seat: Option<usize>,
        #[serde(default)]
        observer: bool,
    },
    #[serde(rename = "player.left")]
    PlayerLeft { user_id: UserId, seated: bool },
    /// Public setup summary (counts only; identities travel in
    /// `role.assigned`).
    #[serde(rename = "roles.distributed")]
    RolesDistributed {
        players: usize,
        townsfolk: usize,
        outsiders: usize,
        minions: usize,
        demons: usize,
    },
    /// Private deal for one seat. `role` is what the player is told;
    /// `true_role` is what they are.
    #[serde(rename = "role.assigned")]
    RoleAssigned {
        user_id: UserId,
        role: RoleId,
        true_role: RoleId,
        team: Team,
    },
    /// DM-visible summary of the evil team.
    #[serde(rename = "minions.revealed")]
    MinionsRevealed {
        demon: UserId,
        minions: Vec<UserId>,
    },
    #[serde(rename = "phase.changed")]
    PhaseChanged { phase: Phase, day_number: u32 },
    #[serde(rename = "day_number.incremented")]
    DayNumberIncremented { day_number: u32 },
    /// A night ability was received and buffered; it resolves (as
    /// `ability.invoked`) when the night order reaches its slot. Visible
    /// to the submitting player and the DM.
    #[serde(rename = "night.action_submitted")]
    NightActionSubmitted {
        actor: UserId,
        role: RoleId,
        action: AbilityAction,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        targets: Vec<UserId>,
    },
    #[serde(rename = "ability.invoked")]
    AbilityInvoked {
        actor: UserId,
        role: RoleId,
        action: AbilityAction,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        targets: Vec<UserId>,
    },
    /// Private information for one seat. `truthful` is recorded in the log
    /// and stripped from the recipient's projection.
    #[serde(rename = "information.delivered")]
    InformationDelivered {
        recipient: UserId,
        info: serde_json::Value,
        truthful: bool,
    },
    #[serde(rename = "player.died")]
    PlayerDied { user_id: UserId, cause: DeathCause },
    /// Dawn summary of the night's deaths (possibly empty).
    #[serde(rename = "deaths.announced")]
    DeathsAnnounced { deaths: Vec<UserId> },
    /// Demonhood moved (Scarlet Woman or minion fallback).
    #[serde(rename = "demon.changed")]
    DemonChanged {
        new_demon: UserId,
        previous: UserId,
    },
    #[serde(rename = "nomination.opened")]
    NominationOpened {
        nomination_id: NominationId,
        nominator: UserId,
        nominee: UserId,
        threshold: usize,
    },
    #[serde(rename = "nomination.seconded")]
    NominationSeconded {
        nomination_id: NominationId,
        seconder: UserId,
    },
    #[serde(rename = "vote.recorded")]
    VoteRecorded {
        nomination_id: NominationId,
        voter: UserId,
        yes: bool,
        #[serde(default)]
        ghost: bool,
    },
    #[serde(rename = "vote.tallied")]
    VoteTallied {
        nomination_id: NominationId,
        yes: usize,
        no: usize,
        threshold: usize,
        outcome: TallyOutcome,
    },
    #[serde(rename = "execution.scheduled")]
    ExecutionScheduled {
        nomination_id: NominationId,
        nominee: UserId,
    },
    #[serde(rename = "player.executed")]
    PlayerExecuted {
        user_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nomination_id: Option<NominationId>,
    },
    #[serde(rename = "whisper.sent")]
    WhisperSent {
        from: UserId,
        to: UserId,
        text: String,
    },
    /// DM reminder token placed on (or cleared from) a seat.
    #[serde(rename = "reminder.set")]
    ReminderSet {
        target: UserId,
        reminder: String,
        #[serde(default)]
        cleared: bool,
    },
    /// Public role reveal by the DM.
    #[serde(rename = "role.revealed")]
    RoleRevealed { user_id: UserId, role: RoleId },
    #[serde(rename = "game.ended")]
    GameEnded { winner: Winner, reason: String },
}

impl EventPayload {
    /// Stable wire name of this event type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RoomCreated { .. } => "room.created",
            Self::PlayerJoined { .. } => "player.joined",
            Self::PlayerLeft { .. } => "player.left",
            Self::RolesDistributed { .. } => "roles.distributed",
            Self::RoleAssigned { .. } => "role.assigned",
            Self::MinionsRevealed { .. } => "minions.revealed",
            Self::PhaseChanged { .. } => "phase.changed",
            Self::DayNumberIncremented { .. } => "day_number.incremented",
            Self::NightActionSubmitted { .. } => "night.action_submitted",
            Self::AbilityInvoked { .. } => "ability.invoked",
            Self::InformationDelivered { .. } => "information.delivered",
            Self::PlayerDied { .. } => "player.died",
            Self::DeathsAnnounced { .. } => "deaths.announced",
            Self::DemonChanged { .. } => "demon.changed",
            Self::NominationOpened { .. } => "nomination.opened",
            Self::NominationSeconded { .. } => "nomination.seconded",
            Self::VoteRecorded { .. } => "vote.recorded",
            Self::VoteTallied { .. } => "vote.tallied",
            Self::ExecutionScheduled { .. } => "execution.scheduled",
            Self::PlayerExecuted { .. } => "player.executed",
            Self::WhisperSent { .. } => "whisper.sent",
            Self::ReminderSet { .. } => "reminder.set",
            Self::RoleRevealed { .. } => "role.revealed",
            Self::GameEnded { .. } => "game.ended",
        }
    }
}

/// Immutable, durable event record: one row of the per-room log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub room_id: RoomId,
    pub seq: Seq,
    pub event_id: EventId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_user_id: Option<UserId>,
    pub causation_command_id: CommandId,
    #[serde(flatten)]
    pub payload: EventPayload,
    pub server_ts_ms: i64,
}

impl EventRecord {
    pub fn event_type(&self) -> &'static str {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_event_wire_shape() {
        let payload = EventPayload::PlayerDied {
            user_id: Uuid::new_v4(),
            cause: DeathCause::Execution,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "player.died");
        assert_eq!(json["data"]["cause"], "execution");
    }

    #[test]
    fn test_record_flattens_payload() {
        let record = EventRecord {
            room_id: Uuid::new_v4(),
            seq: 7,
            event_id: Uuid::new_v4(),
            actor_user_id: None,
            causation_command_id: Uuid::new_v4(),
            payload: EventPayload::DeathsAnnounced { deaths: vec![] },
            server_ts_ms: 1_700_000_000_000,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["seq"], 7);
        assert_eq!(json["type"], "deaths.announced");

        let back: EventRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_unknown_event_type_fails_to_parse() {
        // Schema drift during replay must be an error, not a silent skip.
        let json = serde_json::json!({
            "type": "player.teleported",
            "data": {}
        });
        assert!(serde_json::from_value::<EventPayload>(json).is_err());
    }
}
