use serde::{Deserialize, Serialize};

use super::roles::RoleId;
use crate::protocol::{NominationId, UserId};

/// Night/day ability action kinds a player can submit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AbilityAction {
    /// Demon kill (second night onward).
    Kill,
    /// Poisoner corruption.
    Poison,
    /// Monk protection.
    Protect,
    /// Information request (spy, empath, fortune teller, undertaker).
    Learn,
}

/// Declared winner for a storyteller-terminated game.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeclaredWinner {
    Good,
    Evil,
    Draw,
}

/// Target phases a DM may advance to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseTarget {
    Day,
    Night,
}

/// Typed command payloads, parsed from the envelope's `type`/`data` pair at
/// the gateway boundary. The reducer never sees raw JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum Command {
    /// Take a seat (lobby) or join as an observer (active game).
    #[serde(rename = "join")]
    Join { name: String },
    /// Give up a seat (lobby) or disconnect from the table (active game).
    #[serde(rename = "leave")]
    Leave,
    /// DM deals roles and opens the first night.
    #[serde(rename = "start_game")]
    StartGame,
    /// Submit a night ability for the actor's role.
    #[serde(rename = "ability.use")]
    AbilityUse {
        action: AbilityAction,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        targets: Vec<UserId>,
    },
    /// Open a nomination against a living player.
    #[serde(rename = "nominate")]
    Nominate { nominee: UserId },
    /// Publicly support the open nomination.
    #[serde(rename = "second")]
    Second { nomination_id: NominationId },
    /// Cast a vote on the open nomination.
    #[serde(rename = "vote.cast")]
    VoteCast {
        nomination_id: NominationId,
        yes: bool,
    },
    /// DM tallies the open nomination.
    #[serde(rename = "vote.close")]
    VoteClose { nomination_id: NominationId },
    /// DM carries out the scheduled execution (or names a target directly).
    #[serde(rename = "execute")]
    Execute {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<UserId>,
    },
    /// DM advances the phase (dawn / dusk).
    #[serde(rename = "phase.advance")]
    PhaseAdvance { to: PhaseTarget },
    /// Slayer's once-per-game public shot.
    #[serde(rename = "slayer_shot")]
    SlayerShot { target: UserId },
    /// Private table talk, visible to sender, recipient, and DM.
    #[serde(rename = "whisper")]
    Whisper { to: UserId, text: String },
    /// DM publicly reveals a player's true role.
    #[serde(rename = "dm.reveal_role")]
    DmRevealRole { target: UserId },
    /// DM overrides a seat's role before the game starts.
    #[serde(rename = "dm.assign_role")]
    DmAssignRole {
        target: UserId,
        role: RoleId,
        /// Believed role when it differs from the true one (drunk-style).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        believed_role: Option<RoleId>,
    },
    /// DM places or clears a reminder token on a seat.
    #[serde(rename = "dm.set_reminder")]
    DmSetReminder {
        target: UserId,
        reminder: String,
        #[serde(default)]
        clear: bool,
    },
    /// DM terminates the game with a declared winner.
    #[serde(rename = "end_game")]
    EndGame { winner: DeclaredWinner },
}

impl Command {
    /// Stable wire name, also the `command_type` component of the dedup key.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Leave => "leave",
            Self::StartGame => "start_game",
            Self::AbilityUse { .. } => "ability.use",
            Self::Nominate { .. } => "nominate",
            Self::Second { .. } => "second",
            Self::VoteCast { .. } => "vote.cast",
            Self::VoteClose { .. } => "vote.close",
            Self::Execute { .. } => "execute",
            Self::PhaseAdvance { .. } => "phase.advance",
            Self::SlayerShot { .. } => "slayer_shot",
            Self::Whisper { .. } => "whisper",
            Self::DmRevealRole { .. } => "dm.reveal_role",
            Self::DmAssignRole { .. } => "dm.assign_role",
            Self::DmSetReminder { .. } => "dm.set_reminder",
            Self::EndGame { .. } => "end_game",
        }
    }

    /// Commands whose outcome depends on how current the submitter's view
    /// is; these are rejected with `conflict` when `last_seen_seq` predates
    /// the latest day-progress event.
    pub fn is_staleness_sensitive(&self) -> bool {
        matches!(
            self,
            Self::Nominate { .. }
                | Self::Second { .. }
                | Self::VoteCast { .. }
                | Self::VoteClose { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_command_wire_shape() {
        let cmd = Command::VoteCast {
            nomination_id: 3,
            yes: true,
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "vote.cast");
        assert_eq!(json["data"]["nomination_id"], 3);
        assert_eq!(json["data"]["yes"], true);

        let parsed: Command = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, cmd);
    }

    #[test]
    fn test_kind_round_trips_with_serde_tag() {
        let commands = [
            Command::Join {
                name: "Alice".to_string(),
            },
            Command::StartGame,
            Command::Nominate {
                nominee: Uuid::new_v4(),
            },
            Command::PhaseAdvance {
                to: PhaseTarget::Night,
            },
            Command::DmSetReminder {
                target: Uuid::new_v4(),
                reminder: "red_herring".to_string(),
                clear: false,
            },
        ];
        for cmd in commands {
            let json = serde_json::to_value(&cmd).unwrap();
            assert_eq!(json["type"], cmd.kind());
        }
    }

    #[test]
    fn test_staleness_sensitivity() {
        assert!(Command::Nominate {
            nominee: Uuid::new_v4()
        }
        .is_staleness_sensitive());
        assert!(Command::VoteCast {
            nomination_id: 1,
            yes: false
        }
        .is_staleness_sensitive());
        assert!(!Command::StartGame.is_staleness_sensitive());
        assert!(!Command::Whisper {
            to: Uuid::new_v4(),
            text: "hi".to_string()
        }
        .is_staleness_sensitive());
    }
}
