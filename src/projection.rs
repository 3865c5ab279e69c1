//! Per-viewer projection: the one place that decides who sees what.
//!
//! Every event and every state snapshot leaving the engine passes through
//! here. The DM sees everything; players see public facts plus their own
//! private slice; observers see public facts only.

use serde::Serialize;
use serde_json::Value;

use crate::engine::{EventPayload, EventRecord, Phase, RoleId, RoomState, Team, Winner};
use crate::protocol::{NominationId, ProjectedEvent, RoomId, RoomStatus, Seq, UserId};

/// Identity and privilege a projection is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: UserId,
    pub is_dm: bool,
}

impl Viewer {
    pub fn dm(user_id: UserId) -> Self {
        Self {
            user_id,
            is_dm: true,
        }
    }

    pub fn player(user_id: UserId) -> Self {
        Self {
            user_id,
            is_dm: false,
        }
    }
}

/// Project one event for one viewer. Returns `None` when the viewer may
/// not see the event at all.
pub fn project_event(record: &EventRecord, viewer: &Viewer) -> Option<ProjectedEvent> {
    let data = if viewer.is_dm {
        payload_data(&record.payload)
    } else {
        match &record.payload {
            // The seed would let a player predict the deal.
            EventPayload::RoomCreated { .. } => {
                let mut data = payload_data(&record.payload);
                if let Some(map) = data.as_object_mut() {
                    map.remove("seed");
                }
                data
            }
            // Role identity: only the affected seat.
            EventPayload::RoleAssigned { user_id, .. } => {
                if *user_id != viewer.user_id {
                    return None;
                }
                payload_data(&record.payload)
            }
            EventPayload::MinionsRevealed { .. } => return None,
            // Demonhood moving is role identity for the new demon.
            EventPayload::DemonChanged { new_demon, .. } => {
                if *new_demon != viewer.user_id {
                    return None;
                }
                payload_data(&record.payload)
            }
            // Private information: recipient only, without the truth flag.
            EventPayload::InformationDelivered { recipient, .. } => {
                if *recipient != viewer.user_id {
                    return None;
                }
                let mut data = payload_data(&record.payload);
                if let Some(map) = data.as_object_mut() {
                    map.remove("truthful");
                }
                data
            }
            // Night submissions and resolutions stay between the actor and
            // the DM; the slayer's shot is a public day action.
            EventPayload::NightActionSubmitted { actor, .. } => {
                if *actor != viewer.user_id {
                    return None;
                }
                payload_data(&record.payload)
            }
            EventPayload::AbilityInvoked { actor, role, .. } => {
                if *role != RoleId::Slayer && *actor != viewer.user_id {
                    return None;
                }
                payload_data(&record.payload)
            }
            EventPayload::WhisperSent { from, to, .. } => {
                if *from != viewer.user_id && *to != viewer.user_id {
                    return None;
                }
                payload_data(&record.payload)
            }
            // Grimoire tokens are the storyteller's notes.
            EventPayload::ReminderSet { .. } => return None,
            // Everything else is table-public.
            _ => payload_data(&record.payload),
        }
    };

    Some(ProjectedEvent {
        room_id: record.room_id,
        seq: record.seq,
        event_type: record.event_type().to_string(),
        actor_user_id: record.actor_user_id,
        data,
        server_ts: record.server_ts_ms,
    })
}

fn payload_data(payload: &EventPayload) -> Value {
    match serde_json::to_value(payload) {
        Ok(Value::Object(mut tagged)) => tagged.remove("data").unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

#[derive(Debug, Serialize)]
struct ProjectedPlayer {
    user_id: UserId,
    name: String,
    seat: usize,
    alive: bool,
    connected: bool,
    ghost_vote_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<RoleId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    true_role: Option<RoleId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    team: Option<Team>,
    #[serde(skip_serializing_if = "Option::is_none")]
    revealed_role: Option<RoleId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reminders: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct ProjectedNomination {
    id: NominationId,
    day: u32,
    nominator: UserId,
    nominee: UserId,
    threshold: usize,
    seconded_by: Vec<UserId>,
    votes: Vec<Value>,
    status: crate::engine::NominationStatus,
}

#[derive(Debug, Serialize)]
struct ProjectedState {
    room_id: RoomId,
    status: RoomStatus,
    phase: Phase,
    day_number: u32,
    seq: Seq,
    dm_user_id: UserId,
    seat_order: Vec<UserId>,
    players: Vec<ProjectedPlayer>,
    nominations: Vec<ProjectedNomination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    executed_today: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    winner: Option<Winner>,
    #[serde(skip_serializing_if = "Option::is_none")]
    demon_id: Option<UserId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    minion_ids: Vec<UserId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    deaths_pending: Vec<UserId>,
}

/// Project the full room state for a viewer (initial fetch or resync).
/// Applies the same rules as event projection, recursively: roles,
/// reminders, and the evil roster are stripped for non-DM viewers.
pub fn project_state(state: &RoomState, viewer: &Viewer) -> Value {
    let players = state
        .seat_order
        .iter()
        .filter_map(|id| state.player(id).map(|p| (id, p)))
        .map(|(id, p)| {
            let own = *id == viewer.user_id;
            ProjectedPlayer {
                user_id: *id,
                name: p.name.clone(),
                seat: p.seat,
                alive: p.alive,
                connected: p.connected,
                ghost_vote_used: p.ghost_vote_used,
                role: if viewer.is_dm || own {
                    p.role
                } else {
                    p.revealed_role
                },
                true_role: if viewer.is_dm { p.true_role } else { None },
                team: if viewer.is_dm || own { p.team } else { None },
                revealed_role: p.revealed_role,
                reminders: if viewer.is_dm {
                    Some(p.reminders.clone())
                } else {
                    None
                },
            }
        })
        .collect();

    let nominations = state
        .nominations
        .iter()
        .map(|n| ProjectedNomination {
            id: n.id,
            day: n.day,
            nominator: n.nominator,
            nominee: n.nominee,
            threshold: n.threshold,
            seconded_by: n.seconded_by.clone(),
            votes: n
                .votes
                .iter()
                .map(|v| {
                    serde_json::json!({
                        "voter": v.voter,
                        "yes": v.yes,
                        "ghost": v.ghost,
                    })
                })
                .collect(),
            status: n.status,
        })
        .collect();

    let projected = ProjectedState {
        room_id: state.room_id,
        status: state.status,
        phase: state.phase,
        day_number: state.day_number,
        seq: state.last_applied_seq,
        dm_user_id: state.dm_user_id,
        seat_order: state.seat_order.clone(),
        players,
        nominations,
        executed_today: state.executed_today,
        winner: state.winner,
        demon_id: if viewer.is_dm { state.demon_id } else { None },
        minion_ids: if viewer.is_dm {
            state.minion_ids.clone()
        } else {
            Vec::new()
        },
        deaths_pending: if viewer.is_dm {
            state.deaths_pending.clone()
        } else {
            Vec::new()
        },
    };
    serde_json::to_value(projected).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AbilityAction, DeathCause, EventPayload};
    use uuid::Uuid;

    fn record(payload: EventPayload) -> EventRecord {
        EventRecord {
            room_id: Uuid::new_v4(),
            seq: 1,
            event_id: Uuid::new_v4(),
            actor_user_id: None,
            causation_command_id: Uuid::new_v4(),
            payload,
            server_ts_ms: 0,
        }
    }

    #[test]
    fn test_role_assignment_visibility() {
        let subject = Uuid::new_v4();
        let other = Uuid::new_v4();
        let dm = Uuid::new_v4();
        let rec = record(EventPayload::RoleAssigned {
            user_id: subject,
            role: RoleId::Imp,
            true_role: RoleId::Imp,
            team: Team::Evil,
        });

        // The affected player sees it verbatim.
        let own = project_event(&rec, &Viewer::player(subject)).unwrap();
        assert_eq!(own.data["role"], "imp");
        // Another player sees nothing at all.
        assert!(project_event(&rec, &Viewer::player(other)).is_none());
        // The DM sees it.
        assert!(project_event(&rec, &Viewer::dm(dm)).is_some());
    }

    #[test]
    fn test_information_strips_truth_flag_for_recipient() {
        let recipient = Uuid::new_v4();
        let rec = record(EventPayload::InformationDelivered {
            recipient,
            info: serde_json::json!({ "evil_neighbors": 1 }),
            truthful: false,
        });

        let own = project_event(&rec, &Viewer::player(recipient)).unwrap();
        assert!(own.data.get("truthful").is_none());
        assert_eq!(own.data["info"]["evil_neighbors"], 1);

        let dm = project_event(&rec, &Viewer::dm(Uuid::new_v4())).unwrap();
        assert_eq!(dm.data["truthful"], false);

        assert!(project_event(&rec, &Viewer::player(Uuid::new_v4())).is_none());
    }

    #[test]
    fn test_seed_hidden_from_players() {
        let rec = record(EventPayload::RoomCreated {
            created_by: Uuid::new_v4(),
            dm_user_id: Uuid::new_v4(),
            seed: 1234,
        });
        let player = project_event(&rec, &Viewer::player(Uuid::new_v4())).unwrap();
        assert!(player.data.get("seed").is_none());
        let dm = project_event(&rec, &Viewer::dm(Uuid::new_v4())).unwrap();
        assert_eq!(dm.data["seed"], 1234);
    }

    #[test]
    fn test_night_ability_private_slayer_public() {
        let poisoner = Uuid::new_v4();
        let night = record(EventPayload::AbilityInvoked {
            actor: poisoner,
            role: RoleId::Poisoner,
            action: AbilityAction::Poison,
            targets: vec![Uuid::new_v4()],
        });
        assert!(project_event(&night, &Viewer::player(Uuid::new_v4())).is_none());
        assert!(project_event(&night, &Viewer::player(poisoner)).is_some());

        let shot = record(EventPayload::AbilityInvoked {
            actor: Uuid::new_v4(),
            role: RoleId::Slayer,
            action: AbilityAction::Kill,
            targets: vec![Uuid::new_v4()],
        });
        assert!(project_event(&shot, &Viewer::player(Uuid::new_v4())).is_some());
    }

    #[test]
    fn test_whisper_visible_to_parties_and_dm_only() {
        let from = Uuid::new_v4();
        let to = Uuid::new_v4();
        let rec = record(EventPayload::WhisperSent {
            from,
            to,
            text: "trust no one".to_string(),
        });
        assert!(project_event(&rec, &Viewer::player(from)).is_some());
        assert!(project_event(&rec, &Viewer::player(to)).is_some());
        assert!(project_event(&rec, &Viewer::dm(Uuid::new_v4())).is_some());
        assert!(project_event(&rec, &Viewer::player(Uuid::new_v4())).is_none());
    }

    #[test]
    fn test_public_events_pass_through() {
        let rec = record(EventPayload::PlayerDied {
            user_id: Uuid::new_v4(),
            cause: DeathCause::Execution,
        });
        let view = project_event(&rec, &Viewer::player(Uuid::new_v4())).unwrap();
        assert_eq!(view.event_type, "player.died");
        assert_eq!(view.data["cause"], "execution");
    }

    #[test]
    fn test_state_projection_hides_other_roles() {
        use crate::engine::state::RoomState;

        let mut state = RoomState::empty(Uuid::new_v4());
        let dm = Uuid::new_v4();
        state.dm_user_id = dm;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        for (i, id) in [a, b].iter().enumerate() {
            state.seat_order.push(*id);
            state.players.insert(
                *id,
                crate::engine::PlayerState {
                    name: format!("p{i}"),
                    seat: i,
                    role: Some(RoleId::Imp),
                    true_role: Some(RoleId::Imp),
                    team: Some(Team::Evil),
                    alive: true,
                    reminders: vec!["poisoned".to_string()],
                    ghost_vote_used: false,
                    connected: true,
                    revealed_role: None,
                },
            );
        }
        state.demon_id = Some(a);

        let view = project_state(&state, &Viewer::player(a));
        let players = view["players"].as_array().unwrap();
        let own = players.iter().find(|p| p["user_id"] == a.to_string()).unwrap();
        let other = players.iter().find(|p| p["user_id"] == b.to_string()).unwrap();
        assert_eq!(own["role"], "imp");
        assert!(other.get("role").is_none());
        assert!(other.get("true_role").is_none());
        assert!(own.get("reminders").is_none());
        assert!(view.get("demon_id").is_none());

        let dm_view = project_state(&state, &Viewer::dm(dm));
        assert_eq!(dm_view["demon_id"], a.to_string());
        let dm_players = dm_view["players"].as_array().unwrap();
        assert!(dm_players[0].get("reminders").is_some());
    }
}
