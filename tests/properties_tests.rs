//! Property tests for the engine's ordering, dedup, and invariant
//! guarantees.

mod test_helpers;

use proptest::prelude::*;
use uuid::Uuid;

use grimoire_server::engine::state::RoomState;
use grimoire_server::engine::{
    decide, AbilityAction, Command, EventPayload, EventRecord, PhaseTarget, RoleId,
};
use grimoire_server::protocol::{CommandStatus, Seq, UserId};
use test_helpers::{envelope, five_seat_roles, must_apply, started_room, test_server};

fn apply_all(state: &mut RoomState, payloads: &[EventPayload]) {
    for payload in payloads {
        let record = EventRecord {
            room_id: state.room_id,
            seq: state.last_applied_seq + 1,
            event_id: Uuid::new_v4(),
            actor_user_id: None,
            causation_command_id: Uuid::new_v4(),
            payload: payload.clone(),
            server_ts_ms: 0,
        };
        state.apply(&record);
    }
}

fn run(state: &mut RoomState, actor: UserId, command: Command) -> Vec<EventPayload> {
    let payloads = decide(state, actor, &command).expect("legal command");
    apply_all(state, &payloads);
    payloads
}

/// A started five-role game at night, built deterministically.
fn night_table() -> (RoomState, Vec<UserId>, UserId) {
    let mut state = RoomState::empty(Uuid::from_u128(99));
    let dm = Uuid::from_u128(1000);
    apply_all(
        &mut state,
        &[EventPayload::RoomCreated {
            created_by: dm,
            dm_user_id: dm,
            seed: 5,
        }],
    );
    let roles = [
        RoleId::Imp,
        RoleId::Poisoner,
        RoleId::Monk,
        RoleId::Empath,
        RoleId::Soldier,
    ];
    let players: Vec<UserId> = (1..=5u128).map(Uuid::from_u128).collect();
    for (i, (player, role)) in players.iter().zip(roles.iter()).enumerate() {
        run(
            &mut state,
            *player,
            Command::Join {
                name: format!("p{i}"),
            },
        );
        run(
            &mut state,
            dm,
            Command::DmAssignRole {
                target: *player,
                role: *role,
                believed_role: None,
            },
        );
    }
    run(&mut state, dm, Command::StartGame);
    run(&mut state, dm, Command::PhaseAdvance { to: PhaseTarget::Day });
    run(&mut state, dm, Command::PhaseAdvance { to: PhaseTarget::Night });
    (state, players, dm)
}

/// The four night actions of the table above, indexed by role.
fn night_submission(players: &[UserId], idx: usize) -> (UserId, Command) {
    match idx {
        0 => (
            players[1],
            Command::AbilityUse {
                action: AbilityAction::Poison,
                targets: vec![players[4]],
            },
        ),
        1 => (
            players[2],
            Command::AbilityUse {
                action: AbilityAction::Protect,
                targets: vec![players[3]],
            },
        ),
        2 => (
            players[3],
            Command::AbilityUse {
                action: AbilityAction::Learn,
                targets: vec![],
            },
        ),
        _ => (
            players[0],
            Command::AbilityUse {
                action: AbilityAction::Kill,
                targets: vec![players[3]],
            },
        ),
    }
}

proptest! {
    /// Property 6 — for any submission order, `ability.invoked` events
    /// come out in the static night priority order.
    #[test]
    fn prop_night_resolution_is_priority_ordered(order in Just(vec![0usize, 1, 2, 3]).prop_shuffle()) {
        let (mut state, players, _dm) = night_table();
        let mut invoked: Vec<RoleId> = Vec::new();
        for idx in order {
            let (actor, command) = night_submission(&players, idx);
            let payloads = run(&mut state, actor, command);
            for payload in &payloads {
                if let EventPayload::AbilityInvoked { role, .. } = payload {
                    invoked.push(*role);
                }
            }
        }
        prop_assert_eq!(
            invoked,
            vec![RoleId::Poisoner, RoleId::Monk, RoleId::Empath, RoleId::Imp]
        );
    }

    /// Invariant 3 — seats are conserved: alive + dead always equals the
    /// seated count, whatever the storyteller executes.
    #[test]
    fn prop_seat_count_is_conserved(victims in proptest::collection::vec(0usize..5, 0..4)) {
        let (mut state, players, dm) = night_table();
        run(&mut state, dm, Command::PhaseAdvance { to: PhaseTarget::Day });
        for victim in victims {
            if state.winner.is_some() {
                break;
            }
            let target = players[victim];
            let alive = state.player(&target).map(|p| p.alive).unwrap_or(false);
            let already = state.executed_today.is_some();
            let command = Command::Execute { target: Some(target) };
            match decide(&state, dm, &command) {
                Ok(payloads) => {
                    prop_assert!(alive && !already);
                    apply_all(&mut state, &payloads);
                }
                Err(_) => prop_assert!(!alive || already),
            }
            let dead = state
                .seat_order
                .iter()
                .filter(|id| state.player(id).map(|p| !p.alive).unwrap_or(false))
                .count();
            prop_assert_eq!(state.alive_count() + dead, state.seat_order.len());
        }
    }
}

/// Exactly-once under concurrency: many racing submissions with one
/// idempotency key produce one event batch and identical results.
#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_duplicates_apply_exactly_once() {
    let server = test_server();
    let (room_id, dm, players) = started_room(&server, &five_seat_roles()).await;
    must_apply(
        &server,
        dm,
        room_id,
        "dawn-1",
        Command::PhaseAdvance {
            to: PhaseTarget::Day,
        },
    )
    .await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let server = server.clone();
        let nominator = players[1];
        let nominee = players[0];
        handles.push(tokio::spawn(async move {
            server
                .submit_command(
                    nominator,
                    envelope(
                        room_id,
                        "contested-nomination",
                        Command::Nominate { nominee },
                    ),
                )
                .await
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.expect("task"));
    }

    // All sixteen callers observe the same outcome.
    let reference = serde_json::to_string(&results[0]).unwrap();
    for result in &results {
        assert_eq!(result.status, CommandStatus::Ok);
        assert_eq!(serde_json::to_string(result).unwrap(), reference);
    }

    // And the log holds exactly one nomination.
    let records = server
        .storage()
        .events_after(&room_id, 0, 0)
        .await
        .unwrap();
    let nominations = records
        .iter()
        .filter(|r| r.event_type() == "nomination.opened")
        .count();
    assert_eq!(nominations, 1);
}

/// Dense sequence under interleaved submission from many actors.
#[tokio::test(flavor = "multi_thread")]
async fn test_interleaved_commands_keep_sequence_dense() {
    let server = test_server();
    let (room_id, dm, players) = started_room(&server, &five_seat_roles()).await;
    must_apply(
        &server,
        dm,
        room_id,
        "dawn-1",
        Command::PhaseAdvance {
            to: PhaseTarget::Day,
        },
    )
    .await;

    let mut handles = Vec::new();
    for (i, sender) in players.iter().enumerate() {
        for j in 0..5 {
            let server = server.clone();
            let sender = *sender;
            let recipient = players[(i + 1) % players.len()];
            handles.push(tokio::spawn(async move {
                server
                    .submit_command(
                        sender,
                        envelope(
                            room_id,
                            &format!("whisper-{i}-{j}"),
                            Command::Whisper {
                                to: recipient,
                                text: format!("note {i}/{j}"),
                            },
                        ),
                    )
                    .await
            }));
        }
    }
    for handle in handles {
        let result = handle.await.expect("task");
        assert_eq!(result.status, CommandStatus::Ok, "{:?}", result.message);
    }

    let records = server
        .storage()
        .events_after(&room_id, 0, 0)
        .await
        .unwrap();
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.seq, i as Seq + 1, "gapless under interleaving");
    }
    let whispers = records
        .iter()
        .filter(|r| r.event_type() == "whisper.sent")
        .count();
    assert_eq!(whispers, 25);
}
