//! The sole decider of command legality.
//!
//! `decide` is pure: `(state, actor, command) -> events | error`, no I/O.
//! It folds produced events into a scratch copy of the state as it goes, so
//! later events in a batch (win checks, night cascades) see the effect of
//! earlier ones. The caller persists the events and folds them into the
//! real state with [`RoomState::apply`].

use rand::seq::SliceRandom;
use rand::RngExt;

use super::command::{AbilityAction, Command, DeclaredWinner, PhaseTarget};
use super::event::{DeathCause, EventPayload, EventRecord, Phase, TallyOutcome, Winner};
use super::rng::draw_rng;
use super::roles::{
    distribution, night_slot, night_slot_is_active, RoleId, RoleKind, Team, MINION_POOL,
    NIGHT_ORDER, OUTSIDER_POOL, TOWNSFOLK_POOL,
};
use super::state::{
    RoomState, REMINDER_RED_HERRING, REMINDER_SLAYER_USED,
};
use crate::protocol::{
    validate_player_name, ErrorReason, RoomStatus, UserId, MAX_SEATS, MIN_PLAYERS,
};

/// Maximum whisper length the engine accepts.
const MAX_WHISPER_LENGTH: usize = 500;
/// Maximum reminder token length.
const MAX_REMINDER_LENGTH: usize = 64;

/// A rejected command. Recorded in the dedup store and returned verbatim to
/// the submitter; no events are written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}: {message}")]
pub struct CommandError {
    pub reason: ErrorReason,
    pub message: String,
}

impl CommandError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            reason: ErrorReason::Forbidden,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            reason: ErrorReason::BadRequest,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            reason: ErrorReason::Conflict,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            reason: ErrorReason::NotFound,
            message: message.into(),
        }
    }
}

type Decision = Result<Vec<EventPayload>, CommandError>;

/// Scratch batch: events so far plus the state they fold to.
struct Batch {
    state: RoomState,
    events: Vec<EventPayload>,
}

impl Batch {
    fn new(state: &RoomState) -> Self {
        Self {
            state: state.clone(),
            events: Vec::new(),
        }
    }

    fn ended(&self) -> bool {
        self.state.winner.is_some()
    }

    fn push(&mut self, payload: EventPayload) {
        // Nothing follows game.ended within a batch.
        if self.ended() {
            return;
        }
        let record = EventRecord {
            room_id: self.state.room_id,
            seq: self.state.last_applied_seq + 1,
            event_id: uuid::Uuid::nil(),
            actor_user_id: None,
            causation_command_id: uuid::Uuid::nil(),
            payload,
            server_ts_ms: 0,
        };
        self.state.apply(&record);
        self.events.push(record.payload);
    }
}

/// Decide a command against the current state.
pub fn decide(state: &RoomState, actor: UserId, command: &Command) -> Decision {
    if state.winner.is_some() || state.status == RoomStatus::Ended {
        return Err(CommandError::bad_request("the game has ended"));
    }

    match command {
        Command::Join { name } => join(state, actor, name),
        Command::Leave => leave(state, actor),
        Command::StartGame => start_game(state, actor),
        Command::AbilityUse { action, targets } => ability_use(state, actor, *action, targets),
        Command::Nominate { nominee } => nominate(state, actor, *nominee),
        Command::Second { nomination_id } => second(state, actor, *nomination_id),
        Command::VoteCast { nomination_id, yes } => vote_cast(state, actor, *nomination_id, *yes),
        Command::VoteClose { nomination_id } => vote_close(state, actor, *nomination_id),
        Command::Execute { target } => execute(state, actor, *target),
        Command::PhaseAdvance { to } => phase_advance(state, actor, *to),
        Command::SlayerShot { target } => slayer_shot(state, actor, *target),
        Command::Whisper { to, text } => whisper(state, actor, *to, text),
        Command::DmRevealRole { target } => dm_reveal_role(state, actor, *target),
        Command::DmAssignRole {
            target,
            role,
            believed_role,
        } => dm_assign_role(state, actor, *target, *role, *believed_role),
        Command::DmSetReminder {
            target,
            reminder,
            clear,
        } => dm_set_reminder(state, actor, *target, reminder, *clear),
        Command::EndGame { winner } => end_game(state, actor, *winner),
    }
}

fn require_dm(state: &RoomState, actor: &UserId) -> Result<(), CommandError> {
    if *actor != state.dm_user_id {
        return Err(CommandError::forbidden("only the storyteller may do this"));
    }
    Ok(())
}

fn join(state: &RoomState, actor: UserId, name: &str) -> Decision {
    if actor == state.dm_user_id {
        return Err(CommandError::bad_request(
            "the storyteller does not take a seat",
        ));
    }
    validate_player_name(name).map_err(CommandError::bad_request)?;
    if state.is_seated(&actor) {
        return Err(CommandError::conflict("already seated in this room"));
    }
    match state.status {
        RoomStatus::Lobby => {
            if state.seat_order.len() >= MAX_SEATS {
                return Err(CommandError::conflict("the room is full"));
            }
            Ok(vec![EventPayload::PlayerJoined {
                user_id: actor,
                name: name.to_string(),
                seat: Some(state.seat_order.len()),
                observer: false,
            }])
        }
        RoomStatus::Active => {
            if state.observers.contains(&actor) {
                return Err(CommandError::conflict("already watching this room"));
            }
            Ok(vec![EventPayload::PlayerJoined {
                user_id: actor,
                name: name.to_string(),
                seat: None,
                observer: true,
            }])
        }
        RoomStatus::Ended => Err(CommandError::bad_request("the game has ended")),
    }
}

fn leave(state: &RoomState, actor: UserId) -> Decision {
    if state.is_seated(&actor) {
        Ok(vec![EventPayload::PlayerLeft {
            user_id: actor,
            seated: true,
        }])
    } else if state.observers.contains(&actor) {
        Ok(vec![EventPayload::PlayerLeft {
            user_id: actor,
            seated: false,
        }])
    } else {
        Err(CommandError::bad_request("not in this room"))
    }
}

fn start_game(state: &RoomState, actor: UserId) -> Decision {
    require_dm(state, &actor)?;
    if state.phase != Phase::Lobby {
        return Err(CommandError::bad_request("the game has already started"));
    }
    let seats = state.seat_order.len();
    if seats < MIN_PLAYERS {
        return Err(CommandError::bad_request(format!(
            "need at least {MIN_PLAYERS} seated players, have {seats}"
        )));
    }

    let mut batch = Batch::new(state);
    let deal = deal_roles(state);

    batch.push(EventPayload::RolesDistributed {
        players: seats,
        townsfolk: deal.townsfolk,
        outsiders: deal.outsiders,
        minions: deal.minions.len(),
        demons: 1,
    });
    for (user_id, role, true_role) in &deal.assignments {
        batch.push(EventPayload::RoleAssigned {
            user_id: *user_id,
            role: *role,
            true_role: *true_role,
            team: true_role.team(),
        });
    }
    batch.push(EventPayload::MinionsRevealed {
        demon: deal.demon,
        minions: deal.minions.clone(),
    });
    if let Some(red_herring) = deal.red_herring {
        batch.push(EventPayload::ReminderSet {
            target: red_herring,
            reminder: REMINDER_RED_HERRING.to_string(),
            cleared: false,
        });
    }
    batch.push(EventPayload::PhaseChanged {
        phase: Phase::FirstNight,
        day_number: 0,
    });
    Ok(batch.events)
}

struct Deal {
    assignments: Vec<(UserId, RoleId, RoleId)>,
    demon: UserId,
    minions: Vec<UserId>,
    townsfolk: usize,
    outsiders: usize,
    red_herring: Option<UserId>,
}

/// Deal roles to every seat without one, honoring any `dm.assign_role`
/// overrides made in the lobby. One RNG batch covers the whole deal.
fn deal_roles(state: &RoomState) -> Deal {
    let mut rng = draw_rng(state.seed, state.rng_draws);
    let seats = state.seat_order.len();
    let (base_t, base_o, base_m) = distribution(seats);

    let preassigned: Vec<(UserId, RoleId)> = state
        .seat_order
        .iter()
        .filter_map(|id| {
            state
                .player(id)
                .and_then(|p| p.true_role)
                .map(|r| (*id, r))
        })
        .collect();
    let pre_roles: Vec<RoleId> = preassigned.iter().map(|(_, r)| r).copied().collect();
    let pre_count = |kind: RoleKind| pre_roles.iter().filter(|r| r.kind() == kind).count();

    // Minions first: the baron bends the outsider/townsfolk split.
    let mut minion_roles: Vec<RoleId> = MINION_POOL
        .iter()
        .filter(|r| !pre_roles.contains(r))
        .copied()
        .collect();
    minion_roles.shuffle(&mut rng);
    let minions_needed = base_m.saturating_sub(pre_count(RoleKind::Minion));
    let dealt_minions: Vec<RoleId> = minion_roles.into_iter().take(minions_needed).collect();

    let baron_in_play = pre_roles.contains(&RoleId::Baron) || dealt_minions.contains(&RoleId::Baron);
    let total_minions = pre_count(RoleKind::Minion) + dealt_minions.len();
    let mut total_outsiders = base_o + if baron_in_play { 2 } else { 0 };
    total_outsiders = total_outsiders
        .min(OUTSIDER_POOL.len())
        .max(pre_count(RoleKind::Outsider));
    let demons_needed = 1usize.saturating_sub(pre_count(RoleKind::Demon));
    let total_townsfolk = seats
        .saturating_sub(total_minions)
        .saturating_sub(total_outsiders)
        .saturating_sub(1);

    let mut outsider_roles: Vec<RoleId> = OUTSIDER_POOL
        .iter()
        .filter(|r| !pre_roles.contains(r))
        .copied()
        .collect();
    outsider_roles.shuffle(&mut rng);
    let outsiders_needed = total_outsiders.saturating_sub(pre_count(RoleKind::Outsider));
    let dealt_outsiders: Vec<RoleId> = outsider_roles.into_iter().take(outsiders_needed).collect();

    let mut townsfolk_roles: Vec<RoleId> = TOWNSFOLK_POOL
        .iter()
        .filter(|r| !pre_roles.contains(r))
        .copied()
        .collect();
    townsfolk_roles.shuffle(&mut rng);
    let townsfolk_needed = total_townsfolk.saturating_sub(pre_count(RoleKind::Townsfolk));
    let mut dealt_townsfolk: Vec<RoleId> = Vec::with_capacity(townsfolk_needed);
    for i in 0..townsfolk_needed {
        // Oversized tables cycle the pool rather than fail the deal.
        dealt_townsfolk.push(townsfolk_roles[i % townsfolk_roles.len()]);
    }

    let mut dealt: Vec<RoleId> = Vec::with_capacity(seats - preassigned.len());
    dealt.extend((0..demons_needed).map(|_| RoleId::Imp));
    dealt.extend(&dealt_minions);
    dealt.extend(&dealt_outsiders);
    dealt.extend(&dealt_townsfolk);
    dealt.shuffle(&mut rng);

    let unassigned: Vec<UserId> = state
        .seat_order
        .iter()
        .filter(|id| {
            state
                .player(id)
                .map(|p| p.true_role.is_none())
                .unwrap_or(false)
        })
        .copied()
        .collect();

    // The drunk believes they are a townsfolk role that is not in play.
    let in_play: Vec<RoleId> = pre_roles.iter().chain(dealt.iter()).copied().collect();
    let spare_townsfolk: Vec<RoleId> = TOWNSFOLK_POOL
        .iter()
        .filter(|r| !in_play.contains(r))
        .copied()
        .collect();

    let mut assignments: Vec<(UserId, RoleId, RoleId)> = Vec::with_capacity(seats);
    for (user_id, true_role) in &preassigned {
        let believed = state
            .player(user_id)
            .and_then(|p| p.role)
            .unwrap_or(*true_role);
        assignments.push((*user_id, believed, *true_role));
    }
    for (user_id, true_role) in unassigned.iter().zip(dealt.iter()) {
        let believed = if *true_role == RoleId::Drunk && !spare_townsfolk.is_empty() {
            spare_townsfolk[rng.random_range(0..spare_townsfolk.len())]
        } else {
            *true_role
        };
        assignments.push((*user_id, believed, *true_role));
    }

    let demon = assignments
        .iter()
        .find(|(_, _, r)| r.kind() == RoleKind::Demon)
        .map(|(id, _, _)| *id)
        .unwrap_or_else(|| state.seat_order[0]);
    let minions: Vec<UserId> = assignments
        .iter()
        .filter(|(_, _, r)| r.kind() == RoleKind::Minion)
        .map(|(id, _, _)| *id)
        .collect();

    let fortune_teller_in_play = assignments
        .iter()
        .any(|(_, believed, _)| *believed == RoleId::FortuneTeller);
    let red_herring = if fortune_teller_in_play {
        let good: Vec<UserId> = assignments
            .iter()
            .filter(|(_, _, r)| r.team() == Team::Good)
            .map(|(id, _, _)| *id)
            .collect();
        if good.is_empty() {
            None
        } else {
            Some(good[rng.random_range(0..good.len())])
        }
    } else {
        None
    };

    Deal {
        assignments,
        demon,
        minions,
        townsfolk: total_townsfolk,
        outsiders: total_outsiders,
        red_herring,
    }
}

fn ability_use(
    state: &RoomState,
    actor: UserId,
    action: AbilityAction,
    targets: &[UserId],
) -> Decision {
    if !state.phase.is_night() {
        return Err(CommandError::forbidden("abilities resolve at night"));
    }
    let player = state
        .player(&actor)
        .ok_or_else(|| CommandError::forbidden("not seated in this room"))?;
    if !player.alive {
        return Err(CommandError::forbidden("dead players do not act at night"));
    }
    let role = player
        .role
        .ok_or_else(|| CommandError::bad_request("no role has been dealt yet"))?;
    let slot = night_slot(role)
        .filter(|_| night_slot_is_active(role))
        .ok_or_else(|| CommandError::bad_request("your role does not act at night"))?;

    let expected_action = match role {
        RoleId::Poisoner => AbilityAction::Poison,
        RoleId::Monk => AbilityAction::Protect,
        RoleId::Imp => AbilityAction::Kill,
        _ => AbilityAction::Learn,
    };
    if action != expected_action {
        return Err(CommandError::bad_request(format!(
            "role {role} cannot perform that action"
        )));
    }

    let expected_targets = match role {
        RoleId::Poisoner | RoleId::Monk | RoleId::Imp => 1,
        RoleId::FortuneTeller => 2,
        _ => 0,
    };
    if targets.len() != expected_targets {
        return Err(CommandError::bad_request(format!(
            "role {role} expects {expected_targets} target(s)"
        )));
    }
    for target in targets {
        if !state.player(target).map(|p| p.alive).unwrap_or(false) {
            return Err(CommandError::bad_request("target is not a living player"));
        }
    }
    if role == RoleId::Monk && targets.first() == Some(&actor) {
        return Err(CommandError::bad_request("the monk cannot protect himself"));
    }
    if role == RoleId::Imp && state.phase == Phase::FirstNight {
        return Err(CommandError::bad_request(
            "the demon does not kill on the first night",
        ));
    }

    if slot < state.night_order_cursor {
        return Err(CommandError::conflict("that slot has already resolved"));
    }
    if state.pending_night_actions.contains_key(&slot) {
        return Err(CommandError::conflict("already acted tonight"));
    }

    let mut batch = Batch::new(state);
    batch.push(EventPayload::NightActionSubmitted {
        actor,
        role,
        action,
        targets: targets.to_vec(),
    });
    resolve_night_queue(&mut batch);
    // When the submission resolved in this same batch, the invocation is
    // already in the log and replay does not need the buffering event.
    if batch.state.night_order_cursor > slot {
        batch
            .events
            .retain(|e| !matches!(e, EventPayload::NightActionSubmitted { .. }));
    }
    Ok(batch.events)
}

/// Resolve every consecutive night slot from the cursor that either has a
/// buffered action or no living player to act, preserving the static
/// priority order regardless of submission order.
fn resolve_night_queue(batch: &mut Batch) {
    while !batch.ended() {
        let cursor = batch.state.night_order_cursor;
        if cursor >= NIGHT_ORDER.len() {
            break;
        }
        let role = NIGHT_ORDER[cursor];
        let actor_present = batch.state.seat_order.iter().any(|id| {
            batch
                .state
                .player(id)
                .map(|p| p.alive && p.role == Some(role))
                .unwrap_or(false)
        });
        let awaits_submission = actor_present
            && night_slot_is_active(role)
            && !(role == RoleId::Imp && batch.state.phase == Phase::FirstNight);

        if let Some(action) = batch.state.pending_night_actions.get(&cursor).cloned() {
            resolve_night_action(batch, role, &action);
        } else if awaits_submission {
            break;
        } else {
            batch.state.night_order_cursor = cursor + 1;
        }
    }
}

fn resolve_night_action(
    batch: &mut Batch,
    role: RoleId,
    action: &super::state::NightAction,
) {
    let actor = action.actor;
    batch.push(EventPayload::AbilityInvoked {
        actor,
        role,
        action: action.action,
        targets: action.targets.clone(),
    });
    let truthful = !batch.state.is_impaired(&actor);

    match role {
        RoleId::Poisoner | RoleId::Monk => {
            // Tag effects are applied by the state fold.
        }
        RoleId::Spy => {
            let info = grimoire_view(&batch.state);
            batch.push(EventPayload::InformationDelivered {
                recipient: actor,
                info,
                truthful,
            });
        }
        RoleId::Empath => {
            let evil = batch
                .state
                .living_neighbors(&actor)
                .iter()
                .filter(|id| registers_evil(&batch.state, id))
                .count();
            batch.push(EventPayload::InformationDelivered {
                recipient: actor,
                info: serde_json::json!({ "evil_neighbors": evil }),
                truthful,
            });
        }
        RoleId::FortuneTeller => {
            let detected = action.targets.iter().any(|id| {
                registers_as_demon(&batch.state, id)
                    || batch
                        .state
                        .player(id)
                        .map(|p| p.has_reminder(REMINDER_RED_HERRING))
                        .unwrap_or(false)
            });
            batch.push(EventPayload::InformationDelivered {
                recipient: actor,
                info: serde_json::json!({ "demon_detected": detected }),
                truthful,
            });
        }
        RoleId::Undertaker => {
            let executed_role = batch
                .state
                .last_execution
                .as_ref()
                .filter(|e| e.day == batch.state.day_number)
                .and_then(|e| e.role);
            batch.push(EventPayload::InformationDelivered {
                recipient: actor,
                info: serde_json::json!({
                    "executed_role": executed_role.map(|r| r.as_str()),
                }),
                truthful,
            });
        }
        RoleId::Imp => {
            let Some(target) = action.targets.first().copied() else {
                return;
            };
            if target == actor {
                // Starpass: the demon dies now so demonhood can move
                // before dawn.
                if !batch.state.is_impaired(&actor) {
                    batch.push(EventPayload::PlayerDied {
                        user_id: actor,
                        cause: DeathCause::Demon,
                    });
                    handle_demon_death(batch, actor);
                }
            }
            // Kills on others buffer into deaths_pending via the state
            // fold and surface at dawn.
        }
        _ => {}
    }
}

/// Spy registers good; recluse registers evil. Deterministic stand-ins for
/// the storyteller's "may register as" latitude.
fn registers_evil(state: &RoomState, user_id: &UserId) -> bool {
    match state.player(user_id).and_then(|p| p.true_role) {
        Some(RoleId::Spy) => false,
        Some(RoleId::Recluse) => true,
        Some(role) => role.team() == Team::Evil,
        None => false,
    }
}

fn registers_as_demon(state: &RoomState, user_id: &UserId) -> bool {
    match state.player(user_id).and_then(|p| p.true_role) {
        Some(RoleId::Recluse) => true,
        Some(role) => role.kind() == RoleKind::Demon,
        None => false,
    }
}

/// The spy's grimoire: true roles and reminders for every seat.
fn grimoire_view(state: &RoomState) -> serde_json::Value {
    let seats: Vec<serde_json::Value> = state
        .seat_order
        .iter()
        .filter_map(|id| state.player(id).map(|p| (id, p)))
        .map(|(id, p)| {
            serde_json::json!({
                "user_id": id,
                "name": p.name,
                "role": p.true_role.map(|r| r.as_str()),
                "alive": p.alive,
                "reminders": p.reminders,
            })
        })
        .collect();
    serde_json::json!({ "grimoire": seats })
}

/// Demonhood fallback on demon death. Emits `demon.changed` before any win
/// check; good wins only when no living minion remains.
fn handle_demon_death(batch: &mut Batch, dead_demon: UserId) {
    let sw = batch
        .state
        .seat_order
        .iter()
        .find(|id| {
            batch
                .state
                .player(id)
                .map(|p| p.alive && p.true_role == Some(RoleId::ScarletWoman))
                .unwrap_or(false)
        })
        .copied();
    let fallback = sw.or_else(|| {
        // Deterministic tie-break: earliest living minion in seat order.
        batch
            .state
            .seat_order
            .iter()
            .find(|id| {
                batch
                    .state
                    .player(id)
                    .map(|p| {
                        p.alive
                            && p.true_role.map(|r| r.kind() == RoleKind::Minion).unwrap_or(false)
                    })
                    .unwrap_or(false)
            })
            .copied()
    });

    match fallback {
        Some(new_demon) => {
            batch.push(EventPayload::DemonChanged {
                new_demon,
                previous: dead_demon,
            });
        }
        None => {
            batch.push(EventPayload::GameEnded {
                winner: Winner::Good,
                reason: "the demon is dead".to_string(),
            });
        }
    }
}

/// Evil wins when two or fewer players stand and the demon is among them.
/// Assessed in day context (executions, slayer shots, dawn); the night's
/// own arithmetic waits for dawn.
fn check_evil_majority(batch: &mut Batch) {
    if batch.ended() {
        return;
    }
    let demon_alive = batch
        .state
        .demon_id
        .and_then(|id| batch.state.player(&id))
        .map(|p| p.alive)
        .unwrap_or(false);
    if demon_alive && batch.state.alive_count() <= 2 {
        batch.push(EventPayload::GameEnded {
            winner: Winner::Evil,
            reason: "the demon cannot be stopped".to_string(),
        });
    }
}

fn nominate(state: &RoomState, actor: UserId, nominee: UserId) -> Decision {
    if state.phase != Phase::Day {
        return Err(CommandError::forbidden(
            "nominations are only open during the day",
        ));
    }
    let player = state
        .player(&actor)
        .ok_or_else(|| CommandError::forbidden("not seated in this room"))?;
    if !player.alive {
        return Err(CommandError::forbidden("dead players cannot nominate"));
    }
    if state.nominators_today.contains(&actor) {
        return Err(CommandError::conflict("you have already nominated today"));
    }
    if !state.player(&nominee).map(|p| p.alive).unwrap_or(false) {
        return Err(CommandError::bad_request("nominee is not a living player"));
    }
    if state.nominees_today.contains(&nominee) {
        return Err(CommandError::conflict(
            "that player was already nominated today",
        ));
    }
    let mut batch = Batch::new(state);
    batch.push(EventPayload::NominationOpened {
        nomination_id: state.next_nomination_id,
        nominator: actor,
        nominee,
        threshold: state.vote_threshold(),
    });
    batch.push(EventPayload::PhaseChanged {
        phase: Phase::Nomination,
        day_number: state.day_number,
    });
    Ok(batch.events)
}

fn second(state: &RoomState, actor: UserId, nomination_id: u64) -> Decision {
    if state.phase != Phase::Nomination {
        return Err(CommandError::forbidden("no nomination is on the floor"));
    }
    let nomination = state
        .open_nomination()
        .ok_or_else(|| CommandError::not_found("no open nomination"))?;
    if nomination.id != nomination_id {
        return Err(CommandError::conflict("that nomination has closed"));
    }
    let player = state
        .player(&actor)
        .ok_or_else(|| CommandError::forbidden("not seated in this room"))?;
    if !player.alive {
        return Err(CommandError::forbidden("dead players cannot second"));
    }
    if nomination.nominator == actor {
        return Err(CommandError::bad_request(
            "the nominator cannot second their own nomination",
        ));
    }
    if nomination.seconded_by.contains(&actor) {
        return Err(CommandError::conflict("already seconded"));
    }
    Ok(vec![EventPayload::NominationSeconded {
        nomination_id,
        seconder: actor,
    }])
}

fn vote_cast(state: &RoomState, actor: UserId, nomination_id: u64, yes: bool) -> Decision {
    if state.phase != Phase::Nomination {
        return Err(CommandError::forbidden("no vote is in progress"));
    }
    let nomination = state
        .open_nomination()
        .ok_or_else(|| CommandError::not_found("no open nomination"))?;
    if nomination.id != nomination_id {
        return Err(CommandError::conflict("that nomination has closed"));
    }
    let player = state
        .player(&actor)
        .ok_or_else(|| CommandError::forbidden("not seated in this room"))?;
    let ghost = !player.alive;
    if ghost && player.ghost_vote_used {
        return Err(CommandError::forbidden("ghost vote already spent"));
    }
    if nomination.vote_of(&actor).is_some() {
        return Err(CommandError::conflict("already voted on this nomination"));
    }
    Ok(vec![EventPayload::VoteRecorded {
        nomination_id,
        voter: actor,
        yes,
        ghost,
    }])
}

fn vote_close(state: &RoomState, actor: UserId, nomination_id: u64) -> Decision {
    require_dm(state, &actor)?;
    if state.phase != Phase::Nomination {
        return Err(CommandError::bad_request("no vote is in progress"));
    }
    let nomination = state
        .open_nomination()
        .ok_or_else(|| CommandError::not_found("no open nomination"))?;
    if nomination.id != nomination_id {
        return Err(CommandError::conflict("that nomination has closed"));
    }

    let yes = nomination.yes_count();
    let no = nomination.no_count();
    let threshold = nomination.threshold;
    let nominee = nomination.nominee;

    let outcome = if yes < threshold {
        TallyOutcome::Insufficient
    } else {
        match state.top_tally_today {
            Some(top) if yes < top => TallyOutcome::Insufficient,
            Some(top) if yes == top => TallyOutcome::Tie,
            _ => TallyOutcome::Scheduled,
        }
    };

    let mut batch = Batch::new(state);
    batch.push(EventPayload::VoteTallied {
        nomination_id,
        yes,
        no,
        threshold,
        outcome,
    });
    if outcome == TallyOutcome::Scheduled {
        batch.push(EventPayload::ExecutionScheduled {
            nomination_id,
            nominee,
        });
    }
    batch.push(EventPayload::PhaseChanged {
        phase: Phase::Day,
        day_number: state.day_number,
    });
    Ok(batch.events)
}

fn execute(state: &RoomState, actor: UserId, target: Option<UserId>) -> Decision {
    require_dm(state, &actor)?;
    if !state.phase.is_day() {
        return Err(CommandError::bad_request(
            "executions happen during the day",
        ));
    }
    if state.executed_today.is_some() {
        return Err(CommandError::conflict("someone was already executed today"));
    }
    let scheduled = state.scheduled_execution;
    let target = target
        .or(scheduled.map(|(_, nominee)| nominee))
        .ok_or_else(|| CommandError::bad_request("no execution is scheduled"))?;
    let victim = state
        .player(&target)
        .ok_or_else(|| CommandError::bad_request("target is not seated"))?;
    if !victim.alive {
        return Err(CommandError::bad_request("target is already dead"));
    }
    let nomination_id = scheduled
        .filter(|(_, nominee)| *nominee == target)
        .map(|(id, _)| id);

    let mut batch = Batch::new(state);
    batch.push(EventPayload::PlayerExecuted {
        user_id: target,
        nomination_id,
    });
    batch.push(EventPayload::PlayerDied {
        user_id: target,
        cause: DeathCause::Execution,
    });

    // An executed saint hands evil the game, unless impaired.
    let is_saint =
        state.player(&target).and_then(|p| p.true_role) == Some(RoleId::Saint);
    if is_saint && !state.is_impaired(&target) {
        batch.push(EventPayload::GameEnded {
            winner: Winner::Evil,
            reason: "the town executed the saint".to_string(),
        });
        return Ok(batch.events);
    }

    if state.demon_id == Some(target) {
        handle_demon_death(&mut batch, target);
    }
    check_evil_majority(&mut batch);
    Ok(batch.events)
}

fn phase_advance(state: &RoomState, actor: UserId, to: PhaseTarget) -> Decision {
    require_dm(state, &actor)?;
    match (state.phase, to) {
        (Phase::FirstNight | Phase::Night, PhaseTarget::Day) => dawn(state),
        (Phase::Day, PhaseTarget::Night) => dusk(state),
        (Phase::Nomination, PhaseTarget::Night) => Err(CommandError::bad_request(
            "close the open nomination before nightfall",
        )),
        (from, to) => Err(CommandError::bad_request(format!(
            "cannot advance from {from:?} to {to:?}"
        ))),
    }
}

fn dawn(state: &RoomState) -> Decision {
    let mut batch = Batch::new(state);
    let deaths = state.deaths_pending.clone();
    for user_id in &deaths {
        if batch.ended() {
            break;
        }
        batch.push(EventPayload::PlayerDied {
            user_id: *user_id,
            cause: DeathCause::Demon,
        });
        if batch.state.demon_id == Some(*user_id) {
            handle_demon_death(&mut batch, *user_id);
        }
    }
    if !batch.ended() {
        batch.push(EventPayload::DeathsAnnounced { deaths });
        let day_number = state.day_number + 1;
        batch.push(EventPayload::DayNumberIncremented { day_number });
        batch.push(EventPayload::PhaseChanged {
            phase: Phase::Day,
            day_number,
        });
        check_evil_majority(&mut batch);
    }
    Ok(batch.events)
}

fn dusk(state: &RoomState) -> Decision {
    let mut batch = Batch::new(state);

    // Mayor: three alive at dusk with no execution is a good win.
    let mayor_standing = state.seat_order.iter().any(|id| {
        state
            .player(id)
            .map(|p| p.alive && p.true_role == Some(RoleId::Mayor) && !state.is_impaired(id))
            .unwrap_or(false)
    });
    if mayor_standing && state.alive_count() == 3 && state.executed_today.is_none() {
        batch.push(EventPayload::GameEnded {
            winner: Winner::Good,
            reason: "three survived to dusk with no execution".to_string(),
        });
        return Ok(batch.events);
    }

    batch.push(EventPayload::PhaseChanged {
        phase: Phase::Night,
        day_number: state.day_number,
    });
    // Passive and absent slots at the head of the order resolve on their
    // own; this also lets an undertaker-less night finish cleanly.
    resolve_night_queue(&mut batch);
    Ok(batch.events)
}

fn slayer_shot(state: &RoomState, actor: UserId, target: UserId) -> Decision {
    if !state.phase.is_day() {
        return Err(CommandError::forbidden(
            "the slayer fires during the day",
        ));
    }
    let player = state
        .player(&actor)
        .ok_or_else(|| CommandError::forbidden("not seated in this room"))?;
    if !player.alive {
        return Err(CommandError::forbidden("dead players have no abilities"));
    }
    if player.role != Some(RoleId::Slayer) {
        return Err(CommandError::forbidden("only the slayer may do this"));
    }
    if player.has_reminder(REMINDER_SLAYER_USED) {
        return Err(CommandError::bad_request("the slayer's shot is spent"));
    }
    if !state.player(&target).map(|p| p.alive).unwrap_or(false) {
        return Err(CommandError::bad_request("target is not a living player"));
    }

    let mut batch = Batch::new(state);
    batch.push(EventPayload::AbilityInvoked {
        actor,
        role: RoleId::Slayer,
        action: AbilityAction::Kill,
        targets: vec![target],
    });
    let hits = !state.is_impaired(&actor)
        && state.player(&target).and_then(|p| p.true_role).map(|r| r.kind())
            == Some(RoleKind::Demon);
    if hits {
        batch.push(EventPayload::PlayerDied {
            user_id: target,
            cause: DeathCause::Slayer,
        });
        handle_demon_death(&mut batch, target);
        check_evil_majority(&mut batch);
    }
    Ok(batch.events)
}

fn whisper(state: &RoomState, actor: UserId, to: UserId, text: &str) -> Decision {
    if state.phase == Phase::Lobby {
        return Err(CommandError::bad_request("the game has not started"));
    }
    if text.is_empty() || text.len() > MAX_WHISPER_LENGTH {
        return Err(CommandError::bad_request(format!(
            "whisper must be 1..={MAX_WHISPER_LENGTH} bytes"
        )));
    }
    let sender_ok = actor == state.dm_user_id || state.is_seated(&actor);
    let recipient_ok = to == state.dm_user_id || state.is_seated(&to);
    if !sender_ok {
        return Err(CommandError::forbidden("not seated in this room"));
    }
    if !recipient_ok {
        return Err(CommandError::bad_request("recipient is not in this room"));
    }
    if actor == to {
        return Err(CommandError::bad_request("cannot whisper to yourself"));
    }
    Ok(vec![EventPayload::WhisperSent {
        from: actor,
        to,
        text: text.to_string(),
    }])
}

fn dm_reveal_role(state: &RoomState, actor: UserId, target: UserId) -> Decision {
    require_dm(state, &actor)?;
    let role = state
        .player(&target)
        .and_then(|p| p.true_role)
        .ok_or_else(|| CommandError::bad_request("that seat has no role to reveal"))?;
    Ok(vec![EventPayload::RoleRevealed {
        user_id: target,
        role,
    }])
}

fn dm_assign_role(
    state: &RoomState,
    actor: UserId,
    target: UserId,
    role: RoleId,
    believed_role: Option<RoleId>,
) -> Decision {
    require_dm(state, &actor)?;
    if state.phase != Phase::Lobby {
        return Err(CommandError::bad_request(
            "roles can only be assigned before the deal",
        ));
    }
    if !state.is_seated(&target) {
        return Err(CommandError::bad_request("target is not seated"));
    }
    Ok(vec![EventPayload::RoleAssigned {
        user_id: target,
        role: believed_role.unwrap_or(role),
        true_role: role,
        team: role.team(),
    }])
}

fn dm_set_reminder(
    state: &RoomState,
    actor: UserId,
    target: UserId,
    reminder: &str,
    clear: bool,
) -> Decision {
    require_dm(state, &actor)?;
    if reminder.is_empty() || reminder.len() > MAX_REMINDER_LENGTH {
        return Err(CommandError::bad_request(format!(
            "reminder must be 1..={MAX_REMINDER_LENGTH} bytes"
        )));
    }
    if !state.is_seated(&target) {
        return Err(CommandError::bad_request("target is not seated"));
    }
    Ok(vec![EventPayload::ReminderSet {
        target,
        reminder: reminder.to_string(),
        cleared: clear,
    }])
}

fn end_game(state: &RoomState, actor: UserId, winner: DeclaredWinner) -> Decision {
    require_dm(state, &actor)?;
    let winner = match winner {
        DeclaredWinner::Good => Winner::Good,
        DeclaredWinner::Evil => Winner::Evil,
        DeclaredWinner::Draw => Winner::Draw,
    };
    Ok(vec![EventPayload::GameEnded {
        winner,
        reason: "storyteller ruling".to_string(),
    }])
}
