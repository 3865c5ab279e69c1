use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use super::command::AbilityAction;
use super::event::{EventPayload, EventRecord, Phase, TallyOutcome, Winner};
use super::roles::{RoleId, RoleKind, Team};
use crate::protocol::{CommandId, NominationId, RoomId, RoomStatus, Seq, UserId};

/// Reminder token set by the poisoner; cleared when the next night begins.
pub const REMINDER_POISONED: &str = "poisoned";
/// Reminder token set by the monk; cleared at dawn.
pub const REMINDER_PROTECTED: &str = "protected";
/// Fortune teller's decoy, chosen at setup.
pub const REMINDER_RED_HERRING: &str = "red_herring";
/// Slayer has fired their once-per-game shot.
pub const REMINDER_SLAYER_USED: &str = "slayer_used";

/// How many applied command ids the state remembers as a tombstone ring.
/// The durable dedup store is authoritative; this only guards replay.
const APPLIED_COMMAND_TOMBSTONES: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerState {
    pub name: String,
    pub seat: usize,
    /// What the player was told they are.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<RoleId>,
    /// What they actually are (differs for the drunk).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub true_role: Option<RoleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<Team>,
    pub alive: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reminders: Vec<String>,
    #[serde(default)]
    pub ghost_vote_used: bool,
    #[serde(default)]
    pub connected: bool,
    /// Set when the DM publicly revealed this seat's role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revealed_role: Option<RoleId>,
}

impl PlayerState {
    pub fn has_reminder(&self, token: &str) -> bool {
        self.reminders.iter().any(|r| r == token)
    }

    fn set_reminder(&mut self, token: &str) {
        if !self.has_reminder(token) {
            self.reminders.push(token.to_string());
        }
    }

    fn clear_reminder(&mut self, token: &str) {
        self.reminders.retain(|r| r != token);
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NominationStatus {
    Open,
    ClosedExec,
    ClosedNoExec,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoteEntry {
    pub voter: UserId,
    pub yes: bool,
    #[serde(default)]
    pub ghost: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Nomination {
    pub id: NominationId,
    pub day: u32,
    pub nominator: UserId,
    pub nominee: UserId,
    pub threshold: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seconded_by: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub votes: Vec<VoteEntry>,
    pub status: NominationStatus,
}

impl Nomination {
    pub fn vote_of(&self, voter: &UserId) -> Option<&VoteEntry> {
        self.votes.iter().find(|v| v.voter == *voter)
    }

    pub fn yes_count(&self) -> usize {
        self.votes.iter().filter(|v| v.yes).count()
    }

    pub fn no_count(&self) -> usize {
        self.votes.iter().filter(|v| !v.yes).count()
    }
}

/// A buffered night action, keyed in `pending_night_actions` by its slot in
/// the static night order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NightAction {
    pub actor: UserId,
    pub action: AbilityAction,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<UserId>,
}

/// Most recent execution, remembered across the night for the undertaker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastExecution {
    pub day: u32,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<RoleId>,
}

/// Full reducer-owned state of one room. Pure data: every mutation happens
/// in [`RoomState::apply`], driven exclusively by the event log, so folding
/// the same events always produces the same state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomState {
    pub room_id: RoomId,
    pub created_by: UserId,
    pub dm_user_id: UserId,
    pub status: RoomStatus,
    pub phase: Phase,
    pub day_number: u32,
    pub seat_order: Vec<UserId>,
    pub players: HashMap<UserId, PlayerState>,
    pub observers: BTreeSet<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demon_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub minion_ids: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nominations: Vec<Nomination>,
    pub next_nomination_id: NominationId,
    /// Buffered night actions by night-order slot.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pending_night_actions: BTreeMap<usize, NightAction>,
    pub night_order_cursor: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_today: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_execution: Option<LastExecution>,
    /// Night kills waiting for dawn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deaths_pending: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_execution: Option<(NominationId, UserId)>,
    /// Highest yes-tally that reached threshold today.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_tally_today: Option<usize>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub nominators_today: BTreeSet<UserId>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub nominees_today: BTreeSet<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<Winner>,
    /// Per-room RNG seed, recorded in `room.created`.
    pub seed: u64,
    /// Number of RNG draw batches consumed so far.
    pub rng_draws: u64,
    /// Seq of the latest day-progress event; staleness-sensitive commands
    /// declaring an older `last_seen_seq` are rejected with `conflict`.
    pub stale_guard_seq: Seq,
    pub last_applied_seq: Seq,
    /// Recently applied command ids (replay guard; the dedup store is the
    /// authoritative record).
    #[serde(default, skip_serializing_if = "VecDeque::is_empty")]
    pub applied_commands: VecDeque<CommandId>,
}

impl RoomState {
    /// Empty pre-creation state; the `room.created` event fills it in.
    pub fn empty(room_id: RoomId) -> Self {
        Self {
            room_id,
            created_by: UserId::nil(),
            dm_user_id: UserId::nil(),
            status: RoomStatus::Lobby,
            phase: Phase::Lobby,
            day_number: 0,
            seat_order: Vec::new(),
            players: HashMap::new(),
            observers: BTreeSet::new(),
            demon_id: None,
            minion_ids: Vec::new(),
            nominations: Vec::new(),
            next_nomination_id: 1,
            pending_night_actions: BTreeMap::new(),
            night_order_cursor: 0,
            executed_today: None,
            last_execution: None,
            deaths_pending: Vec::new(),
            scheduled_execution: None,
            top_tally_today: None,
            nominators_today: BTreeSet::new(),
            nominees_today: BTreeSet::new(),
            winner: None,
            seed: 0,
            rng_draws: 0,
            stale_guard_seq: 0,
            last_applied_seq: 0,
            applied_commands: VecDeque::new(),
        }
    }

    pub fn player(&self, user_id: &UserId) -> Option<&PlayerState> {
        self.players.get(user_id)
    }

    pub fn is_seated(&self, user_id: &UserId) -> bool {
        self.players.contains_key(user_id)
    }

    pub fn is_member(&self, user_id: &UserId) -> bool {
        *user_id == self.dm_user_id || self.is_seated(user_id) || self.observers.contains(user_id)
    }

    pub fn alive_count(&self) -> usize {
        self.seat_order
            .iter()
            .filter(|id| self.players.get(*id).map(|p| p.alive).unwrap_or(false))
            .count()
    }

    /// Living players in seat order.
    pub fn living_in_seat_order(&self) -> Vec<UserId> {
        self.seat_order
            .iter()
            .filter(|id| self.players.get(*id).map(|p| p.alive).unwrap_or(false))
            .copied()
            .collect()
    }

    /// The two living neighbors of a seat (wrapping), excluding the seat
    /// itself. Empty when fewer than two other players live.
    pub fn living_neighbors(&self, user_id: &UserId) -> Vec<UserId> {
        let living = self.living_in_seat_order();
        let n = living.len();
        let Some(pos) = living.iter().position(|id| id == user_id) else {
            return Vec::new();
        };
        if n < 2 {
            return Vec::new();
        }
        let left = living[(pos + n - 1) % n];
        let right = living[(pos + 1) % n];
        if left == right {
            vec![left]
        } else {
            vec![left, right]
        }
    }

    /// Poisoned or natively drunk: information lies and abilities fizzle.
    pub fn is_impaired(&self, user_id: &UserId) -> bool {
        self.players
            .get(user_id)
            .map(|p| p.has_reminder(REMINDER_POISONED) || p.true_role == Some(RoleId::Drunk))
            .unwrap_or(false)
    }

    /// Vote threshold for a nomination opened now.
    pub fn vote_threshold(&self) -> usize {
        self.alive_count().div_ceil(2)
    }

    pub fn nomination(&self, id: NominationId) -> Option<&Nomination> {
        self.nominations.iter().find(|n| n.id == id)
    }

    pub fn open_nomination(&self) -> Option<&Nomination> {
        self.nominations
            .iter()
            .find(|n| n.status == NominationStatus::Open)
    }

    /// Whether this command id was applied recently. Replay guard only.
    pub fn command_recently_applied(&self, command_id: &CommandId) -> bool {
        self.applied_commands.contains(command_id)
    }

    /// Fold one event record into the state.
    ///
    /// This is total for well-formed logs: unknown event types fail at
    /// deserialization (schema drift is a replay error, not a skip), and a
    /// payload referencing an unknown player is ignored field-by-field
    /// rather than panicking.
    pub fn apply(&mut self, record: &EventRecord) {
        self.last_applied_seq = record.seq;

        if matches!(
            record.payload,
            EventPayload::PhaseChanged { .. }
                | EventPayload::NominationOpened { .. }
                | EventPayload::VoteTallied { .. }
                | EventPayload::ExecutionScheduled { .. }
        ) {
            self.stale_guard_seq = record.seq;
        }

        if self.applied_commands.back() != Some(&record.causation_command_id) {
            self.applied_commands.push_back(record.causation_command_id);
            while self.applied_commands.len() > APPLIED_COMMAND_TOMBSTONES {
                self.applied_commands.pop_front();
            }
        }

        match &record.payload {
            EventPayload::RoomCreated {
                created_by,
                dm_user_id,
                seed,
            } => {
                self.created_by = *created_by;
                self.dm_user_id = *dm_user_id;
                self.seed = *seed;
                self.status = RoomStatus::Lobby;
                self.phase = Phase::Lobby;
            }
            EventPayload::PlayerJoined {
                user_id,
                name,
                seat,
                observer,
            } => {
                if *observer {
                    self.observers.insert(*user_id);
                } else if let Some(seat) = seat {
                    self.seat_order.push(*user_id);
                    self.players.insert(
                        *user_id,
                        PlayerState {
                            name: name.clone(),
                            seat: *seat,
                            role: None,
                            true_role: None,
                            team: None,
                            alive: true,
                            reminders: Vec::new(),
                            ghost_vote_used: false,
                            connected: true,
                            revealed_role: None,
                        },
                    );
                }
            }
            EventPayload::PlayerLeft { user_id, seated } => {
                if *seated {
                    if self.phase == Phase::Lobby {
                        self.seat_order.retain(|id| id != user_id);
                        self.players.remove(user_id);
                        for (i, id) in self.seat_order.iter().enumerate() {
                            if let Some(p) = self.players.get_mut(id) {
                                p.seat = i;
                            }
                        }
                    } else if let Some(p) = self.players.get_mut(user_id) {
                        p.connected = false;
                    }
                } else {
                    self.observers.remove(user_id);
                }
            }
            EventPayload::RolesDistributed { .. } => {
                // The deal consumed one RNG batch (shuffle + red herring).
                self.rng_draws += 1;
            }
            EventPayload::RoleAssigned {
                user_id,
                role,
                true_role,
                team,
            } => {
                if let Some(p) = self.players.get_mut(user_id) {
                    p.role = Some(*role);
                    p.true_role = Some(*true_role);
                    p.team = Some(*team);
                }
                match true_role.kind() {
                    RoleKind::Demon => self.demon_id = Some(*user_id),
                    RoleKind::Minion => {
                        if !self.minion_ids.contains(user_id) {
                            self.minion_ids.push(*user_id);
                        }
                    }
                    _ => {
                        self.minion_ids.retain(|id| id != user_id);
                        if self.demon_id == Some(*user_id) {
                            self.demon_id = None;
                        }
                    }
                }
            }
            EventPayload::MinionsRevealed { demon, minions } => {
                self.demon_id = Some(*demon);
                self.minion_ids = minions.clone();
            }
            EventPayload::PhaseChanged { phase, day_number } => {
                let entering_night = phase.is_night() && !self.phase.is_night();
                let entering_day = *phase == Phase::Day && !self.phase.is_day();
                self.phase = *phase;
                self.day_number = *day_number;
                match phase {
                    Phase::FirstNight => self.status = RoomStatus::Active,
                    Phase::Ended => self.status = RoomStatus::Ended,
                    _ => {}
                }
                if entering_night {
                    self.begin_night();
                }
                if entering_day {
                    self.begin_day();
                }
            }
            EventPayload::DayNumberIncremented { day_number } => {
                self.day_number = *day_number;
            }
            EventPayload::NightActionSubmitted {
                actor,
                role,
                action,
                targets,
            } => {
                if let Some(slot) = super::roles::night_slot(*role) {
                    self.pending_night_actions.insert(
                        slot,
                        NightAction {
                            actor: *actor,
                            action: *action,
                            targets: targets.clone(),
                        },
                    );
                }
            }
            EventPayload::AbilityInvoked {
                actor,
                role,
                action,
                targets,
            } => {
                if self.phase.is_night() {
                    if let Some(slot) = super::roles::night_slot(*role) {
                        self.pending_night_actions.remove(&slot);
                        self.night_order_cursor = self.night_order_cursor.max(slot + 1);
                    }
                }
                self.apply_ability(*actor, *role, *action, targets);
            }
            EventPayload::InformationDelivered { .. } | EventPayload::WhisperSent { .. } => {}
            EventPayload::PlayerDied { user_id, .. } => {
                if let Some(p) = self.players.get_mut(user_id) {
                    p.alive = false;
                }
                self.deaths_pending.retain(|id| id != user_id);
            }
            EventPayload::DeathsAnnounced { .. } => {
                self.deaths_pending.clear();
            }
            EventPayload::DemonChanged { new_demon, .. } => {
                self.demon_id = Some(*new_demon);
                self.minion_ids.retain(|id| id != new_demon);
                if let Some(p) = self.players.get_mut(new_demon) {
                    p.true_role = Some(RoleId::Imp);
                    p.role = Some(RoleId::Imp);
                }
            }
            EventPayload::NominationOpened {
                nomination_id,
                nominator,
                nominee,
                threshold,
            } => {
                self.nominations.push(Nomination {
                    id: *nomination_id,
                    day: self.day_number,
                    nominator: *nominator,
                    nominee: *nominee,
                    threshold: *threshold,
                    seconded_by: Vec::new(),
                    votes: Vec::new(),
                    status: NominationStatus::Open,
                });
                self.next_nomination_id = self.next_nomination_id.max(nomination_id + 1);
                self.nominators_today.insert(*nominator);
                self.nominees_today.insert(*nominee);
            }
            EventPayload::NominationSeconded {
                nomination_id,
                seconder,
            } => {
                if let Some(n) = self.nominations.iter_mut().find(|n| n.id == *nomination_id) {
                    if !n.seconded_by.contains(seconder) {
                        n.seconded_by.push(*seconder);
                    }
                }
            }
            EventPayload::VoteRecorded {
                nomination_id,
                voter,
                yes,
                ghost,
            } => {
                if let Some(n) = self.nominations.iter_mut().find(|n| n.id == *nomination_id) {
                    n.votes.push(VoteEntry {
                        voter: *voter,
                        yes: *yes,
                        ghost: *ghost,
                    });
                }
                if *ghost {
                    if let Some(p) = self.players.get_mut(voter) {
                        p.ghost_vote_used = true;
                    }
                }
            }
            EventPayload::VoteTallied {
                nomination_id,
                yes,
                outcome,
                ..
            } => {
                let nominee = self
                    .nominations
                    .iter_mut()
                    .find(|n| n.id == *nomination_id)
                    .map(|n| {
                        n.status = NominationStatus::ClosedNoExec;
                        n.nominee
                    });
                match outcome {
                    TallyOutcome::Scheduled => {
                        if let Some(nominee) = nominee {
                            self.scheduled_execution = Some((*nomination_id, nominee));
                            self.top_tally_today = Some(*yes);
                        }
                    }
                    TallyOutcome::Tie => {
                        self.scheduled_execution = None;
                    }
                    TallyOutcome::Insufficient => {}
                }
            }
            EventPayload::ExecutionScheduled {
                nomination_id,
                nominee,
            } => {
                self.scheduled_execution = Some((*nomination_id, *nominee));
            }
            EventPayload::PlayerExecuted {
                user_id,
                nomination_id,
            } => {
                self.executed_today = Some(*user_id);
                self.scheduled_execution = None;
                if let Some(id) = nomination_id {
                    if let Some(n) = self.nominations.iter_mut().find(|n| n.id == *id) {
                        n.status = NominationStatus::ClosedExec;
                    }
                }
            }
            EventPayload::ReminderSet {
                target,
                reminder,
                cleared,
            } => {
                if let Some(p) = self.players.get_mut(target) {
                    if *cleared {
                        p.clear_reminder(reminder);
                    } else {
                        p.set_reminder(reminder);
                    }
                }
            }
            EventPayload::RoleRevealed { user_id, role } => {
                if let Some(p) = self.players.get_mut(user_id) {
                    p.revealed_role = Some(*role);
                }
            }
            EventPayload::GameEnded { winner, .. } => {
                self.winner = Some(*winner);
                self.phase = Phase::Ended;
                self.status = RoomStatus::Ended;
            }
        }
    }

    fn begin_night(&mut self) {
        // Remember today's execution for the undertaker before resetting.
        self.last_execution = self.executed_today.map(|user_id| LastExecution {
            day: self.day_number,
            user_id,
            role: self
                .players
                .get(&user_id)
                .and_then(|p| p.true_role.or(p.role)),
        });
        self.executed_today = None;
        self.scheduled_execution = None;
        self.top_tally_today = None;
        self.nominators_today.clear();
        self.nominees_today.clear();
        self.night_order_cursor = 0;
        self.pending_night_actions.clear();
        // Poison wears off when the poisoner wakes to pick again.
        for p in self.players.values_mut() {
            p.clear_reminder(REMINDER_POISONED);
        }
    }

    fn begin_day(&mut self) {
        for p in self.players.values_mut() {
            p.clear_reminder(REMINDER_PROTECTED);
        }
    }

    fn apply_ability(
        &mut self,
        actor: UserId,
        role: RoleId,
        action: AbilityAction,
        targets: &[UserId],
    ) {
        match (role, action) {
            (RoleId::Poisoner, AbilityAction::Poison) => {
                if !self.is_impaired(&actor) {
                    if let Some(target) = targets.first() {
                        if let Some(p) = self.players.get_mut(target) {
                            p.set_reminder(REMINDER_POISONED);
                        }
                    }
                }
            }
            (RoleId::Monk, AbilityAction::Protect) => {
                if !self.is_impaired(&actor) {
                    if let Some(target) = targets.first() {
                        if let Some(p) = self.players.get_mut(target) {
                            p.set_reminder(REMINDER_PROTECTED);
                        }
                    }
                }
            }
            (RoleId::Slayer, AbilityAction::Kill) => {
                if let Some(p) = self.players.get_mut(&actor) {
                    p.set_reminder(REMINDER_SLAYER_USED);
                }
            }
            (RoleId::Imp, AbilityAction::Kill) => {
                let Some(target) = targets.first() else {
                    return;
                };
                // A starpass resolves immediately via player.died; only
                // kills on others buffer until dawn.
                if *target == actor {
                    return;
                }
                if self.night_kill_lands(&actor, target) && !self.deaths_pending.contains(target) {
                    self.deaths_pending.push(*target);
                }
            }
            _ => {}
        }
    }

    /// Whether the demon's night kill takes effect on `target`.
    pub fn night_kill_lands(&self, demon: &UserId, target: &UserId) -> bool {
        if self.is_impaired(demon) {
            return false;
        }
        let Some(victim) = self.players.get(target) else {
            return false;
        };
        if !victim.alive {
            return false;
        }
        if victim.has_reminder(REMINDER_PROTECTED) {
            return false;
        }
        // The soldier shrugs off the demon unless impaired themselves.
        if victim.true_role == Some(RoleId::Soldier) && !self.is_impaired(target) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn record(payload: EventPayload, seq: Seq) -> EventRecord {
        EventRecord {
            room_id: Uuid::nil(),
            seq,
            event_id: Uuid::new_v4(),
            actor_user_id: None,
            causation_command_id: Uuid::new_v4(),
            payload,
            server_ts_ms: 0,
        }
    }

    fn seated_state(n: usize) -> (RoomState, Vec<UserId>) {
        let mut state = RoomState::empty(Uuid::nil());
        let dm = Uuid::new_v4();
        state.apply(&record(
            EventPayload::RoomCreated {
                created_by: dm,
                dm_user_id: dm,
                seed: 42,
            },
            1,
        ));
        let mut ids = Vec::new();
        for i in 0..n {
            let id = Uuid::new_v4();
            ids.push(id);
            state.apply(&record(
                EventPayload::PlayerJoined {
                    user_id: id,
                    name: format!("p{i}"),
                    seat: Some(i),
                    observer: false,
                },
                2 + i as Seq,
            ));
        }
        (state, ids)
    }

    #[test]
    fn test_join_and_lobby_leave_reindexes_seats() {
        let (mut state, ids) = seated_state(3);
        assert_eq!(state.seat_order.len(), 3);
        state.apply(&record(
            EventPayload::PlayerLeft {
                user_id: ids[0],
                seated: true,
            },
            10,
        ));
        assert_eq!(state.seat_order, vec![ids[1], ids[2]]);
        assert_eq!(state.players[&ids[1]].seat, 0);
        assert_eq!(state.players[&ids[2]].seat, 1);
    }

    #[test]
    fn test_living_neighbors_wrap_and_skip_dead() {
        let (mut state, ids) = seated_state(4);
        state.apply(&record(
            EventPayload::PlayerDied {
                user_id: ids[1],
                cause: super::super::event::DeathCause::Execution,
            },
            10,
        ));
        let neighbors = state.living_neighbors(&ids[0]);
        assert_eq!(neighbors, vec![ids[3], ids[2]]);
    }

    #[test]
    fn test_stale_guard_tracks_day_progress_events() {
        let (mut state, ids) = seated_state(5);
        assert_eq!(state.stale_guard_seq, 0);
        state.apply(&record(
            EventPayload::NominationOpened {
                nomination_id: 1,
                nominator: ids[0],
                nominee: ids[1],
                threshold: 3,
            },
            20,
        ));
        assert_eq!(state.stale_guard_seq, 20);
        state.apply(&record(
            EventPayload::WhisperSent {
                from: ids[0],
                to: ids[1],
                text: "psst".to_string(),
            },
            21,
        ));
        assert_eq!(state.stale_guard_seq, 20);
    }

    #[test]
    fn test_night_entry_clears_poison_and_day_state() {
        let (mut state, ids) = seated_state(5);
        state.apply(&record(
            EventPayload::ReminderSet {
                target: ids[0],
                reminder: REMINDER_POISONED.to_string(),
                cleared: false,
            },
            10,
        ));
        state.apply(&record(
            EventPayload::PlayerExecuted {
                user_id: ids[2],
                nomination_id: None,
            },
            11,
        ));
        state.apply(&record(
            EventPayload::PhaseChanged {
                phase: Phase::Night,
                day_number: 1,
            },
            12,
        ));
        assert!(!state.players[&ids[0]].has_reminder(REMINDER_POISONED));
        assert_eq!(state.executed_today, None);
        assert_eq!(
            state.last_execution.as_ref().map(|e| e.user_id),
            Some(ids[2])
        );
    }

    #[test]
    fn test_demon_kill_buffers_until_dawn_and_respects_protection() {
        let (mut state, ids) = seated_state(5);
        let demon = ids[0];
        for (i, id) in ids.iter().enumerate() {
            let role = if i == 0 { RoleId::Imp } else { RoleId::Empath };
            state.apply(&record(
                EventPayload::RoleAssigned {
                    user_id: *id,
                    role,
                    true_role: role,
                    team: role.team(),
                },
                10 + i as Seq,
            ));
        }
        state.apply(&record(
            EventPayload::ReminderSet {
                target: ids[1],
                reminder: REMINDER_PROTECTED.to_string(),
                cleared: false,
            },
            20,
        ));

        // Protected target: no pending death.
        state.apply(&record(
            EventPayload::AbilityInvoked {
                actor: demon,
                role: RoleId::Imp,
                action: AbilityAction::Kill,
                targets: vec![ids[1]],
            },
            21,
        ));
        assert!(state.deaths_pending.is_empty());

        // Unprotected target: buffered.
        state.apply(&record(
            EventPayload::AbilityInvoked {
                actor: demon,
                role: RoleId::Imp,
                action: AbilityAction::Kill,
                targets: vec![ids[2]],
            },
            22,
        ));
        assert_eq!(state.deaths_pending, vec![ids[2]]);

        // Dawn announcement clears the buffer.
        state.apply(&record(
            EventPayload::PlayerDied {
                user_id: ids[2],
                cause: super::super::event::DeathCause::Demon,
            },
            23,
        ));
        state.apply(&record(EventPayload::DeathsAnnounced { deaths: vec![] }, 24));
        assert!(state.deaths_pending.is_empty());
        assert!(!state.players[&ids[2]].alive);
    }

    #[test]
    fn test_demon_changed_promotes_minion() {
        let (mut state, ids) = seated_state(3);
        state.apply(&record(
            EventPayload::MinionsRevealed {
                demon: ids[0],
                minions: vec![ids[1]],
            },
            10,
        ));
        state.apply(&record(
            EventPayload::DemonChanged {
                new_demon: ids[1],
                previous: ids[0],
            },
            11,
        ));
        assert_eq!(state.demon_id, Some(ids[1]));
        assert!(state.minion_ids.is_empty());
        assert_eq!(state.players[&ids[1]].true_role, Some(RoleId::Imp));
    }

    #[test]
    fn test_ghost_vote_marked_used() {
        let (mut state, ids) = seated_state(5);
        state.apply(&record(
            EventPayload::NominationOpened {
                nomination_id: 1,
                nominator: ids[0],
                nominee: ids[1],
                threshold: 3,
            },
            10,
        ));
        state.apply(&record(
            EventPayload::VoteRecorded {
                nomination_id: 1,
                voter: ids[2],
                yes: true,
                ghost: true,
            },
            11,
        ));
        assert!(state.players[&ids[2]].ghost_vote_used);
        assert_eq!(state.nomination(1).unwrap().yes_count(), 1);
    }

    #[test]
    fn test_snapshot_round_trip_preserves_state() {
        let (mut state, ids) = seated_state(7);
        state.apply(&record(
            EventPayload::NominationOpened {
                nomination_id: 1,
                nominator: ids[0],
                nominee: ids[1],
                threshold: 4,
            },
            30,
        ));
        let json = serde_json::to_string(&state).unwrap();
        let back: RoomState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
