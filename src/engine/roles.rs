use serde::{Deserialize, Serialize};
use std::fmt;

/// Alignment of a role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    Good,
    Evil,
}

/// Character category, used for setup distribution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Townsfolk,
    Outsider,
    Minion,
    Demon,
}

impl RoleKind {
    pub fn team(&self) -> Team {
        match self {
            Self::Townsfolk | Self::Outsider => Team::Good,
            Self::Minion | Self::Demon => Team::Evil,
        }
    }
}

/// The character script the engine owns (a Trouble Brewing subset).
///
/// Roles without bespoke handling in the reducer are still dealt and
/// announced; their table effects are storyteller-adjudicated through the
/// `dm.*` commands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RoleId {
    // Townsfolk
    Washerwoman,
    Librarian,
    Investigator,
    Chef,
    Empath,
    FortuneTeller,
    Undertaker,
    Monk,
    Ravenkeeper,
    Slayer,
    Soldier,
    Mayor,
    // Outsiders
    Butler,
    Drunk,
    Recluse,
    Saint,
    // Minions
    Poisoner,
    Spy,
    ScarletWoman,
    Baron,
    // Demon
    Imp,
}

impl RoleId {
    pub fn kind(&self) -> RoleKind {
        match self {
            Self::Washerwoman
            | Self::Librarian
            | Self::Investigator
            | Self::Chef
            | Self::Empath
            | Self::FortuneTeller
            | Self::Undertaker
            | Self::Monk
            | Self::Ravenkeeper
            | Self::Slayer
            | Self::Soldier
            | Self::Mayor => RoleKind::Townsfolk,
            Self::Butler | Self::Drunk | Self::Recluse | Self::Saint => RoleKind::Outsider,
            Self::Poisoner | Self::Spy | Self::ScarletWoman | Self::Baron => RoleKind::Minion,
            Self::Imp => RoleKind::Demon,
        }
    }

    pub fn team(&self) -> Team {
        self.kind().team()
    }

    /// Wire/name form, e.g. `fortune_teller`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Washerwoman => "washerwoman",
            Self::Librarian => "librarian",
            Self::Investigator => "investigator",
            Self::Chef => "chef",
            Self::Empath => "empath",
            Self::FortuneTeller => "fortune_teller",
            Self::Undertaker => "undertaker",
            Self::Monk => "monk",
            Self::Ravenkeeper => "ravenkeeper",
            Self::Slayer => "slayer",
            Self::Soldier => "soldier",
            Self::Mayor => "mayor",
            Self::Butler => "butler",
            Self::Drunk => "drunk",
            Self::Recluse => "recluse",
            Self::Saint => "saint",
            Self::Poisoner => "poisoner",
            Self::Spy => "spy",
            Self::ScarletWoman => "scarlet_woman",
            Self::Baron => "baron",
            Self::Imp => "imp",
        }
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static night resolution priority. Abilities resolve strictly in this
/// order regardless of submission order; roles not listed never act at
/// night.
pub const NIGHT_ORDER: [RoleId; 8] = [
    RoleId::Poisoner,
    RoleId::Monk,
    RoleId::Spy,
    RoleId::ScarletWoman,
    RoleId::Empath,
    RoleId::FortuneTeller,
    RoleId::Undertaker,
    RoleId::Imp,
];

/// Slot index in [`NIGHT_ORDER`], if the role acts at night.
pub fn night_slot(role: RoleId) -> Option<usize> {
    NIGHT_ORDER.iter().position(|r| *r == role)
}

/// Whether the role's night slot expects a submitted action, as opposed to
/// a passive slot the engine skips on its own (Scarlet Woman only listens).
pub fn night_slot_is_active(role: RoleId) -> bool {
    !matches!(role, RoleId::ScarletWoman)
}

/// Roles dealt from each category pool, in deal preference order.
pub const TOWNSFOLK_POOL: [RoleId; 12] = [
    RoleId::Washerwoman,
    RoleId::Librarian,
    RoleId::Investigator,
    RoleId::Chef,
    RoleId::Empath,
    RoleId::FortuneTeller,
    RoleId::Undertaker,
    RoleId::Monk,
    RoleId::Ravenkeeper,
    RoleId::Slayer,
    RoleId::Soldier,
    RoleId::Mayor,
];

pub const OUTSIDER_POOL: [RoleId; 4] = [
    RoleId::Butler,
    RoleId::Drunk,
    RoleId::Recluse,
    RoleId::Saint,
];

pub const MINION_POOL: [RoleId; 4] = [
    RoleId::Poisoner,
    RoleId::Spy,
    RoleId::ScarletWoman,
    RoleId::Baron,
];

/// Setup counts per seated player count: (townsfolk, outsiders, minions).
/// One demon is always dealt. Seats beyond fifteen are filled with extra
/// townsfolk; dealing cycles the townsfolk pool if those seats outgrow it.
pub fn distribution(seats: usize) -> (usize, usize, usize) {
    match seats {
        0..=5 => (3, 0, 1),
        6 => (3, 1, 1),
        7 => (5, 0, 1),
        8 => (5, 1, 1),
        9 => (5, 2, 1),
        10 => (7, 0, 2),
        11 => (7, 1, 2),
        12 => (7, 2, 2),
        13 => (9, 0, 3),
        14 => (9, 1, 3),
        15 => (9, 2, 3),
        n => (9 + (n - 15), 2, 3),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distribution_totals_match_seats() {
        for seats in 5..=crate::protocol::MAX_SEATS {
            let (t, o, m) = distribution(seats);
            assert_eq!(t + o + m + 1, seats, "seats {seats}");
        }
    }

    #[test]
    fn test_distribution_pools_cover_fifteen_seats() {
        for seats in 5..=15 {
            let (t, o, m) = distribution(seats);
            // Baron setup adds two outsiders at townsfolk's expense.
            assert!(t <= TOWNSFOLK_POOL.len(), "seats {seats}");
            assert!(o + 2 <= OUTSIDER_POOL.len(), "seats {seats}");
            assert!(m <= MINION_POOL.len(), "seats {seats}");
        }
    }

    #[test]
    fn test_night_order_slots() {
        assert_eq!(night_slot(RoleId::Poisoner), Some(0));
        assert_eq!(night_slot(RoleId::Imp), Some(7));
        assert_eq!(night_slot(RoleId::Slayer), None);
        assert!(!night_slot_is_active(RoleId::ScarletWoman));
        assert!(night_slot_is_active(RoleId::Imp));
    }

    #[test]
    fn test_team_assignments() {
        assert_eq!(RoleId::Imp.team(), Team::Evil);
        assert_eq!(RoleId::Spy.team(), Team::Evil);
        assert_eq!(RoleId::Saint.team(), Team::Good);
        assert_eq!(RoleId::Mayor.team(), Team::Good);
    }
}
