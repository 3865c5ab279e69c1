//! The deterministic game engine: typed commands and events, the pure
//! reducer, and the state fold. No I/O lives here; the room actor owns
//! persistence and fan-out.

pub mod command;
pub mod event;
pub mod reducer;
pub mod rng;
pub mod roles;
pub mod state;

pub use command::{AbilityAction, Command, DeclaredWinner, PhaseTarget};
pub use event::{DeathCause, EventPayload, EventRecord, Phase, TallyOutcome, Winner};
pub use reducer::{decide, CommandError};
pub use roles::{RoleId, RoleKind, Team, NIGHT_ORDER};
pub use state::{Nomination, NominationStatus, PlayerState, RoomState};
