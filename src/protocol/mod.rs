//! Wire protocol: frames, envelopes, results, and error reasons.
//!
//! Everything here is part of the client contract; payload semantics live
//! in [`crate::engine`].

pub mod error_codes;
pub mod frames;
pub mod types;

pub use error_codes::ErrorReason;

pub use frames::{
    ClientFrame, CommandEnvelope, CommandResult, CommandStatus, ProjectedEvent, ServerFrame,
    SubscribeMode,
};

pub use types::{
    validate_idempotency_key, validate_player_name, CommandId, EventId, MemberRole, NominationId,
    RoomId, RoomMeta, RoomStatus, Seq, UserId, MAX_IDEMPOTENCY_KEY_LENGTH, MAX_PLAYER_NAME_LENGTH,
    MAX_SEATS, MIN_PLAYERS,
};
