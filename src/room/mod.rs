//! Per-room runtime: the single-writer actor and its lifecycle manager.

pub mod actor;
pub mod manager;

pub use actor::{ActorConfig, ResyncInfo};
pub use manager::{room_error_result, RoomError, RoomManager};
