use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for users (players, DMs, observers).
pub type UserId = Uuid;
/// Unique identifier for rooms.
pub type RoomId = Uuid;
/// Unique identifier for commands, supplied by the client.
pub type CommandId = Uuid;
/// Globally unique identifier for events, allocated by the server.
pub type EventId = Uuid;
/// Per-room event sequence number. The first event in a room is seq 1.
pub type Seq = u64;
/// Per-room nomination identifier, allocated by the reducer in day order.
pub type NominationId = u64;

/// Hard cap on seated players in a single room.
pub const MAX_SEATS: usize = 20;
/// Minimum seated players required to start a game.
pub const MIN_PLAYERS: usize = 5;
/// Maximum accepted idempotency key length.
pub const MAX_IDEMPOTENCY_KEY_LENGTH: usize = 128;
/// Maximum accepted player display name length.
pub const MAX_PLAYER_NAME_LENGTH: usize = 32;

/// Lifecycle status of a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    #[default]
    Lobby,
    Active,
    Ended,
}

/// Membership role inside a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    /// The storyteller. Exactly one per room, fixed at creation.
    Dm,
    /// A seated participant.
    Player,
    /// A read-only watcher with the public projection.
    Observer,
}

/// Durable room record, owned by the store.
///
/// Everything gameplay-related lives in the event log; this is only the
/// envelope the gateway needs before an actor is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomMeta {
    pub id: RoomId,
    pub created_by: UserId,
    pub dm_user_id: UserId,
    pub status: RoomStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Validate a client-supplied idempotency key.
pub fn validate_idempotency_key(key: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err("idempotency_key must not be empty".to_string());
    }
    if key.len() > MAX_IDEMPOTENCY_KEY_LENGTH {
        return Err(format!(
            "idempotency_key exceeds {MAX_IDEMPOTENCY_KEY_LENGTH} bytes"
        ));
    }
    Ok(())
}

/// Validate a player display name.
pub fn validate_player_name(name: &str) -> Result<(), String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("player name must not be empty".to_string());
    }
    if trimmed != name {
        return Err("player name must not have leading or trailing whitespace".to_string());
    }
    if name.chars().count() > MAX_PLAYER_NAME_LENGTH {
        return Err(format!(
            "player name exceeds {MAX_PLAYER_NAME_LENGTH} characters"
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == ' ' || c == '_' || c == '-')
    {
        return Err("player name contains unsupported characters".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_player_name() {
        assert!(validate_player_name("Alice").is_ok());
        assert!(validate_player_name("alice_2 the-second").is_ok());
        assert!(validate_player_name("").is_err());
        assert!(validate_player_name(" padded").is_err());
        assert!(validate_player_name("Zoë").is_ok());
        assert!(validate_player_name("emoji✨").is_err());
        assert!(validate_player_name("semi;colon").is_err());
        assert!(validate_player_name(&"x".repeat(MAX_PLAYER_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_validate_idempotency_key() {
        assert!(validate_idempotency_key("k-1").is_ok());
        assert!(validate_idempotency_key("").is_err());
        assert!(validate_idempotency_key(&"k".repeat(MAX_IDEMPOTENCY_KEY_LENGTH + 1)).is_err());
    }
}
