use serde::{Deserialize, Serialize};
use std::fmt;

/// Error reasons for structured command and connection failures.
///
/// These travel on the wire in `command_result` and `error` frames, so the
/// serialized names are part of the protocol contract.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// Missing or invalid credentials.
    Unauthorized,
    /// Authenticated, but the actor may not perform this operation.
    Forbidden,
    /// The command is malformed or illegal in the current game state.
    BadRequest,
    /// The command lost a race: stale view, duplicate nomination, vote on a
    /// closed nomination, and similar.
    Conflict,
    /// The referenced room, player, or nomination does not exist.
    NotFound,
    /// The command could not be admitted before its deadline.
    RateLimited,
    /// Persistence or engine failure; the command had no effect.
    Internal,
}

impl ErrorReason {
    /// Human-readable description suitable for client display.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Unauthorized => "Authentication credentials are missing or invalid.",
            Self::Forbidden => "You are not allowed to perform this action.",
            Self::BadRequest => "The command is malformed or not legal right now.",
            Self::Conflict => {
                "The command conflicts with the current room state. Resync and retry."
            }
            Self::NotFound => "The referenced room or entity does not exist.",
            Self::RateLimited => "The command could not be processed before its deadline.",
            Self::Internal => "Internal server error. The command was not applied.",
        }
    }

    /// Whether a client retry with the same idempotency key can succeed.
    ///
    /// `rate_limited` and `internal` rejections leave no dedup record, so the
    /// same key may be resubmitted; everything else is a definitive outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Internal)
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::BadRequest => "bad_request",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}
