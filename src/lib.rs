#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::too_many_arguments,
    clippy::too_many_lines,
    clippy::similar_names
)]

//! # Grimoire Server
//!
//! An event-sourced WebSocket server for hidden-role social deduction
//! games. Each room is an append-only event log behind a single-writer
//! actor; every connected client receives a role-filtered projection of
//! the shared state in real time.

/// Storyteller agent hook (DM-privileged fan-out channel)
pub mod agent;

/// Bearer token verification
pub mod auth;

/// Server configuration and environment variables
pub mod config;

/// The deterministic game engine: commands, events, reducer, state
pub mod engine;

/// Per-room subscriber fan-out with backpressure
pub mod hub;

/// Structured logging configuration
pub mod logging;

/// Metrics collection and reporting
pub mod metrics;

/// Per-viewer privacy projection
pub mod projection;

/// Wire protocol definitions
pub mod protocol;

/// Room actor and lifecycle management
pub mod room;

/// Main server orchestration
pub mod server;

/// Event log, dedup, and snapshot persistence
pub mod store;

/// WebSocket connection handling
pub mod websocket;
