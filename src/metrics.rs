//! In-process metrics: cheap atomic counters surfaced as JSON on
//! `GET /metrics`. Exporters are out of scope; anything scraping the
//! endpoint can relabel these as it likes.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ServerMetrics {
    commands_received: AtomicU64,
    commands_applied: AtomicU64,
    commands_rejected: AtomicU64,
    commands_deduplicated: AtomicU64,
    commands_expired: AtomicU64,
    events_appended: AtomicU64,
    events_delivered: AtomicU64,
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
    sessions_evicted_slow: AtomicU64,
    rooms_loaded: AtomicU64,
    rooms_unloaded: AtomicU64,
    rooms_tainted: AtomicU64,
    snapshots_written: AtomicU64,
    snapshot_failures: AtomicU64,
    storage_retries: AtomicU64,
    agent_notifications_dropped: AtomicU64,
}

/// Point-in-time counter values for serialization.
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub commands_received: u64,
    pub commands_applied: u64,
    pub commands_rejected: u64,
    pub commands_deduplicated: u64,
    pub commands_expired: u64,
    pub events_appended: u64,
    pub events_delivered: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub sessions_evicted_slow: u64,
    pub rooms_loaded: u64,
    pub rooms_unloaded: u64,
    pub rooms_tainted: u64,
    pub snapshots_written: u64,
    pub snapshot_failures: u64,
    pub storage_retries: u64,
    pub agent_notifications_dropped: u64,
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(increment_commands_received, commands_received);
    counter!(increment_commands_applied, commands_applied);
    counter!(increment_commands_rejected, commands_rejected);
    counter!(increment_commands_deduplicated, commands_deduplicated);
    counter!(increment_commands_expired, commands_expired);
    counter!(increment_sessions_opened, sessions_opened);
    counter!(increment_sessions_closed, sessions_closed);
    counter!(increment_sessions_evicted_slow, sessions_evicted_slow);
    counter!(increment_rooms_loaded, rooms_loaded);
    counter!(increment_rooms_unloaded, rooms_unloaded);
    counter!(increment_rooms_tainted, rooms_tainted);
    counter!(increment_snapshots_written, snapshots_written);
    counter!(increment_snapshot_failures, snapshot_failures);
    counter!(increment_storage_retries, storage_retries);
    counter!(increment_agent_notifications_dropped, agent_notifications_dropped);

    pub fn add_events_appended(&self, n: u64) {
        self.events_appended.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_events_delivered(&self, n: u64) {
        self.events_delivered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commands_received: self.commands_received.load(Ordering::Relaxed),
            commands_applied: self.commands_applied.load(Ordering::Relaxed),
            commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
            commands_deduplicated: self.commands_deduplicated.load(Ordering::Relaxed),
            commands_expired: self.commands_expired.load(Ordering::Relaxed),
            events_appended: self.events_appended.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            sessions_evicted_slow: self.sessions_evicted_slow.load(Ordering::Relaxed),
            rooms_loaded: self.rooms_loaded.load(Ordering::Relaxed),
            rooms_unloaded: self.rooms_unloaded.load(Ordering::Relaxed),
            rooms_tainted: self.rooms_tainted.load(Ordering::Relaxed),
            snapshots_written: self.snapshots_written.load(Ordering::Relaxed),
            snapshot_failures: self.snapshot_failures.load(Ordering::Relaxed),
            storage_retries: self.storage_retries.load(Ordering::Relaxed),
            agent_notifications_dropped: self.agent_notifications_dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = ServerMetrics::new();
        metrics.increment_commands_received();
        metrics.increment_commands_received();
        metrics.increment_commands_applied();
        metrics.add_events_appended(3);

        let snap = metrics.snapshot();
        assert_eq!(snap.commands_received, 2);
        assert_eq!(snap.commands_applied, 1);
        assert_eq!(snap.events_appended, 3);
        assert_eq!(snap.sessions_evicted_slow, 0);
    }
}
