//! Offline-first synchronization
//!
//! The engine drains the outbox, pushes to the remote store in dependency
//! order, pulls recent remote notes, and reconciles by version. It runs on a
//! dedicated worker task reachable only through message passing.

pub mod engine;
pub mod realtime;
pub mod worker;

use std::time::Duration;

pub use engine::{CycleOutcome, SyncEngine};
pub use realtime::{RealtimeFeed, RealtimeSubscription, WebSocketFeed};
pub use worker::{spawn, SyncCommand, SyncEvent, SyncWorkerHandle};

/// Configuration for the sync worker
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Whether the periodic timer triggers cycles
    pub auto_sync: bool,
    /// Interval between periodic cycles
    pub sync_interval: Duration,
    /// Page size for the pull step (newest-first)
    pub pull_limit: usize,
}

impl SyncConfig {
    /// Set the automatic sync interval
    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Disable automatic sync (manual and triggered sync only)
    #[must_use]
    pub const fn without_auto_sync(mut self) -> Self {
        self.auto_sync = false;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync: true,
            sync_interval: Duration::from_secs(30),
            pull_limit: 100,
        }
    }
}
