//! Sync status and filter types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::change::EntityKind;

/// Transient, in-memory sync state surfaced to the UI.
///
/// Rebuilt each session; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub last_synced: Option<DateTime<Utc>>,
    /// Count of unsynced outbox entries
    pub pending: usize,
    /// At most one sync cycle is in flight at a time
    pub syncing: bool,
    pub error: Option<String>,
}

/// Scopes a manual sync to a single entity.
///
/// The engine filters the drained outbox to entries matching this entity
/// kind and id before ordering and pushing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFilter {
    #[serde(rename = "type")]
    pub entity: EntityKind,
    pub id: String,
}

impl SyncFilter {
    #[must_use]
    pub fn new(entity: EntityKind, id: impl Into<String>) -> Self {
        Self {
            entity,
            id: id.into(),
        }
    }
}
