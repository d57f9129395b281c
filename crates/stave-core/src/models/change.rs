//! Outbox entry model
//!
//! Every local mutation appends one [`PendingChange`] in the same transaction
//! as the entity write it describes. Entries stay queued until the sync
//! engine marks them synced after a fully successful push.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::note::Note;
use super::notebook::Notebook;

/// A unique identifier for an outbox entry (per entry, not per entity)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeId(Uuid);

impl ChangeId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ChangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChangeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of entity an outbox entry refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Notebook,
    Note,
}

/// Mutation kind recorded in the outbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// A retained, marked-deleted record used to propagate deletion through sync.
///
/// Structurally valid for the remote delete call while carrying no entity
/// payload beyond its id (and, for notes, the version the delete produced).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub id: String,
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
}

impl Tombstone {
    #[must_use]
    pub fn new(id: impl Into<String>, version: Option<i64>) -> Self {
        Self {
            id: id.into(),
            deleted: true,
            version,
        }
    }
}

/// Snapshot carried by an outbox entry.
///
/// Creates and updates carry the full entity at mutation time; deletes carry
/// a [`Tombstone`]. Untagged, so the stored JSON matches the remote row
/// shapes directly — variant order matters: full snapshots must be tried
/// before the tombstone, whose fields are a subset of both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChangePayload {
    Note(Box<Note>),
    Notebook(Box<Notebook>),
    Tombstone(Tombstone),
}

/// A durably queued local mutation awaiting remote acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChange {
    pub id: ChangeId,
    pub entity: EntityKind,
    #[serde(rename = "entityId")]
    pub entity_id: String,
    pub operation: Operation,
    pub data: ChangePayload,
    /// Logical ordering timestamp (Unix millis)
    pub timestamp: i64,
    /// Schema v1 stored this as 0/1; tolerate both when reading back
    #[serde(deserialize_with = "bool_from_legacy")]
    pub synced: bool,
}

impl PendingChange {
    fn new(entity: EntityKind, entity_id: String, operation: Operation, data: ChangePayload) -> Self {
        Self {
            id: ChangeId::new(),
            entity,
            entity_id,
            operation,
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
            synced: false,
        }
    }

    /// Queue a create/update of a notebook with its full snapshot
    #[must_use]
    pub fn for_notebook(operation: Operation, notebook: &Notebook) -> Self {
        Self::new(
            EntityKind::Notebook,
            notebook.id.as_str(),
            operation,
            ChangePayload::Notebook(Box::new(notebook.clone())),
        )
    }

    /// Queue a create/update of a note with its full snapshot
    #[must_use]
    pub fn for_note(operation: Operation, note: &Note) -> Self {
        Self::new(
            EntityKind::Note,
            note.id.as_str(),
            operation,
            ChangePayload::Note(Box::new(note.clone())),
        )
    }

    /// Queue a delete as a tombstone
    #[must_use]
    pub fn for_delete(entity: EntityKind, entity_id: String, version: Option<i64>) -> Self {
        Self::new(
            entity,
            entity_id.clone(),
            Operation::Delete,
            ChangePayload::Tombstone(Tombstone::new(entity_id, version)),
        )
    }
}

/// Accepts `true`/`false` as well as the numeric 0/1 written by schema v1.
fn bool_from_legacy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum LegacyBool {
        Bool(bool),
        Number(i64),
    }

    Ok(match LegacyBool::deserialize(deserializer)? {
        LegacyBool::Bool(value) => value,
        LegacyBool::Number(value) => value != 0,
    })
}
