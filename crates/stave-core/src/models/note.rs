//! Note model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::UserId;

use super::notebook::NotebookId;

/// A unique identifier for a note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteId(Uuid);

impl NoteId {
    /// Create a new random note ID
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

impl Default for NoteId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NoteId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Rendering type of a note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NoteType {
    #[default]
    Markdown,
    Chordpro,
    Plaintext,
    Code,
}

/// A note within a notebook.
///
/// `version` increments by exactly one on every accepted update and is the
/// sole conflict-resolution signal during sync; wall-clock timestamps are
/// informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    /// Owning notebook; not enforced by the local store, validated by the
    /// domain service
    pub notebook_id: NotebookId,
    #[serde(rename = "type")]
    pub note_type: NoteType,
    pub title: String,
    pub content: String,
    /// Display order within the notebook; ties break by insertion order
    pub position: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: UserId,
    pub last_modified_by: UserId,
    pub version: i64,
    /// Soft delete flag for sync
    #[serde(default)]
    pub deleted: bool,
}

impl Note {
    /// Create a new note at the given position, authored by `created_by`
    #[must_use]
    pub fn new(
        notebook_id: NotebookId,
        note_type: NoteType,
        title: impl Into<String>,
        position: i64,
        created_by: UserId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: NoteId::new(),
            notebook_id,
            note_type,
            title: title.into(),
            content: String::new(),
            position,
            created_at: now,
            updated_at: now,
            created_by: created_by.clone(),
            last_modified_by: created_by,
            version: 1,
            deleted: false,
        }
    }
}
