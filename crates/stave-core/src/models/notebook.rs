//! Notebook model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::UserId;

use super::note::NoteType;

/// A unique identifier for a notebook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotebookId(Uuid);

impl NotebookId {
    /// Create a new random notebook ID
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

impl Default for NotebookId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NotebookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NotebookId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Per-notebook settings, stored alongside the notebook row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotebookSettings {
    /// Note type preselected when creating a note in this notebook
    pub default_note_type: NoteType,
    /// User ids invited to collaborate
    pub collaborators: Vec<UserId>,
    /// Whether the notebook is publicly readable
    pub is_public: bool,
    /// Optional per-notebook theme override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
}

impl Default for NotebookSettings {
    fn default() -> Self {
        Self {
            default_note_type: NoteType::Markdown,
            collaborators: Vec::new(),
            is_public: false,
            theme: None,
        }
    }
}

/// A notebook owned by a single user.
///
/// Notebooks carry no version counter; notes are the only entities
/// reconciled by version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notebook {
    pub id: NotebookId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub settings: NotebookSettings,
    /// Soft delete flag for sync
    #[serde(default)]
    pub deleted: bool,
}

impl Notebook {
    /// Create a new notebook owned by the given user
    #[must_use]
    pub fn new(title: impl Into<String>, description: Option<String>, owner_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: NotebookId::new(),
            title: title.into(),
            description,
            owner_id,
            created_at: now,
            updated_at: now,
            settings: NotebookSettings::default(),
            deleted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_notebook_id_unique() {
        assert_ne!(NotebookId::new(), NotebookId::new());
    }

    #[test]
    fn test_notebook_id_parse() {
        let id = NotebookId::new();
        let parsed: NotebookId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_notebook_new_defaults() {
        let notebook = Notebook::new("Songs", None, UserId::new("user-1"));
        assert_eq!(notebook.title, "Songs");
        assert!(!notebook.deleted);
        assert_eq!(notebook.created_at, notebook.updated_at);
        assert_eq!(notebook.settings, NotebookSettings::default());
    }

    #[test]
    fn test_settings_wire_shape() {
        let json = serde_json::to_value(NotebookSettings::default()).unwrap();
        assert_eq!(json["defaultNoteType"], "markdown");
        assert_eq!(json["isPublic"], false);
        assert!(json.get("theme").is_none());
    }
}
