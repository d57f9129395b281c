//! Data models for Stave

mod change;
mod note;
mod notebook;
mod sync;

pub use change::{ChangeId, ChangePayload, EntityKind, Operation, PendingChange, Tombstone};
pub use note::{Note, NoteId, NoteType};
pub use notebook::{Notebook, NotebookId, NotebookSettings};
pub use sync::{SyncFilter, SyncStatus};
