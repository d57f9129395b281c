//! Sync cycle and version-gated reconciliation

use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::Session;
use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::models::{
    ChangeId, ChangePayload, EntityKind, Note, Operation, PendingChange, SyncFilter,
};
use crate::remote::RemoteStore;

/// Result of a successful sync cycle
#[derive(Debug, Default)]
pub struct CycleOutcome {
    /// Remote writes issued this cycle
    pub pushed: usize,
    /// Remote notes accepted by the version gate and persisted locally
    pub merged: Vec<Note>,
}

/// Drains the outbox against the remote store and reconciles pulled state.
///
/// Delivery is at-least-once; effects are idempotent because every push is
/// an id-keyed upsert or delete, and every accepted pull is gated on a
/// strictly greater version.
pub struct SyncEngine {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteStore>,
    session: Option<Session>,
    pull_limit: usize,
}

impl SyncEngine {
    #[must_use]
    pub fn new(store: Arc<LocalStore>, remote: Arc<dyn RemoteStore>, pull_limit: usize) -> Self {
        Self {
            store,
            remote,
            session: None,
            pull_limit,
        }
    }

    /// Cache the session credential; re-applied to the remote client at the
    /// start of every cycle since the auth subsystem rotates it.
    pub fn set_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    #[must_use]
    pub const fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Run one sync cycle: push the (optionally filtered) outbox in
    /// dependency order, mark entries synced, pull and reconcile.
    ///
    /// Any push failure aborts the cycle before anything is marked synced;
    /// the whole unsynced set is retried on the next trigger.
    pub async fn run_cycle(&self, filter: Option<&SyncFilter>) -> Result<CycleOutcome> {
        let session = self.session.as_ref().ok_or(Error::NoSession)?;
        self.remote.set_session(session);

        let mut changes = self.store.get_unsynced_changes()?;
        if let Some(filter) = filter {
            changes.retain(|change| {
                change.entity == filter.entity && change.entity_id == filter.id
            });
        }

        // Notebooks push before notes so the remote foreign relation exists
        // when the note row arrives; within a kind, outbox order holds.
        let (notebooks, notes): (Vec<_>, Vec<_>) = changes
            .into_iter()
            .partition(|change| change.entity == EntityKind::Notebook);
        let ordered: Vec<PendingChange> = notebooks.into_iter().chain(notes).collect();

        let mut pushed = 0;
        for change in collapse_per_entity(&ordered) {
            self.push(change).await?;
            pushed += 1;
        }

        let ids: Vec<ChangeId> = ordered.iter().map(|change| change.id).collect();
        self.store.mark_changes_synced(&ids)?;
        tracing::debug!(entries = ids.len(), pushed, "outbox flushed");

        let pulled = self.remote.recent_notes(self.pull_limit).await?;
        let merged = self.reconcile(pulled)?;

        Ok(CycleOutcome { pushed, merged })
    }

    async fn push(&self, change: &PendingChange) -> Result<()> {
        match (change.operation, &change.data) {
            (Operation::Delete, _) => match change.entity {
                EntityKind::Notebook => self.remote.delete_notebook(&change.entity_id).await,
                EntityKind::Note => self.remote.delete_note(&change.entity_id).await,
            },
            (_, ChangePayload::Notebook(notebook)) => self.remote.upsert_notebook(notebook).await,
            (_, ChangePayload::Note(note)) => self.remote.upsert_note(note).await,
            (_, ChangePayload::Tombstone(_)) => Err(Error::InvalidInput(
                "tombstone payload on a non-delete change".into(),
            )),
        }
    }

    /// Version-gated merge shared by pull sync and the realtime listener.
    ///
    /// A remote note wins only when no local copy exists or its version is
    /// strictly greater; equal or lower versions are discarded as stale.
    /// Accepted notes (tombstones included) are persisted without queueing.
    pub fn reconcile(&self, incoming: Vec<Note>) -> Result<Vec<Note>> {
        let mut accepted = Vec::new();
        for note in incoming {
            let wins = match self.store.get_note(note.id)? {
                None => true,
                Some(local) => note.version > local.version,
            };
            if wins {
                self.store.put_note(&note)?;
                accepted.push(note);
            } else {
                tracing::debug!(note = %note.id, version = note.version, "discarding stale remote note");
            }
        }
        Ok(accepted)
    }
}

/// Keep only the last non-superseded entry per entity.
///
/// Every snapshot is the full entity state at mutation time, so earlier
/// entries for the same entity are subsumed by the latest one; they are
/// still marked synced with the batch.
fn collapse_per_entity(ordered: &[PendingChange]) -> Vec<&PendingChange> {
    let mut last_index: HashMap<&str, usize> = HashMap::new();
    for (index, change) in ordered.iter().enumerate() {
        last_index.insert(change.entity_id.as_str(), index);
    }
    ordered
        .iter()
        .enumerate()
        .filter(|(index, change)| last_index.get(change.entity_id.as_str()) == Some(index))
        .map(|(_, change)| change)
        .collect()
}
