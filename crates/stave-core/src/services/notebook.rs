//! Notebook domain service
//!
//! Holds the reactive application state: the notebook list, the selected
//! notebook with its notes, and the current sync status. Every mutation
//! writes locally first and queues an outbox entry in the same transaction;
//! sync runs in the background and never blocks a mutation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::auth::{Identity, Session};
use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::models::{
    EntityKind, Note, NoteId, NoteType, Notebook, NotebookId, Operation, PendingChange,
    SyncFilter, SyncStatus,
};
use crate::remote::RemoteStore;
use crate::sync::{self, RealtimeFeed, SyncCommand, SyncConfig, SyncEvent, SyncWorkerHandle};

#[derive(Default)]
struct State {
    notebooks: Vec<Notebook>,
    selected: Option<NotebookId>,
    notes: Vec<Note>,
    current_note: Option<NoteId>,
    sync_status: SyncStatus,
}

/// Reactive store over notebooks and notes, backed by the sync worker.
pub struct NotebookService {
    store: Arc<LocalStore>,
    worker: SyncWorkerHandle,
    state: Mutex<State>,
    events: Mutex<Option<mpsc::UnboundedReceiver<SyncEvent>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl NotebookService {
    /// Assemble the service and spawn its sync worker.
    ///
    /// Requires a running tokio runtime. No events flow until
    /// [`initialize`](Self::initialize) is called.
    #[must_use]
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteStore>,
        feed: Arc<dyn RealtimeFeed>,
        config: SyncConfig,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let worker = sync::spawn(Arc::clone(&store), remote, feed, config, events_tx);
        Arc::new(Self {
            store,
            worker,
            state: Mutex::new(State::default()),
            events: Mutex::new(Some(events_rx)),
            pump: Mutex::new(None),
        })
    }

    /// Load persisted state and start consuming worker events.
    ///
    /// Calling it a second time only reloads state.
    pub fn initialize(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state();
            state.notebooks = self.store.list_notebooks()?;
            state.sync_status.pending = self.store.unsynced_count()?;
        }

        let Some(mut events) = self.lock(&self.events).take() else {
            return Ok(());
        };
        // Weak reference so a disposed service does not keep pumping
        let service = Arc::downgrade(self);
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(service) = service.upgrade() else {
                    break;
                };
                service.handle_event(event);
            }
        });
        *self.lock(&self.pump) = Some(pump);
        Ok(())
    }

    /// Stop the event pump and the sync worker. Local state stays readable.
    pub fn dispose(&self) {
        if let Some(pump) = self.lock(&self.pump).take() {
            pump.abort();
        }
        self.worker.shutdown();
    }

    // --- session ---

    /// Hand the worker a fresh session credential.
    pub fn set_session(&self, session: Session) {
        self.worker.send(SyncCommand::Auth { session });
    }

    // --- snapshots ---

    /// Live notebooks, most recently updated first.
    #[must_use]
    pub fn notebooks(&self) -> Vec<Notebook> {
        self.state().notebooks.clone()
    }

    /// The currently selected notebook id, if any.
    #[must_use]
    pub fn selected_notebook(&self) -> Option<NotebookId> {
        self.state().selected
    }

    /// The currently open note, if any.
    #[must_use]
    pub fn current_note(&self) -> Option<Note> {
        let state = self.state();
        let id = state.current_note?;
        state.notes.iter().find(|note| note.id == id).cloned()
    }

    /// Notes of the selected notebook, sorted by position.
    ///
    /// The sort is stable, so notes sharing a position keep their
    /// merge-arrival order instead of flickering between renders.
    #[must_use]
    pub fn sorted_notes(&self) -> Vec<Note> {
        let mut notes = self.state().notes.clone();
        notes.sort_by_key(|note| note.position);
        notes
    }

    /// The latest sync status snapshot.
    #[must_use]
    pub fn sync_status(&self) -> SyncStatus {
        self.state().sync_status.clone()
    }

    // --- notebook mutations ---

    /// Create a notebook owned by the authenticated user.
    pub fn create_notebook(
        &self,
        identity: &Identity,
        title: impl Into<String>,
        description: Option<String>,
    ) -> Result<Notebook> {
        let notebook = Notebook::new(title, description, identity.user_id().clone());
        let change = PendingChange::for_notebook(Operation::Create, &notebook);
        self.store.put_notebook_with_change(&notebook, &change)?;
        self.reload_notebooks()?;
        self.request_sync(None);
        Ok(notebook)
    }

    /// Persist an edited notebook and queue the update.
    ///
    /// Notebooks are single-owner; the identity must match `owner_id`.
    pub fn update_notebook(&self, identity: &Identity, mut notebook: Notebook) -> Result<Notebook> {
        ensure_owner(identity, &notebook)?;
        notebook.updated_at = Utc::now();
        let change = PendingChange::for_notebook(Operation::Update, &notebook);
        self.store.put_notebook_with_change(&notebook, &change)?;
        self.reload_notebooks()?;
        self.request_sync(None);
        Ok(notebook)
    }

    /// Tombstone a notebook and drop its notes locally.
    ///
    /// Only the notebook tombstone is queued; the remote schema cascades
    /// note rows on its side.
    pub fn delete_notebook(&self, identity: &Identity, id: NotebookId) -> Result<()> {
        let mut notebook = self
            .store
            .get_notebook(id)?
            .ok_or_else(|| Error::NotFound(format!("notebook {id}")))?;
        ensure_owner(identity, &notebook)?;
        notebook.deleted = true;
        notebook.updated_at = Utc::now();
        let change = PendingChange::for_delete(EntityKind::Notebook, id.as_str(), None);
        let removed = self.store.tombstone_notebook_cascade(&notebook, &change)?;
        tracing::debug!(notebook = %id, removed, "notebook tombstoned");

        {
            let mut state = self.state();
            state.notebooks.retain(|n| n.id != id);
            if state.selected == Some(id) {
                state.selected = None;
                state.notes.clear();
                state.current_note = None;
            }
        }
        self.request_sync(None);
        Ok(())
    }

    /// Select a notebook: load its notes, subscribe the realtime feed, and
    /// trigger a sync. Returns the notes snapshot.
    pub fn select_notebook(&self, id: NotebookId) -> Result<Vec<Note>> {
        let notes = self.store.notes_for_notebook(id)?;
        {
            let mut state = self.state();
            state.selected = Some(id);
            state.notes = notes.clone();
            state.current_note = None;
        }
        self.worker.send(SyncCommand::Subscribe { notebook_id: id });
        self.request_sync(None);
        Ok(notes)
    }

    /// Open a note from the selected notebook.
    pub fn select_note(&self, id: NoteId) -> Result<Note> {
        let mut state = self.state();
        let note = state
            .notes
            .iter()
            .find(|note| note.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("note {id}")))?;
        state.current_note = Some(id);
        Ok(note)
    }

    // --- note mutations ---

    /// Create a note at the end of the selected notebook.
    pub fn create_note(
        &self,
        identity: &Identity,
        notebook_id: NotebookId,
        note_type: NoteType,
        title: impl Into<String>,
    ) -> Result<Note> {
        // The local store does not enforce the relation
        self.store
            .get_notebook(notebook_id)?
            .ok_or_else(|| Error::NotFound(format!("notebook {notebook_id}")))?;
        let position = self
            .store
            .notes_for_notebook(notebook_id)?
            .iter()
            .map(|note| note.position)
            .max()
            .map_or(0, |max| max + 1);
        let note = Note::new(
            notebook_id,
            note_type,
            title,
            position,
            identity.user_id().clone(),
        );
        let change = PendingChange::for_note(Operation::Create, &note);
        self.store.put_note_with_change(&note, &change)?;
        self.apply_note(&note);
        self.request_sync(None);
        Ok(note)
    }

    /// Persist an edited note: bump the version, stamp the editor, queue
    /// the update.
    pub fn update_note(&self, identity: &Identity, mut note: Note) -> Result<Note> {
        note.version += 1;
        note.updated_at = Utc::now();
        note.last_modified_by = identity.user_id().clone();
        let change = PendingChange::for_note(Operation::Update, &note);
        self.store.put_note_with_change(&note, &change)?;
        self.apply_note(&note);
        self.request_sync(None);
        Ok(note)
    }

    /// Tombstone a note and queue the delete.
    pub fn delete_note(&self, identity: &Identity, id: NoteId) -> Result<()> {
        let mut note = self
            .store
            .get_note(id)?
            .ok_or_else(|| Error::NotFound(format!("note {id}")))?;
        note.deleted = true;
        note.version += 1;
        note.updated_at = Utc::now();
        note.last_modified_by = identity.user_id().clone();
        let change = PendingChange::for_delete(EntityKind::Note, id.as_str(), Some(note.version));
        self.store.put_note_with_change(&note, &change)?;
        self.apply_note(&note);
        self.request_sync(None);
        Ok(())
    }

    // --- sync triggers ---

    /// Trigger a full sync cycle.
    pub fn sync_now(&self) {
        self.request_sync(None);
    }

    /// Trigger a sync scoped to one notebook's queued changes.
    pub fn sync_notebook(&self, id: NotebookId) {
        self.request_sync(Some(SyncFilter::new(EntityKind::Notebook, id.as_str())));
    }

    /// Trigger a sync scoped to one note's queued changes.
    pub fn sync_note(&self, id: NoteId) {
        self.request_sync(Some(SyncFilter::new(EntityKind::Note, id.as_str())));
    }

    /// Send a sync command unless a cycle is already in flight. Best-effort
    /// only: the worker drops triggers that queue up during a cycle, which
    /// is the authoritative single-flight guard.
    fn request_sync(&self, filter: Option<SyncFilter>) {
        {
            let mut state = self.state();
            if let Ok(pending) = self.store.unsynced_count() {
                state.sync_status.pending = pending;
            }
            if state.sync_status.syncing {
                return;
            }
        }
        self.worker.send(SyncCommand::Sync { filter });
    }

    // --- event handling ---

    fn handle_event(&self, event: SyncEvent) {
        match event {
            SyncEvent::Status(status) => {
                let notebooks = self.store.list_notebooks().ok();
                let mut state = self.state();
                state.sync_status = status;
                // Pull sync may have merged notebooks the list missed
                if let Some(notebooks) = notebooks {
                    state.notebooks = notebooks;
                }
            }
            SyncEvent::NotesUpdated(notes) | SyncEvent::RealtimeUpdate(notes) => {
                for note in notes {
                    self.apply_note(&note);
                }
            }
            SyncEvent::SyncError { message } => {
                tracing::warn!(%message, "sync failed");
                self.state().sync_status.error = Some(message);
            }
        }
    }

    /// Fold one note into the selected-notebook view; tombstones drop out.
    fn apply_note(&self, note: &Note) {
        let mut state = self.state();
        if state.selected != Some(note.notebook_id) {
            return;
        }
        state.notes.retain(|existing| existing.id != note.id);
        if note.deleted {
            if state.current_note == Some(note.id) {
                state.current_note = None;
            }
        } else {
            state.notes.push(note.clone());
        }
    }

    fn reload_notebooks(&self) -> Result<()> {
        let notebooks = self.store.list_notebooks()?;
        self.state().notebooks = notebooks;
        Ok(())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.lock(&self.state)
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn ensure_owner(identity: &Identity, notebook: &Notebook) -> Result<()> {
    if notebook.owner_id == *identity.user_id() {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "notebook {} is owned by another user",
            notebook.id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_session;
    use crate::remote::mock::{MockRemote, RemoteOp};
    use crate::sync::realtime::mock::MockFeed;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    struct Harness {
        service: Arc<NotebookService>,
        remote: Arc<MockRemote>,
        feed: Arc<MockFeed>,
    }

    fn setup() -> Harness {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let remote = Arc::new(MockRemote::default());
        let feed = Arc::new(MockFeed::default());
        let service = NotebookService::new(
            store,
            Arc::clone(&remote) as Arc<dyn RemoteStore>,
            Arc::clone(&feed) as Arc<dyn RealtimeFeed>,
            SyncConfig::default().without_auto_sync(),
        );
        service.initialize().unwrap();
        Harness {
            service,
            remote,
            feed,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(WAIT, async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_offline_mutations_queue_and_flush_on_auth() {
        let harness = setup();
        let service = &harness.service;

        // No session yet: everything lands locally and queues
        let session = test_session("user-1");
        let identity = session.identity();
        let notebook = service
            .create_notebook(&identity, "Songs", None)
            .unwrap();
        let note = service
            .create_note(&identity, notebook.id, NoteType::Chordpro, "Intro")
            .unwrap();

        assert_eq!(service.notebooks().len(), 1);
        wait_until(|| service.sync_status().pending == 2 && !service.sync_status().syncing).await;
        assert!(harness.remote.recorded_ops().is_empty());

        // Session arrives; the next trigger drains the whole queue. The
        // trigger is re-issued while polling since requests arriving during
        // a running cycle are coalesced away.
        service.set_session(session);
        wait_until(|| {
            service.sync_now();
            service.sync_status().pending == 0
        })
        .await;
        assert_eq!(
            harness.remote.recorded_ops(),
            vec![
                RemoteOp::UpsertNotebook(notebook.id.as_str()),
                RemoteOp::UpsertNote(note.id.as_str(), 1),
            ]
        );
        assert!(service.sync_status().last_synced.is_some());

        service.dispose();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_note_edit_bumps_version_and_stamps_editor() {
        let harness = setup();
        let service = &harness.service;
        let identity = test_session("user-1").identity();

        let notebook = service.create_notebook(&identity, "N", None).unwrap();
        let note = service
            .create_note(&identity, notebook.id, NoteType::Markdown, "a")
            .unwrap();

        let editor = test_session("user-2").identity();
        let mut edited = note.clone();
        edited.content = "chords".to_string();
        let updated = service.update_note(&editor, edited).unwrap();

        assert_eq!(updated.version, 2);
        assert_eq!(updated.last_modified_by.as_str(), "user-2");
        assert_eq!(updated.created_by.as_str(), "user-1");

        service.dispose();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_note_appends_after_highest_position() {
        let harness = setup();
        let service = &harness.service;
        let identity = test_session("user-1").identity();

        let notebook = service.create_notebook(&identity, "N", None).unwrap();
        let first = service
            .create_note(&identity, notebook.id, NoteType::Markdown, "a")
            .unwrap();
        let second = service
            .create_note(&identity, notebook.id, NoteType::Markdown, "b")
            .unwrap();

        assert_eq!(first.position, 0);
        assert_eq!(second.position, 1);

        service.select_notebook(notebook.id).unwrap();
        let titles: Vec<String> = service
            .sorted_notes()
            .into_iter()
            .map(|note| note.title)
            .collect();
        assert_eq!(titles, vec!["a", "b"]);

        service.dispose();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_note_requires_existing_notebook() {
        let harness = setup();
        let identity = test_session("user-1").identity();

        let error = harness
            .service
            .create_note(&identity, NotebookId::new(), NoteType::Markdown, "orphan")
            .unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));

        harness.service.dispose();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_select_note_tracks_current_note() {
        let harness = setup();
        let service = &harness.service;
        let identity = test_session("user-1").identity();

        let notebook = service.create_notebook(&identity, "N", None).unwrap();
        let note = service
            .create_note(&identity, notebook.id, NoteType::Markdown, "a")
            .unwrap();
        service.select_notebook(notebook.id).unwrap();

        assert!(service.current_note().is_none());
        let opened = service.select_note(note.id).unwrap();
        assert_eq!(opened.id, note.id);
        assert_eq!(service.current_note().map(|n| n.id), Some(note.id));

        // Deleting the open note closes it
        service.delete_note(&identity, note.id).unwrap();
        assert!(service.current_note().is_none());

        service.dispose();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_notebook_clears_selection_and_notes() {
        let harness = setup();
        let service = &harness.service;
        let identity = test_session("user-1").identity();

        let notebook = service.create_notebook(&identity, "N", None).unwrap();
        service
            .create_note(&identity, notebook.id, NoteType::Markdown, "a")
            .unwrap();
        service.select_notebook(notebook.id).unwrap();
        assert_eq!(service.sorted_notes().len(), 1);

        service.delete_notebook(&identity, notebook.id).unwrap();

        assert!(service.notebooks().is_empty());
        assert!(service.selected_notebook().is_none());
        assert!(service.sorted_notes().is_empty());

        service.dispose();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_notebook_mutations_require_owner_identity() {
        let harness = setup();
        let service = &harness.service;
        let owner = test_session("user-1").identity();
        let other = test_session("user-2").identity();

        let notebook = service.create_notebook(&owner, "N", None).unwrap();

        let error = service
            .update_notebook(&other, notebook.clone())
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
        let error = service.delete_notebook(&other, notebook.id).unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
        assert_eq!(service.notebooks().len(), 1);

        // The owner's edits go through
        service.update_notebook(&owner, notebook.clone()).unwrap();
        service.delete_notebook(&owner, notebook.id).unwrap();
        assert!(service.notebooks().is_empty());

        service.dispose();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_realtime_note_appears_in_selected_notebook() {
        let harness = setup();
        let service = &harness.service;
        let identity = test_session("user-1").identity();

        let notebook = service.create_notebook(&identity, "N", None).unwrap();
        service.select_notebook(notebook.id).unwrap();

        wait_until(|| harness.feed.latest_sink().is_some()).await;
        let (subscribed, sink) = harness.feed.latest_sink().unwrap();
        assert_eq!(subscribed, notebook.id);

        let remote_note = Note::new(
            notebook.id,
            NoteType::Markdown,
            "from elsewhere",
            5,
            test_session("user-2").identity().user_id().clone(),
        );
        sink.send(remote_note.clone()).unwrap();

        wait_until(|| service.sorted_notes().iter().any(|n| n.id == remote_note.id)).await;

        // A tombstone for the same note at a higher version removes it
        let mut tombstone = remote_note.clone();
        tombstone.deleted = true;
        tombstone.version += 1;
        sink.send(tombstone).unwrap();

        wait_until(|| service.sorted_notes().iter().all(|n| n.id != remote_note.id)).await;

        service.dispose();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sync_error_surfaces_in_status() {
        let harness = setup();
        let service = &harness.service;
        let identity = test_session("user-1").identity();

        service.create_notebook(&identity, "N", None).unwrap();
        harness.remote.fail_push_at(0, "permission denied");

        // Let the unauthenticated cycle the mutation triggered settle first
        wait_until(|| {
            let status = service.sync_status();
            !status.syncing && status.error.is_some()
        })
        .await;

        service.set_session(test_session("user-1"));
        service.sync_now();

        wait_until(|| {
            service
                .sync_status()
                .error
                .as_deref()
                .is_some_and(|error| error.contains("permission denied"))
        })
        .await;
        assert_eq!(service.sync_status().pending, 1);

        service.dispose();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_initialize_reloads_persisted_state() {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let identity = test_session("user-1").identity();
        let notebook = Notebook::new("persisted", None, identity.user_id().clone());
        store
            .put_notebook_with_change(
                &notebook,
                &PendingChange::for_notebook(Operation::Create, &notebook),
            )
            .unwrap();

        let service = NotebookService::new(
            store,
            Arc::new(MockRemote::default()) as Arc<dyn RemoteStore>,
            Arc::new(MockFeed::default()) as Arc<dyn RealtimeFeed>,
            SyncConfig::default().without_auto_sync(),
        );
        service.initialize().unwrap();

        assert_eq!(service.notebooks(), vec![notebook]);
        assert_eq!(service.sync_status().pending, 1);

        service.dispose();
    }
}
