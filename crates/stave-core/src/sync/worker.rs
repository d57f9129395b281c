//! Sync worker task
//!
//! The engine runs on its own tokio task and is reachable only through an
//! inbound command channel; results flow back as fire-and-forget events.
//! No state is shared with callers besides the durable store, whose
//! transactions are the isolation boundary.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::auth::Session;
use crate::db::LocalStore;
use crate::error::Error;
use crate::models::{Note, NotebookId, SyncFilter, SyncStatus};
use crate::remote::RemoteStore;

use super::engine::SyncEngine;
use super::realtime::{RealtimeFeed, RealtimeSubscription};
use super::SyncConfig;

/// Commands accepted by the worker
#[derive(Debug)]
pub enum SyncCommand {
    /// Run a sync cycle, optionally scoped to one entity
    Sync { filter: Option<SyncFilter> },
    /// Cache (or rotate) the session credential
    Auth { session: Session },
    /// Subscribe the realtime feed to a notebook, replacing any previous
    /// subscription
    Subscribe { notebook_id: NotebookId },
    /// Stop the worker
    Shutdown,
}

/// Events emitted by the worker
#[derive(Debug)]
pub enum SyncEvent {
    /// Sync status snapshot for UI affordances
    Status(SyncStatus),
    /// Remote notes accepted during the pull step
    NotesUpdated(Vec<Note>),
    /// A cycle failed after it started
    SyncError { message: String },
    /// Remote notes accepted from the realtime feed
    RealtimeUpdate(Vec<Note>),
}

/// Handle owned by the domain service; commands are fire-and-forget.
pub struct SyncWorkerHandle {
    commands: mpsc::UnboundedSender<SyncCommand>,
    task: JoinHandle<()>,
}

impl SyncWorkerHandle {
    /// Send a command to the worker; dropped silently once it has stopped.
    pub fn send(&self, command: SyncCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!("sync worker is gone; command dropped");
        }
    }

    /// Ask the worker to stop and release its subscription.
    pub fn shutdown(&self) {
        self.send(SyncCommand::Shutdown);
        self.task.abort();
    }
}

/// Spawn the sync worker task.
///
/// Requires a running tokio runtime. Events are delivered on `events`
/// until the worker shuts down.
pub fn spawn(
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteStore>,
    feed: Arc<dyn RealtimeFeed>,
    config: SyncConfig,
    events: mpsc::UnboundedSender<SyncEvent>,
) -> SyncWorkerHandle {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let engine = SyncEngine::new(Arc::clone(&store), remote, config.pull_limit);

    let worker = SyncWorker {
        engine,
        store,
        feed,
        events,
        status: SyncStatus::default(),
        subscription: None,
    };

    let task = tokio::spawn(worker.run(commands_rx, config));

    SyncWorkerHandle {
        commands: commands_tx,
        task,
    }
}

struct SyncWorker {
    engine: SyncEngine,
    store: Arc<LocalStore>,
    feed: Arc<dyn RealtimeFeed>,
    events: mpsc::UnboundedSender<SyncEvent>,
    status: SyncStatus,
    subscription: Option<RealtimeSubscription>,
}

impl SyncWorker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SyncCommand>,
        config: SyncConfig,
    ) {
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<Note>();
        // First tick waits a full interval; startup is not a sync trigger
        let mut interval = tokio::time::interval_at(
            tokio::time::Instant::now() + config.sync_interval,
            config.sync_interval,
        );
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SyncCommand::Sync { filter }) => {
                        self.run_sync(filter).await;
                        if self.drain_queued(&mut commands, &inbound_tx).await {
                            break;
                        }
                    }
                    Some(SyncCommand::Auth { session }) => self.engine.set_session(session),
                    Some(SyncCommand::Subscribe { notebook_id }) => {
                        self.resubscribe(notebook_id, &inbound_tx).await;
                    }
                    Some(SyncCommand::Shutdown) | None => break,
                },
                Some(note) = inbound_rx.recv() => self.handle_realtime(note),
                _ = interval.tick(), if config.auto_sync => {
                    self.run_sync(None).await;
                    if self.drain_queued(&mut commands, &inbound_tx).await {
                        break;
                    }
                }
            }
        }

        self.subscription.take();
        tracing::debug!("sync worker stopped");
    }

    /// Drop sync triggers that queued up while a cycle ran; the finished
    /// cycle already drained the outbox they refer to. Other commands are
    /// still applied. Returns true on shutdown.
    async fn drain_queued(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<SyncCommand>,
        inbound: &mpsc::UnboundedSender<Note>,
    ) -> bool {
        while let Ok(command) = commands.try_recv() {
            match command {
                SyncCommand::Sync { .. } => {
                    tracing::debug!("dropping sync trigger queued during a cycle");
                }
                SyncCommand::Auth { session } => self.engine.set_session(session),
                SyncCommand::Subscribe { notebook_id } => {
                    self.resubscribe(notebook_id, inbound).await;
                }
                SyncCommand::Shutdown => return true,
            }
        }
        false
    }

    async fn run_sync(&mut self, filter: Option<SyncFilter>) {
        self.status.syncing = true;
        self.status.error = None;
        self.emit_status();

        match self.engine.run_cycle(filter.as_ref()).await {
            Ok(outcome) => {
                self.status.last_synced = Some(Utc::now());
                self.status.error = None;
                if !outcome.merged.is_empty() {
                    self.emit(SyncEvent::NotesUpdated(outcome.merged));
                }
            }
            Err(Error::NoSession) => {
                // Recoverable: retried on the next trigger once a session
                // arrives
                self.status.error = Some(Error::NoSession.to_string());
            }
            Err(error) => {
                tracing::warn!(%error, "sync cycle failed");
                self.status.error = Some(error.to_string());
                self.emit(SyncEvent::SyncError {
                    message: error.to_string(),
                });
            }
        }

        self.status.syncing = false;
        self.status.pending = self.store.unsynced_count().unwrap_or(self.status.pending);
        self.emit_status();
    }

    fn handle_realtime(&mut self, note: Note) {
        // Same version-gated merge as pull sync
        match self.engine.reconcile(vec![note]) {
            Ok(accepted) if !accepted.is_empty() => {
                self.emit(SyncEvent::RealtimeUpdate(accepted));
            }
            Ok(_) => {}
            Err(error) => tracing::warn!(%error, "failed to apply realtime update"),
        }
    }

    async fn resubscribe(
        &mut self,
        notebook_id: NotebookId,
        inbound: &mpsc::UnboundedSender<Note>,
    ) {
        if let Some(current) = &self.subscription {
            if current.notebook_id() == notebook_id {
                return;
            }
        }

        // Tear down before creating: never two live subscriptions
        self.subscription.take();
        match self.feed.subscribe(notebook_id, inbound.clone()).await {
            Ok(subscription) => {
                tracing::debug!(notebook = %notebook_id, "realtime subscription established");
                self.subscription = Some(subscription);
            }
            Err(error) => {
                tracing::warn!(%error, notebook = %notebook_id, "realtime subscription failed");
            }
        }
    }

    fn emit_status(&self) {
        self.emit(SyncEvent::Status(self.status.clone()));
    }

    fn emit(&self, event: SyncEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}
