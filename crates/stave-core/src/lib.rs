//! stave-core - Core library for Stave
//!
//! This crate contains the shared models, local storage, offline-first sync
//! engine, and domain services used by all Stave interfaces. Writes land in
//! the local database first and queue an outbox entry in the same
//! transaction; a background worker drains the outbox to the remote store
//! and reconciles pulled changes last-writer-wins by version.

pub mod auth;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod sync;

pub use auth::{Identity, Session, UserId};
pub use db::{Database, LocalStore};
pub use error::{Error, Result};
pub use models::{Note, NoteId, Notebook, NotebookId};
pub use services::NotebookService;
pub use sync::SyncConfig;
