//! Local durable storage for Stave
//!
//! Three SQLite-backed stores (`notebooks`, `notes`, `pending_changes`)
//! holding JSON documents with extracted index columns, plus the
//! transactional outbox commit used by every local mutation.

mod connection;
mod migrations;
mod store;

pub use connection::Database;
pub use store::LocalStore;
