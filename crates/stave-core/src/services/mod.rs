//! Domain services
//!
//! Application-facing state holders. Each service owns its collaborators,
//! is explicitly started with `initialize` and stopped with `dispose`, and
//! exposes snapshots rather than live references.

pub mod notebook;

pub use notebook::NotebookService;
