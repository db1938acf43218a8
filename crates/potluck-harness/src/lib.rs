//! Potluck Harness
//!
//! In-memory implementations of every collaborator the sync engine talks to,
//! plus a controllable clock. Used by the runtime integration tests and by the
//! `potluck-sync demo` command.

pub mod backend;
pub mod time;

pub use backend::{BackendCall, FeedPayload, InMemoryBackend, InMemoryBackendConfig, Operation};
pub use time::MockTimeSource;
