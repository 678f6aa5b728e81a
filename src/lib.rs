//! # Ballast
//!
//! An in-process, command-sourced object database kernel.
//!
//! Ballast turns an arbitrary in-memory data model into a durable,
//! concurrency-safe service. Every public operation of the model is declared
//! as part of an operation surface and invoked through a [`Proxy`]; each call
//! is classified as a mutating *command* or a read-only *query*, executed
//! under a readers-writer discipline, journaled on success, and replayed from
//! the journal to reconstruct state after restart.
//!
//! ```text
//! caller ──► Proxy ──► DispatchTable (resolve overload)
//!                            │
//!                            ▼
//!                     Engine::submit
//!                            │
//!              ┌── query ────┴──── command ──┐
//!              ▼                             ▼
//!        read lock, answer         write lock, apply to model,
//!                                  append to journal, notify
//! ```
//!
//! ## Guarantees
//!
//! - Write-lock acquisition order defines a single global command order,
//!   identical to the journal sequence order and to the replay order.
//! - A command is journaled only after it completes; the journal never
//!   contains a failed command.
//! - Snapshots bound replay cost and never invalidate journal entries.
//!
//! ## What Ballast is not
//!
//! There is no transactional rollback: a command that fails mid-mutation
//! leaves its partial in-memory changes behind (and is not journaled).
//! Commands that need atomicity validate before mutating.

pub mod kernel;
pub mod models;
pub mod store;

pub use kernel::dispatch::{DispatchTable, ValidationError};
pub use kernel::engine::{Engine, EngineError, EngineSettings, EvictionSettings, Execution};
pub use kernel::expiry::ExpirationMap;
pub use kernel::proxy::Proxy;
pub use kernel::traits::{
    Call, Model, OperationDecl, OperationKind, ParamDecl, SnapshotStream, Timestamp,
};
pub use kernel::value::{Value, ValueKind};
pub use store::{FileStore, JournalCommand, JournalEntry, Store, StoreError};
