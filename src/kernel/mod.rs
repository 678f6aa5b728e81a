//! Kernel module: the execution runtime over a single journaled model.
//!
//! The kernel sits on top of the durable store and provides:
//! - Overload resolution from the model's declared operation surface
//! - Readers-writer execution of commands and queries
//! - Journaling of completed commands and replay on load
//! - Execution notifications for observers
//! - Background eviction through the ordinary command path

pub mod dispatch;
pub mod engine;
pub mod expiry;
pub mod proxy;
pub mod scheduler;
pub mod traits;
pub mod value;

#[cfg(test)]
mod tests;

pub use dispatch::{DispatchTable, ResolvedCall, ValidationError};
pub use engine::{Engine, EngineError, EngineSettings, EvictionSettings, Execution};
pub use expiry::ExpirationMap;
pub use proxy::Proxy;
pub use scheduler::EvictionScheduler;
pub use traits::{
    Call, Model, OperationDecl, OperationKind, ParamDecl, SnapshotStream, Timestamp,
};
pub use value::{Value, ValueKind};
