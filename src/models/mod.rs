//! Reference models.
//!
//! Small, complete models exercising every corner of the kernel: the
//! key-value store carries the expiration contract; the overload model
//! carries the dispatch rules.

pub mod kv;
pub mod overloads;

pub use kv::{KvError, KvModel};
pub use overloads::{OverloadError, OverloadModel};
