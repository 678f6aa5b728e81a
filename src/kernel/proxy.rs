//! The client-facing facade.
//!
//! A proxy exposes the same operation surface as its model: callers name an
//! operation and pass arguments; the dispatch table selects the unique
//! matching overload and the engine runs it. Calls are synchronous and
//! blocking: the calling thread is suspended until the unit completes, and
//! errors re-raise exactly as the engine produced them.

use std::sync::Arc;

use crate::kernel::engine::{EngineError, Shared};
use crate::kernel::traits::Model;
use crate::kernel::value::Value;

/// Facade over a running engine. Cheap to clone; every clone talks to the
/// same engine.
pub struct Proxy<M: Model> {
    shared: Arc<Shared<M>>,
}

impl<M: Model> Proxy<M> {
    pub(crate) fn new(shared: Arc<Shared<M>>) -> Self {
        Proxy { shared }
    }

    /// Invoke an operation by name.
    ///
    /// Dispatch failures (`ValidationError`) surface before the engine sees
    /// the call; everything else is the unit's own outcome.
    pub fn call(&self, operation: &str, args: &[Value]) -> Result<Value, EngineError> {
        self.shared.submit_by_name(operation, args)
    }
}

impl<M: Model> Clone for Proxy<M> {
    fn clone(&self) -> Self {
        Proxy {
            shared: self.shared.clone(),
        }
    }
}
