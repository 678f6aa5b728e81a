use std::error::Error;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::kernel::value::{Value, ValueKind};

// =============================================================================
// TIMESTAMP
// =============================================================================

/// A point in time, nanoseconds since the Unix epoch.
///
/// Commands observe the admission timestamp recorded in their journal entry,
/// never the system clock, so replay sees the same instant the original
/// execution saw.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Create a timestamp from nanoseconds since the Unix epoch.
    pub fn from_nanos(nanos: u64) -> Self {
        Timestamp(nanos)
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        Timestamp(nanos)
    }

    /// Nanoseconds since the Unix epoch.
    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Milliseconds since the Unix epoch.
    pub fn as_millis(&self) -> u64 {
        self.0 / 1_000_000
    }

    /// Seconds since the Unix epoch.
    pub fn as_secs(&self) -> u64 {
        self.0 / 1_000_000_000
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

// =============================================================================
// OPERATION SURFACE
// =============================================================================

/// Classification of an operation, declared by the model author.
///
/// Never inferred: whether an operation mutates is part of its contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    /// Mutates the model. Executed exclusively, journaled on success.
    Command,
    /// Read-only. Never journaled, runs concurrently with other queries.
    Query,
}

/// A declared parameter of an operation.
#[derive(Clone, Copy, Debug)]
pub struct ParamDecl {
    pub name: &'static str,
    pub kind: ValueKind,
    /// Default used when the caller omits this (trailing) parameter.
    pub default: Option<fn() -> Value>,
}

impl ParamDecl {
    pub const fn required(name: &'static str, kind: ValueKind) -> Self {
        ParamDecl {
            name,
            kind,
            default: None,
        }
    }

    pub const fn defaulted(name: &'static str, kind: ValueKind, default: fn() -> Value) -> Self {
        ParamDecl {
            name,
            kind,
            default: Some(default),
        }
    }
}

/// One declared operation of a model's surface.
///
/// Operations may share a name; the dispatch table resolves among them by
/// arity and argument kinds. A declaration with a `variadic` tail kind is a
/// catch-all: it accepts any number of extra arguments of that kind beyond
/// its fixed parameters, and loses to any fixed-arity match.
#[derive(Clone, Copy, Debug)]
pub struct OperationDecl {
    pub name: &'static str,
    pub kind: OperationKind,
    pub params: &'static [ParamDecl],
    pub variadic: Option<ValueKind>,
}

impl OperationDecl {
    pub const fn command(name: &'static str, params: &'static [ParamDecl]) -> Self {
        OperationDecl {
            name,
            kind: OperationKind::Command,
            params,
            variadic: None,
        }
    }

    pub const fn query(name: &'static str, params: &'static [ParamDecl]) -> Self {
        OperationDecl {
            name,
            kind: OperationKind::Query,
            params,
            variadic: None,
        }
    }

    pub const fn variadic_command(
        name: &'static str,
        params: &'static [ParamDecl],
        tail: ValueKind,
    ) -> Self {
        OperationDecl {
            name,
            kind: OperationKind::Command,
            params,
            variadic: Some(tail),
        }
    }

    pub const fn variadic_query(
        name: &'static str,
        params: &'static [ParamDecl],
        tail: ValueKind,
    ) -> Self {
        OperationDecl {
            name,
            kind: OperationKind::Query,
            params,
            variadic: Some(tail),
        }
    }

    /// Number of parameters the caller must supply.
    pub fn required_arity(&self) -> usize {
        self.params.iter().filter(|p| p.default.is_none()).count()
    }
}

// =============================================================================
// CALL
// =============================================================================

/// A resolved invocation handed to the model.
///
/// `stamp` is the admission timestamp for commands (identical on replay) and
/// the wall clock at call time for queries. Time-dependent command logic must
/// read it instead of the system clock.
#[derive(Clone, Debug)]
pub struct Call<'a> {
    pub operation: &'a str,
    pub args: &'a [Value],
    pub stamp: Timestamp,
}

impl<'a> Call<'a> {
    pub fn new(operation: &'a str, args: &'a [Value], stamp: Timestamp) -> Self {
        Call {
            operation,
            args,
            stamp,
        }
    }

    /// Bound argument at `index`. Dispatch fills defaults before the model
    /// runs, so every declared position is present.
    pub fn arg(&self, index: usize) -> &Value {
        &self.args[index]
    }
}

// =============================================================================
// SNAPSHOT STREAM
// =============================================================================

/// A byte stream for model state export/import.
#[derive(Clone, Debug)]
pub struct SnapshotStream {
    /// Schema version of the exported state format.
    pub schema_version: u32,
    /// The serialized state bytes.
    pub data: Vec<u8>,
}

// =============================================================================
// MODEL TRAIT
// =============================================================================

/// The core contract for journaled models.
///
/// # Laws
///
/// 1. `execute()` MUST be deterministic given (state, call): identical replay
///    produces identical state. No system time (use `call.stamp`), no
///    randomness, no IO.
/// 2. `query()` MUST be read-only: no state mutation, ever.
/// 3. `import(export(model))` MUST reproduce the model exactly.
/// 4. The declared surface MUST cover every operation `execute`/`query`
///    accept, with trailing defaults only.
pub trait Model: Send + Sync + Sized + 'static {
    /// Deterministic error type for rejected operations.
    type Error: Error + Send + Sync + 'static;

    /// The empty model a fresh engine starts from.
    fn genesis() -> Self;

    /// The declared operation surface, introspected once per engine.
    fn operations() -> &'static [OperationDecl];

    /// Apply a mutating command.
    ///
    /// On error the engine journals nothing, but any mutation already
    /// performed stays visible. Validate before mutating when atomicity
    /// matters.
    fn execute(&mut self, call: &Call<'_>) -> Result<Value, Self::Error>;

    /// Answer a read-only query. May be called concurrently.
    fn query(&self, call: &Call<'_>) -> Result<Value, Self::Error>;

    /// Serialize the entire model state for snapshotting.
    fn export(&self) -> Result<SnapshotStream, Self::Error>;

    /// Rebuild a model from exported state.
    fn import(stream: SnapshotStream) -> Result<Self, Self::Error>;
}
