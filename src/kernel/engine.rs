//! The engine: single authority over the model and the concurrency
//! discipline.
//!
//! One `RwLock` guards the model. Queries share the read side; commands take
//! the write side, and while holding it: apply, append to the journal, fire
//! notifications, optionally auto-snapshot. Write-lock acquisition order is
//! therefore the journal order and the replay order.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockWriteGuard, Weak};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::kernel::dispatch::{DispatchTable, ResolvedCall, ValidationError};
use crate::kernel::scheduler::EvictionScheduler;
use crate::kernel::traits::{Call, Model, OperationKind, Timestamp};
use crate::kernel::value::Value;
use crate::store::{FileStore, JournalCommand, Store, StoreError};

/// Commands between automatic snapshots, unless overridden.
pub(crate) const DEFAULT_SNAPSHOT_EVERY: u64 = 1000;

/// Default eviction tick interval.
pub(crate) const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(1);

const STATUS_RUNNING: u8 = 1;
const STATUS_CLOSED: u8 = 2;

// =============================================================================
// SETTINGS
// =============================================================================

/// Eviction scheduler configuration: which command to submit, how often.
#[derive(Clone, Debug)]
pub struct EvictionSettings {
    pub operation: String,
    pub interval: Duration,
}

/// Engine configuration. Construction only; loading settings from files or
/// flags is the caller's concern.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// Directory holding the journal and snapshots.
    pub location: PathBuf,
    /// Commands between automatic snapshots. 0 disables them; snapshots can
    /// still be taken on demand.
    pub snapshot_every: u64,
    /// Background eviction, if the model has a purge command.
    pub eviction: Option<EvictionSettings>,
}

impl EngineSettings {
    pub fn at(location: impl Into<PathBuf>) -> Self {
        EngineSettings {
            location: location.into(),
            snapshot_every: DEFAULT_SNAPSHOT_EVERY,
            eviction: None,
        }
    }

    pub fn with_snapshot_every(mut self, commands: u64) -> Self {
        self.snapshot_every = commands;
        self
    }

    /// Enable the eviction scheduler, submitting `operation` (a
    /// zero-argument command) on the default interval.
    pub fn with_eviction(self, operation: &str) -> Self {
        self.with_eviction_interval(operation, DEFAULT_EVICTION_INTERVAL)
    }

    pub fn with_eviction_interval(mut self, operation: &str, interval: Duration) -> Self {
        self.eviction = Some(EvictionSettings {
            operation: operation.to_string(),
            interval,
        });
        self
    }
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Description of one executed unit, delivered to observers synchronously on
/// the executing thread.
#[derive(Clone, Debug)]
pub struct Execution {
    /// Journal sequence number; `None` for queries.
    pub seq: Option<u64>,
    /// The stamp the unit observed.
    pub stamp: Timestamp,
    pub kind: OperationKind,
    pub operation: String,
    pub args: Vec<Value>,
}

type Observer = Box<dyn Fn(&Execution) + Send + Sync>;

// =============================================================================
// ERRORS
// =============================================================================

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The call matched no declared overload, or more than one.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The model rejected the unit while applying it. For commands, nothing
    /// was journaled, but partial in-memory mutation is not rolled back.
    #[error("operation '{operation}' failed: {source}")]
    Execution {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Journal or snapshot failure.
    #[error(transparent)]
    Persistence(#[from] StoreError),

    /// The configured eviction operation is not a zero-argument command of
    /// the model's surface.
    #[error("eviction operation '{0}' is not a zero-argument command")]
    InvalidEvictionOperation(String),

    /// The engine has been closed; no further submissions are accepted.
    #[error("engine is closed")]
    Closed,

    /// A command panicked while holding the model, leaving its state
    /// suspect. The engine refuses further work.
    #[error("model poisoned by a panicked command")]
    Poisoned,
}

// =============================================================================
// SHARED STATE
// =============================================================================

struct StoreState {
    store: Box<dyn Store>,
    /// Commands journaled since the last snapshot.
    since_snapshot: u64,
}

/// State shared between the engine, its proxies, and the scheduler thread.
pub(crate) struct Shared<M: Model> {
    model: RwLock<M>,
    store: Mutex<StoreState>,
    dispatch: DispatchTable,
    observers: RwLock<Vec<Observer>>,
    status: AtomicU8,
    snapshot_every: u64,
}

impl<M: Model> Shared<M> {
    fn ensure_running(&self) -> Result<(), EngineError> {
        if self.status.load(Ordering::SeqCst) != STATUS_RUNNING {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    fn write_model(&self) -> Result<RwLockWriteGuard<'_, M>, EngineError> {
        self.model.write().map_err(|_| EngineError::Poisoned)
    }

    /// Resolve and submit a call, routing by its declared kind.
    pub(crate) fn submit_by_name(&self, name: &str, args: &[Value]) -> Result<Value, EngineError> {
        let resolved = self.dispatch.resolve(name, args)?;
        match resolved.kind() {
            OperationKind::Command => self.submit_command(resolved),
            OperationKind::Query => self.submit_query(resolved),
        }
    }

    /// Execute a command under the exclusive slot: apply, journal, notify.
    fn submit_command(&self, resolved: ResolvedCall) -> Result<Value, EngineError> {
        self.ensure_running()?;

        let operation = resolved.decl.name;
        let stamp = Timestamp::now();

        let mut model = self.write_model()?;
        // Lifecycle may have flipped while we waited for the slot.
        self.ensure_running()?;

        let call = Call::new(operation, &resolved.args, stamp);
        let result = model.execute(&call).map_err(|e| EngineError::Execution {
            operation: operation.to_string(),
            source: Box::new(e),
        })?;

        // The command completed; make it durable before anyone hears of it.
        let seq = {
            let mut store = self.store.lock().map_err(|_| EngineError::Poisoned)?;
            let seq = store.store.append(
                &JournalCommand {
                    name: operation.to_string(),
                    args: resolved.args.clone(),
                },
                stamp,
            )?;
            store.since_snapshot += 1;

            if self.snapshot_every > 0 && store.since_snapshot >= self.snapshot_every {
                // Snapshots bound replay cost; failing to take one must not
                // fail the command that triggered it.
                match model.export() {
                    Ok(stream) => match store.store.write_snapshot(seq, &stream) {
                        Ok(()) => store.since_snapshot = 0,
                        Err(e) => warn!(seq, error = %e, "automatic snapshot write failed"),
                    },
                    Err(e) => warn!(seq, error = %e, "model export failed, snapshot skipped"),
                }
            }

            seq
        };

        self.notify(&Execution {
            seq: Some(seq),
            stamp,
            kind: OperationKind::Command,
            operation: operation.to_string(),
            args: resolved.args,
        });

        Ok(result)
    }

    /// Answer a query under a shared read slot.
    fn submit_query(&self, resolved: ResolvedCall) -> Result<Value, EngineError> {
        self.ensure_running()?;

        let operation = resolved.decl.name;
        let stamp = Timestamp::now();

        let model = self.model.read().map_err(|_| EngineError::Poisoned)?;
        let call = Call::new(operation, &resolved.args, stamp);
        let result = model.query(&call).map_err(|e| EngineError::Execution {
            operation: operation.to_string(),
            source: Box::new(e),
        })?;

        self.notify(&Execution {
            seq: None,
            stamp,
            kind: OperationKind::Query,
            operation: operation.to_string(),
            args: resolved.args,
        });

        Ok(result)
    }

    fn notify(&self, execution: &Execution) {
        if let Ok(observers) = self.observers.read() {
            for observer in observers.iter() {
                observer(execution);
            }
        }
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// The kernel: owns the model, the store, and the scheduler.
pub struct Engine<M: Model> {
    shared: Arc<Shared<M>>,
    scheduler: Mutex<Option<EvictionScheduler>>,
}

impl<M: Model> Engine<M> {
    /// Create a fresh store and an empty model. Fails if a store already
    /// exists at the configured location.
    pub fn create(settings: EngineSettings) -> Result<Self, EngineError> {
        let dispatch = DispatchTable::build(M::operations())?;
        Self::validate_eviction(&dispatch, &settings)?;

        let store = FileStore::create(&settings.location)?;
        let model = M::genesis();

        debug!(location = %settings.location.display(), "engine created");
        Self::start(model, Box::new(store), dispatch, settings, 0)
    }

    /// Restore a model from an existing store: latest snapshot plus replay
    /// of every later journal entry, in sequence order.
    pub fn load(settings: EngineSettings) -> Result<Self, EngineError> {
        let dispatch = DispatchTable::build(M::operations())?;
        Self::validate_eviction(&dispatch, &settings)?;

        let store = FileStore::open(&settings.location)?;

        let (mut model, from_seq) = match store.latest_snapshot()? {
            Some(snapshot) => {
                let model = M::import(snapshot.state).map_err(|e| {
                    EngineError::Persistence(StoreError::Snapshot(format!(
                        "model import failed: {}",
                        e
                    )))
                })?;
                (model, snapshot.seq + 1)
            }
            None => (M::genesis(), 0),
        };

        let entries = store.read_from(from_seq)?;
        let replayed = entries.len() as u64;

        for entry in &entries {
            // A journal that no longer resolves against the surface cannot
            // be interpreted; that is a persistence failure, not a skip.
            let resolved = dispatch
                .resolve(&entry.command.name, &entry.command.args)
                .map_err(|e| {
                    EngineError::Persistence(StoreError::Codec {
                        seq: entry.seq,
                        message: e.to_string(),
                    })
                })?;
            if resolved.kind() != OperationKind::Command {
                return Err(EngineError::Persistence(StoreError::Codec {
                    seq: entry.seq,
                    message: format!("journaled operation '{}' resolves to a query", entry.command.name),
                }));
            }

            let call = Call::new(resolved.decl.name, &resolved.args, entry.stamp);
            if let Err(e) = model.execute(&call) {
                // The original execution succeeded before it was journaled;
                // a rejection here means the model is nondeterministic.
                warn!(seq = entry.seq, error = %e, "journaled command rejected during replay");
            }
        }

        debug!(
            location = %settings.location.display(),
            from_seq,
            replayed,
            "engine loaded"
        );
        Self::start(model, Box::new(store), dispatch, settings, replayed)
    }

    fn validate_eviction(
        dispatch: &DispatchTable,
        settings: &EngineSettings,
    ) -> Result<(), EngineError> {
        if let Some(eviction) = &settings.eviction {
            let resolved = dispatch
                .resolve(&eviction.operation, &[])
                .map_err(|_| EngineError::InvalidEvictionOperation(eviction.operation.clone()))?;
            if resolved.kind() != OperationKind::Command {
                return Err(EngineError::InvalidEvictionOperation(
                    eviction.operation.clone(),
                ));
            }
        }
        Ok(())
    }

    fn start(
        model: M,
        store: Box<dyn Store>,
        dispatch: DispatchTable,
        settings: EngineSettings,
        since_snapshot: u64,
    ) -> Result<Self, EngineError> {
        let shared = Arc::new(Shared {
            model: RwLock::new(model),
            store: Mutex::new(StoreState {
                store,
                since_snapshot,
            }),
            dispatch,
            observers: RwLock::new(Vec::new()),
            status: AtomicU8::new(STATUS_RUNNING),
            snapshot_every: settings.snapshot_every,
        });

        let scheduler = settings.eviction.map(|eviction| {
            let weak: Weak<Shared<M>> = Arc::downgrade(&shared);
            let operation = eviction.operation.clone();
            EvictionScheduler::spawn(
                eviction.interval,
                eviction.operation,
                Box::new(move || {
                    let shared = match weak.upgrade() {
                        Some(shared) => shared,
                        None => return Ok(()),
                    };
                    shared.submit_by_name(&operation, &[])?;
                    Ok(())
                }),
            )
        });

        Ok(Engine {
            shared,
            scheduler: Mutex::new(scheduler),
        })
    }

    /// The client-facing facade for this engine.
    pub fn proxy(&self) -> crate::kernel::proxy::Proxy<M> {
        crate::kernel::proxy::Proxy::new(self.shared.clone())
    }

    /// Register an execution observer.
    ///
    /// Observers run synchronously on the executing thread, after durability
    /// for commands and before the model slot is released; a slow observer
    /// delays every subsequent submission.
    pub fn subscribe(&self, observer: impl Fn(&Execution) + Send + Sync + 'static) {
        if let Ok(mut observers) = self.shared.observers.write() {
            observers.push(Box::new(observer));
        }
    }

    /// Take a snapshot of the current state on demand.
    ///
    /// Returns the journal seq the snapshot covers.
    pub fn take_snapshot(&self) -> Result<u64, EngineError> {
        self.shared.ensure_running()?;

        let model = self.shared.write_model()?;
        let mut store = self
            .shared
            .store
            .lock()
            .map_err(|_| EngineError::Poisoned)?;

        let next = store.store.next_seq();
        if next == 0 {
            return Err(EngineError::Persistence(StoreError::Snapshot(
                "no commands journaled yet".to_string(),
            )));
        }
        let seq = next - 1;

        let stream = model.export().map_err(|e| EngineError::Execution {
            operation: "export".to_string(),
            source: Box::new(e),
        })?;
        store.store.write_snapshot(seq, &stream)?;
        store.since_snapshot = 0;

        Ok(seq)
    }

    /// Stop the scheduler, wait for in-flight units, flush the store, and
    /// transition to Closed. Idempotent: later calls are no-ops.
    pub fn close(&self) -> Result<(), EngineError> {
        // No further scheduler ticks, whether or not we are first.
        if let Ok(mut scheduler) = self.scheduler.lock() {
            if let Some(mut handle) = scheduler.take() {
                handle.stop();
            }
        }

        let previous = self.shared.status.swap(STATUS_CLOSED, Ordering::SeqCst);
        if previous == STATUS_CLOSED {
            return Ok(());
        }

        // Wait for any in-flight command or query to leave the model.
        drop(self.shared.model.write());

        let mut store = self
            .shared
            .store
            .lock()
            .map_err(|_| EngineError::Poisoned)?;
        store.store.sync()?;

        debug!("engine closed");
        Ok(())
    }

    /// Whether the eviction scheduler is currently running.
    pub fn scheduler_running(&self) -> bool {
        self.scheduler
            .lock()
            .ok()
            .and_then(|s| s.as_ref().map(|s| s.is_running()))
            .unwrap_or(false)
    }
}

impl<M: Model> Drop for Engine<M> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
