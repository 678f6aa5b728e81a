//! Background eviction scheduler.
//!
//! A thread owned by exactly one engine. On a fixed interval it submits the
//! configured purge command through the engine's ordinary command path — it
//! holds no reference to the model itself. A failed tick is logged and the
//! next tick proceeds; only `stop` (or dropping the handle) ends the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use tracing::{debug, warn};

/// The per-tick action: submit one purge command. Errors are contained at
/// this boundary.
pub(crate) type TickFn =
    Box<dyn FnMut() -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send>;

/// Handle to a running eviction thread.
pub struct EvictionScheduler {
    shutdown_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl EvictionScheduler {
    /// Spawn the scheduler thread. `operation` is only used for log context.
    pub(crate) fn spawn(interval: Duration, operation: String, mut tick_fn: TickFn) -> Self {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();

        let thread = thread::spawn(move || {
            debug!(operation = %operation, ?interval, "eviction scheduler started");
            let ticker = tick(interval);

            loop {
                select! {
                    recv(ticker) -> _ => {
                        if let Err(e) = tick_fn() {
                            warn!(operation = %operation, error = %e, "eviction tick failed");
                        }
                    }
                    recv(shutdown_rx) -> _ => break,
                }
            }

            thread_running.store(false, Ordering::SeqCst);
            debug!(operation = %operation, "eviction scheduler stopped");
        });

        EvictionScheduler {
            shutdown_tx,
            thread: Some(thread),
            running,
        }
    }

    /// Whether the scheduler thread is still looping.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Request shutdown and join the thread. Idempotent.
    pub fn stop(&mut self) {
        let _ = self.shutdown_tx.try_send(());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EvictionScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::time::Instant;

    #[test]
    fn test_ticks_fire_until_stopped() {
        let count = Arc::new(AtomicU64::new(0));
        let tick_count = count.clone();

        let mut scheduler = EvictionScheduler::spawn(
            Duration::from_millis(5),
            "purge".to_string(),
            Box::new(move || {
                tick_count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let deadline = Instant::now() + Duration::from_secs(2);
        while count.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(count.load(Ordering::SeqCst) >= 3, "scheduler never ticked");

        scheduler.stop();
        assert!(!scheduler.is_running());

        let after_stop = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_tick_failure_does_not_stop_the_loop() {
        let count = Arc::new(AtomicU64::new(0));
        let tick_count = count.clone();

        let mut scheduler = EvictionScheduler::spawn(
            Duration::from_millis(5),
            "purge".to_string(),
            Box::new(move || {
                tick_count.fetch_add(1, Ordering::SeqCst);
                Err("tick exploded".into())
            }),
        );

        let deadline = Instant::now() + Duration::from_secs(2);
        while count.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(
            count.load(Ordering::SeqCst) >= 3,
            "failing ticks stopped the scheduler"
        );

        scheduler.stop();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut scheduler = EvictionScheduler::spawn(
            Duration::from_millis(5),
            "purge".to_string(),
            Box::new(|| Ok(())),
        );
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());
    }
}
