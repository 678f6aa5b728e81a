//! Engine integration tests.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;

use tempfile::{tempdir, TempDir};

use crate::kernel::engine::{Engine, EngineError, EngineSettings};
use crate::kernel::traits::{OperationKind, Timestamp};
use crate::kernel::value::Value;
use crate::models::{KvModel, OverloadModel};
use crate::store::StoreError;

fn settings_in(dir: &TempDir) -> EngineSettings {
    EngineSettings::at(dir.path().join("db"))
}

#[test]
fn test_command_and_query_roundtrip() {
    let dir = tempdir().unwrap();
    let engine = Engine::<KvModel>::create(settings_in(&dir)).unwrap();
    let proxy = engine.proxy();

    proxy.call("set", &["key".into(), "value".into()]).unwrap();
    assert_eq!(
        proxy.call("get", &["key".into()]).unwrap(),
        Value::from("value")
    );
    assert_eq!(proxy.call("key_count", &[]).unwrap(), Value::Int(1));

    engine.close().unwrap();
}

#[test]
fn test_validation_errors_surface_before_submission() {
    let dir = tempdir().unwrap();
    let engine = Engine::<KvModel>::create(settings_in(&dir)).unwrap();
    let proxy = engine.proxy();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let observer_seen = seen.clone();
    engine.subscribe(move |execution| {
        observer_seen.lock().unwrap().push(execution.operation.clone());
    });

    assert!(matches!(
        proxy.call("no_such_operation", &[]),
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        proxy.call("set", &["only-one-arg".into()]),
        Err(EngineError::Validation(_))
    ));

    // Neither call reached the engine, so nothing executed.
    assert!(seen.lock().unwrap().is_empty());

    engine.close().unwrap();
}

#[test]
fn test_failed_command_is_not_journaled() {
    let dir = tempdir().unwrap();
    let settings = settings_in(&dir);

    let engine = Engine::<KvModel>::create(settings.clone()).unwrap();
    let proxy = engine.proxy();

    proxy.call("set", &["a".into(), "1".into()]).unwrap();
    let result = proxy.call("rename", &["ghost".into(), "b".into()]);
    assert!(matches!(result, Err(EngineError::Execution { .. })));
    engine.close().unwrap();
    drop(engine);

    // Restart: only the successful command replays.
    let engine = Engine::<KvModel>::load(settings).unwrap();
    let proxy = engine.proxy();
    assert_eq!(proxy.call("key_count", &[]).unwrap(), Value::Int(1));
    assert_eq!(proxy.call("get", &["a".into()]).unwrap(), Value::from("1"));
    engine.close().unwrap();
}

#[test]
fn test_replay_determinism_across_restart() {
    let dir = tempdir().unwrap();
    let settings = settings_in(&dir);

    let engine = Engine::<KvModel>::create(settings.clone()).unwrap();
    let proxy = engine.proxy();

    proxy.call("set", &["a".into(), "1".into()]).unwrap();
    proxy.call("set", &["b".into(), "2".into()]).unwrap();
    proxy.call("set", &["c".into(), "3".into()]).unwrap();
    proxy.call("remove", &["b".into()]).unwrap();
    proxy
        .call("expire", &["c".into(), Timestamp::from_nanos(1).into()])
        .unwrap();
    proxy.call("purge_expired", &[]).unwrap();
    proxy.call("rename", &["a".into(), "front".into()]).unwrap();

    let count_before = proxy.call("key_count", &[]).unwrap();
    let front_before = proxy.call("get", &["front".into()]).unwrap();
    engine.close().unwrap();
    drop(engine);

    let engine = Engine::<KvModel>::load(settings).unwrap();
    let proxy = engine.proxy();
    assert_eq!(proxy.call("key_count", &[]).unwrap(), count_before);
    assert_eq!(proxy.call("get", &["front".into()]).unwrap(), front_before);
    assert_eq!(proxy.call("get", &["b".into()]).unwrap(), Value::Null);
    assert_eq!(proxy.call("get", &["c".into()]).unwrap(), Value::Null);
    engine.close().unwrap();
}

#[test]
fn test_concurrent_commands_lose_no_updates() {
    const THREADS: usize = 8;
    const CALLS_PER_THREAD: usize = 50;

    let dir = tempdir().unwrap();
    let settings = settings_in(&dir);
    let engine = Engine::<OverloadModel>::create(settings.clone()).unwrap();

    let mut handles = Vec::new();
    for _ in 0..THREADS {
        let proxy = engine.proxy();
        handles.push(thread::spawn(move || {
            for _ in 0..CALLS_PER_THREAD {
                proxy.call("mark", &[]).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let proxy = engine.proxy();
    let total = (THREADS * CALLS_PER_THREAD) as i64;
    assert_eq!(proxy.call("calls", &[]).unwrap(), Value::Int(total));
    engine.close().unwrap();
    drop(engine);

    // The journal holds the same history the live model saw.
    let engine = Engine::<OverloadModel>::load(settings).unwrap();
    assert_eq!(engine.proxy().call("calls", &[]).unwrap(), Value::Int(total));
    engine.close().unwrap();
}

#[test]
fn test_notifications_fire_in_journal_order() {
    let dir = tempdir().unwrap();
    let engine = Engine::<KvModel>::create(settings_in(&dir)).unwrap();
    let proxy = engine.proxy();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let observer_seen = seen.clone();
    engine.subscribe(move |execution| {
        observer_seen
            .lock()
            .unwrap()
            .push((execution.operation.clone(), execution.seq, execution.kind));
    });

    proxy.call("set", &["a".into(), "1".into()]).unwrap();
    proxy.call("set", &["b".into(), "2".into()]).unwrap();
    proxy.call("key_count", &[]).unwrap();
    proxy.call("remove", &["a".into()]).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 4);
    assert_eq!(seen[0], ("set".to_string(), Some(0), OperationKind::Command));
    assert_eq!(seen[1], ("set".to_string(), Some(1), OperationKind::Command));
    assert_eq!(seen[2], ("key_count".to_string(), None, OperationKind::Query));
    assert_eq!(
        seen[3],
        ("remove".to_string(), Some(2), OperationKind::Command)
    );

    engine.close().unwrap();
}

#[test]
fn test_snapshots_bound_replay() {
    let dir = tempdir().unwrap();
    let settings = settings_in(&dir).with_snapshot_every(2);

    let engine = Engine::<KvModel>::create(settings.clone()).unwrap();
    let proxy = engine.proxy();
    for i in 0..5 {
        proxy
            .call("set", &[format!("k{}", i).into(), format!("v{}", i).into()])
            .unwrap();
    }
    engine.close().unwrap();
    drop(engine);

    let engine = Engine::<KvModel>::load(settings).unwrap();
    let proxy = engine.proxy();
    assert_eq!(proxy.call("key_count", &[]).unwrap(), Value::Int(5));
    for i in 0..5 {
        assert_eq!(
            proxy.call("get", &[format!("k{}", i).into()]).unwrap(),
            Value::from(format!("v{}", i))
        );
    }
    engine.close().unwrap();
}

#[test]
fn test_on_demand_snapshot_and_corrupt_fallback() {
    let dir = tempdir().unwrap();
    let settings = settings_in(&dir).with_snapshot_every(0);

    let engine = Engine::<KvModel>::create(settings.clone()).unwrap();

    // Nothing journaled yet: snapshot refused.
    assert!(matches!(
        engine.take_snapshot(),
        Err(EngineError::Persistence(StoreError::Snapshot(_)))
    ));

    let proxy = engine.proxy();
    proxy.call("set", &["a".into(), "1".into()]).unwrap();
    proxy.call("set", &["b".into(), "2".into()]).unwrap();
    let seq = engine.take_snapshot().unwrap();
    assert_eq!(seq, 1);
    proxy.call("set", &["c".into(), "3".into()]).unwrap();
    engine.close().unwrap();
    drop(engine);

    // Corrupt the snapshot; load falls back to journal-only replay and
    // reaches the same state.
    let snap_dir = settings.location.join("snapshots");
    let snap = std::fs::read_dir(&snap_dir).unwrap().next().unwrap().unwrap();
    let mut bytes = std::fs::read(snap.path()).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(snap.path(), &bytes).unwrap();

    let engine = Engine::<KvModel>::load(settings).unwrap();
    let proxy = engine.proxy();
    assert_eq!(proxy.call("key_count", &[]).unwrap(), Value::Int(3));
    assert_eq!(proxy.call("get", &["c".into()]).unwrap(), Value::from("3"));
    engine.close().unwrap();
}

#[test]
fn test_lifecycle_create_load_errors() {
    let dir = tempdir().unwrap();
    let settings = settings_in(&dir);

    // Load before create: nothing there.
    assert!(matches!(
        Engine::<KvModel>::load(settings.clone()),
        Err(EngineError::Persistence(StoreError::NotFound(_)))
    ));

    let engine = Engine::<KvModel>::create(settings.clone()).unwrap();
    engine.close().unwrap();
    drop(engine);

    // Create over an existing store: refused.
    assert!(matches!(
        Engine::<KvModel>::create(settings),
        Err(EngineError::Persistence(StoreError::AlreadyExists(_)))
    ));
}

#[test]
fn test_close_is_idempotent_and_final() {
    let dir = tempdir().unwrap();
    let engine = Engine::<KvModel>::create(settings_in(&dir)).unwrap();
    let proxy = engine.proxy();

    proxy.call("set", &["a".into(), "1".into()]).unwrap();
    engine.close().unwrap();
    engine.close().unwrap();

    assert!(matches!(
        proxy.call("set", &["b".into(), "2".into()]),
        Err(EngineError::Closed)
    ));
    assert!(matches!(
        proxy.call("key_count", &[]),
        Err(EngineError::Closed)
    ));
}

#[test]
fn test_invalid_eviction_operation_fails_fast() {
    let dir = tempdir().unwrap();

    // Unknown operation.
    let settings = settings_in(&dir).with_eviction("no_such_purge");
    assert!(matches!(
        Engine::<KvModel>::create(settings),
        Err(EngineError::InvalidEvictionOperation(_))
    ));

    // A query cannot be scheduled.
    let settings = settings_in(&dir).with_eviction("get_expired_keys");
    assert!(matches!(
        Engine::<KvModel>::create(settings),
        Err(EngineError::InvalidEvictionOperation(_))
    ));

    // Construction failed fast: no store was created on disk.
    assert!(!settings_in(&dir).location.exists());
}

// Scenario: a key expired "now" is reported, then purged away.
#[test]
fn test_expired_key_is_reported_then_purged() {
    let dir = tempdir().unwrap();
    let engine = Engine::<KvModel>::create(settings_in(&dir)).unwrap();
    let proxy = engine.proxy();

    proxy.call("set", &["key".into(), "value".into()]).unwrap();
    proxy
        .call("expire", &["key".into(), Timestamp::now().into()])
        .unwrap();

    assert_eq!(
        proxy.call("get_expired_keys", &[]).unwrap(),
        Value::List(vec!["key".into()])
    );

    proxy.call("purge_expired", &[]).unwrap();
    assert_eq!(proxy.call("key_count", &[]).unwrap(), Value::Int(0));

    engine.close().unwrap();
}

// Scenario: five expired keys, one persisted back, purge spares it.
#[test]
fn test_persist_rescues_key_from_purge() {
    let dir = tempdir().unwrap();
    let engine = Engine::<KvModel>::create(settings_in(&dir)).unwrap();
    let proxy = engine.proxy();

    let expires = Timestamp::now();
    for n in 1..=5 {
        let key = n.to_string();
        proxy
            .call("set", &[key.clone().into(), key.clone().into()])
            .unwrap();
        proxy.call("expire", &[key.into(), expires.into()]).unwrap();
    }

    thread::sleep(Duration::from_millis(10));
    let expired = proxy.call("get_expired_keys", &[]).unwrap();
    assert_eq!(expired.as_list().unwrap().len(), 5);

    proxy.call("persist", &["1".into()]).unwrap();
    let expired = proxy.call("get_expired_keys", &[]).unwrap();
    assert_eq!(expired.as_list().unwrap().len(), 4);
    assert!(!expired.as_list().unwrap().contains(&Value::from("1")));

    proxy.call("purge_expired", &[]).unwrap();
    assert_eq!(proxy.call("key_count", &[]).unwrap(), Value::Int(1));
    assert_eq!(proxy.call("get", &["1".into()]).unwrap(), Value::from("1"));

    engine.close().unwrap();
}

// Scenario: the scheduler purges on its own, and the purge survives reload.
#[test]
fn test_scheduler_purges_in_background_and_persists() {
    let dir = tempdir().unwrap();
    let settings = settings_in(&dir)
        .with_eviction_interval("purge_expired", Duration::from_millis(25));

    let engine = Engine::<KvModel>::create(settings.clone()).unwrap();
    assert!(engine.scheduler_running());

    let (purge_tx, purge_rx) = unbounded();
    engine.subscribe(move |execution| {
        if execution.operation == "purge_expired" {
            let _ = purge_tx.send(execution.seq);
        }
    });

    let proxy = engine.proxy();
    proxy.call("set", &["key".into(), "1".into()]).unwrap();
    proxy.call("set", &["key2".into(), "2".into()]).unwrap();
    proxy
        .call("expire", &["key".into(), Timestamp::now().into()])
        .unwrap();

    // A purge command must come through the ordinary pipeline, journaled.
    let seq = purge_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("no purge execution within 5s");
    assert!(seq.is_some());

    // Within a bounded wait, eviction takes effect.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if proxy.call("key_count", &[]).unwrap() == Value::Int(1) {
            break;
        }
        assert!(Instant::now() < deadline, "expired key never evicted");
        thread::sleep(Duration::from_millis(10));
    }

    engine.close().unwrap();
    assert!(!engine.scheduler_running());
    drop(engine);

    // The purge was journaled: reload sees the post-purge state.
    let engine = Engine::<KvModel>::load(settings).unwrap();
    let proxy = engine.proxy();
    assert_eq!(proxy.call("key_count", &[]).unwrap(), Value::Int(1));
    assert_eq!(proxy.call("get", &["key2".into()]).unwrap(), Value::from("2"));
    engine.close().unwrap();
}

// Scenario: overload dispatch end to end through the proxy.
#[test]
fn test_overload_dispatch_through_proxy() {
    let dir = tempdir().unwrap();
    let engine = Engine::<OverloadModel>::create(settings_in(&dir)).unwrap();
    let proxy = engine.proxy();

    // Zero arguments: the zero-arg overload.
    assert_eq!(proxy.call("mark", &[]).unwrap(), Value::Null);

    // One integer: the single-parameter overload, argument + 1.
    assert_eq!(proxy.call("mark", &[Value::Int(5)]).unwrap(), Value::Int(6));

    // Several integers: the catch-all, sum of arguments.
    assert_eq!(
        proxy
            .call("mark", &[Value::Int(1), Value::Int(2), Value::Int(3)])
            .unwrap(),
        Value::Int(6)
    );

    // Each dispatched call bumped the shared counter exactly once.
    assert_eq!(proxy.call("calls", &[]).unwrap(), Value::Int(3));

    // Defaulted trailing parameter.
    assert_eq!(
        proxy.call("increment", &[Value::Int(10)]).unwrap(),
        Value::Int(11)
    );
    assert_eq!(
        proxy
            .call("increment", &[Value::Int(10), Value::Int(20)])
            .unwrap(),
        Value::Int(30)
    );

    engine.close().unwrap();
}
