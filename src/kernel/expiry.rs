//! Per-key expiration state, embeddable in any model.
//!
//! The map is plain state: it rides inside the owning model, serializes into
//! its snapshots, and is mutated only through the model's own commands. Lazy
//! detection (`expired_keys`) and eviction (`drain_expired`) both take the
//! observation instant as an argument so command logic can pass the journaled
//! admission timestamp and stay deterministic under replay.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::kernel::traits::Timestamp;

/// Per-key expire-at deadlines.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpirationMap {
    deadlines: HashMap<String, Timestamp>,
}

impl ExpirationMap {
    pub fn new() -> Self {
        ExpirationMap {
            deadlines: HashMap::new(),
        }
    }

    /// Set a key's deadline. Overwrites any previous deadline.
    pub fn set(&mut self, key: &str, at: Timestamp) {
        self.deadlines.insert(key.to_string(), at);
    }

    /// Clear a key's deadline. Returns whether one was set.
    pub fn clear(&mut self, key: &str) -> bool {
        self.deadlines.remove(key).is_some()
    }

    /// The key's deadline, if any.
    pub fn deadline(&self, key: &str) -> Option<Timestamp> {
        self.deadlines.get(key).copied()
    }

    /// Keys whose deadline is at or before `now`. Read-only.
    pub fn expired_keys(&self, now: Timestamp) -> Vec<String> {
        self.deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Remove and return every key whose deadline is at or before `now`.
    ///
    /// Calling it again with the same `now` removes nothing: eviction is
    /// idempotent.
    pub fn drain_expired(&mut self, now: Timestamp) -> Vec<String> {
        let expired = self.expired_keys(now);
        for key in &expired {
            self.deadlines.remove(key);
        }
        expired
    }

    /// Number of keys with a deadline.
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_deadline() {
        let mut map = ExpirationMap::new();
        assert_eq!(map.deadline("k"), None);

        map.set("k", Timestamp::from_nanos(100));
        assert_eq!(map.deadline("k"), Some(Timestamp::from_nanos(100)));

        // Idempotent overwrite.
        map.set("k", Timestamp::from_nanos(200));
        assert_eq!(map.deadline("k"), Some(Timestamp::from_nanos(200)));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut map = ExpirationMap::new();
        map.set("k", Timestamp::from_nanos(100));

        assert!(map.clear("k"));
        assert_eq!(map.deadline("k"), None);
        assert!(!map.clear("k"));
    }

    #[test]
    fn test_expired_keys_is_pure() {
        let mut map = ExpirationMap::new();
        map.set("old", Timestamp::from_nanos(10));
        map.set("new", Timestamp::from_nanos(1_000));

        let now = Timestamp::from_nanos(100);
        for _ in 0..3 {
            let expired = map.expired_keys(now);
            assert_eq!(expired, vec!["old".to_string()]);
        }
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_deadline_boundary_is_inclusive() {
        let mut map = ExpirationMap::new();
        map.set("k", Timestamp::from_nanos(100));

        assert!(map.expired_keys(Timestamp::from_nanos(99)).is_empty());
        assert_eq!(map.expired_keys(Timestamp::from_nanos(100)).len(), 1);
    }

    #[test]
    fn test_drain_is_idempotent() {
        let mut map = ExpirationMap::new();
        map.set("a", Timestamp::from_nanos(10));
        map.set("b", Timestamp::from_nanos(20));
        map.set("later", Timestamp::from_nanos(1_000));

        let now = Timestamp::from_nanos(50);
        let mut first = map.drain_expired(now);
        first.sort();
        assert_eq!(first, vec!["a".to_string(), "b".to_string()]);

        assert!(map.drain_expired(now).is_empty());
        assert_eq!(map.deadline("later"), Some(Timestamp::from_nanos(1_000)));
    }
}
