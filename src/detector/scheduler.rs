//! Cancellable delayed tasks keyed by target identity.
//!
//! The scheduler is purely logical: deadlines are epoch milliseconds and the
//! owner decides when time passes by calling [`DelayedTasks::expire`]. The
//! detector runtime sleeps until [`DelayedTasks::next_deadline`].

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug)]
struct Pending<T> {
    deadline: i64,
    seq: u64,
    payload: T,
}

/// Delayed tasks, at most one per key.
#[derive(Debug)]
pub struct DelayedTasks<K, T> {
    tasks: HashMap<K, Pending<T>>,
    seq: u64,
}

impl<K, T> Default for DelayedTasks<K, T> {
    fn default() -> Self {
        Self {
            tasks: HashMap::new(),
            seq: 0,
        }
    }
}

impl<K: Eq + Hash + Clone, T> DelayedTasks<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `payload` for `key` at `deadline`, replacing any task already
    /// pending for that key. Returns `true` if a task was replaced.
    pub fn schedule(&mut self, key: K, deadline: i64, payload: T) -> bool {
        self.seq += 1;
        self.tasks
            .insert(
                key,
                Pending {
                    deadline,
                    seq: self.seq,
                    payload,
                },
            )
            .is_some()
    }

    /// Cancel the task pending for `key`.
    pub fn cancel(&mut self, key: &K) -> Option<T> {
        self.tasks.remove(key).map(|p| p.payload)
    }

    /// Cancel every pending task, returning how many were dropped.
    pub fn cancel_all(&mut self) -> usize {
        let n = self.tasks.len();
        self.tasks.clear();
        n
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<i64> {
        self.tasks.values().map(|p| p.deadline).min()
    }

    /// Remove and return every task whose deadline is `<= now`, ordered by
    /// deadline and then scheduling order.
    pub fn expire(&mut self, now: i64) -> Vec<(K, T)> {
        let due: Vec<K> = self
            .tasks
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(k, _)| k.clone())
            .collect();

        let mut fired: Vec<(K, Pending<T>)> = due
            .into_iter()
            .filter_map(|k| self.tasks.remove(&k).map(|p| (k, p)))
            .collect();
        fired.sort_by_key(|(_, p)| (p.deadline, p.seq));
        fired.into_iter().map(|(k, p)| (k, p.payload)).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expire_in_deadline_order() {
        let mut tasks = DelayedTasks::new();
        tasks.schedule("b", 200, 2);
        tasks.schedule("a", 100, 1);
        tasks.schedule("c", 300, 3);

        assert_eq!(tasks.next_deadline(), Some(100));
        let fired = tasks.expire(250);
        assert_eq!(fired, vec![("a", 1), ("b", 2)]);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks.next_deadline(), Some(300));
    }

    #[test]
    fn test_schedule_replaces_same_key() {
        let mut tasks = DelayedTasks::new();
        assert!(!tasks.schedule(7u64, 100, "first"));
        assert!(tasks.schedule(7u64, 500, "second"));
        assert_eq!(tasks.len(), 1);
        assert!(tasks.expire(100).is_empty());
        assert_eq!(tasks.expire(500), vec![(7, "second")]);
    }

    #[test]
    fn test_equal_deadlines_keep_schedule_order() {
        let mut tasks = DelayedTasks::new();
        tasks.schedule(3, 10, "x");
        tasks.schedule(1, 10, "y");
        tasks.schedule(2, 10, "z");
        let fired: Vec<_> = tasks.expire(10).into_iter().map(|(_, v)| v).collect();
        assert_eq!(fired, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_cancel_all() {
        let mut tasks = DelayedTasks::new();
        tasks.schedule(1, 10, ());
        tasks.schedule(2, 20, ());
        assert_eq!(tasks.cancel_all(), 2);
        assert!(tasks.is_empty());
        assert_eq!(tasks.next_deadline(), None);
    }

    #[test]
    fn test_cancel_single() {
        let mut tasks = DelayedTasks::new();
        tasks.schedule(1, 10, "a");
        assert_eq!(tasks.cancel(&1), Some("a"));
        assert_eq!(tasks.cancel(&1), None);
    }
}
