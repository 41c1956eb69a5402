//! Lock-guarded interval mapping shared by the watcher and the task timers

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Task names that appeared or vanished in a replace
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ScheduleDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// In-memory schedule owned by one runner
///
/// The mapping is only reachable through [`interval`](Self::interval) and
/// [`replace`](Self::replace); the guard is never held across an await.
#[derive(Debug, Clone, Default)]
pub struct SharedSchedule {
    inner: Arc<Mutex<HashMap<String, f64>>>,
}

impl SharedSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current interval for `task`, in seconds
    pub fn interval(&self, task: &str) -> Option<f64> {
        self.inner.lock().get(task).copied()
    }

    pub fn contains(&self, task: &str) -> bool {
        self.inner.lock().contains_key(task)
    }

    /// Sorted task names
    pub fn tasks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Swap in a whole new mapping and report which names changed
    pub fn replace(&self, intervals: BTreeMap<String, f64>) -> ScheduleDiff {
        let mut guard = self.inner.lock();

        let mut diff = ScheduleDiff {
            added: intervals
                .keys()
                .filter(|k| !guard.contains_key(*k))
                .cloned()
                .collect(),
            removed: guard
                .keys()
                .filter(|k| !intervals.contains_key(*k))
                .cloned()
                .collect(),
        };
        diff.removed.sort();

        *guard = intervals.into_iter().collect();
        diff
    }
}
