//! Feature Aggregation
//!
//! Summarises a task's scheduling context as a feature triple:
//! - recent average interval between runs (last K runs)
//! - accumulated user preference
//! - manual runs inside a sliding window
//!
//! The aggregator reads the history once per control cycle and answers
//! per-task queries from memory.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::history::{FeedbackAction, FeedbackEvent, HistoryLog};
use crate::store::PreferenceStore;

/// Feature triple describing one task at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureTriple {
    pub avg_interval: f64,
    pub preference: f64,
    pub manual_count: f64,
}

impl FeatureTriple {
    pub fn new(avg_interval: f64, preference: f64, manual_count: f64) -> Self {
        Self {
            avg_interval,
            preference,
            manual_count,
        }
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.avg_interval, self.preference, self.manual_count]
    }
}

/// Mean gap between the most recent `k` timestamps
///
/// Returns `None` with fewer than two samples.
pub fn avg_interval(timestamps: &[f64], k: usize) -> Option<f64> {
    let mut recent = timestamps.to_vec();
    recent.sort_by(|a, b| a.total_cmp(b));
    let recent = &recent[recent.len().saturating_sub(k)..];

    if recent.len() < 2 {
        return None;
    }

    let total: f64 = recent.windows(2).map(|w| w[1] - w[0]).sum();
    Some(total / (recent.len() - 1) as f64)
}

/// Manual runs of `task` with `now - ts < window_secs`
pub fn manual_count(events: &[FeedbackEvent], task: &str, window_secs: f64, now: f64) -> usize {
    events
        .iter()
        .filter(|e| e.action == FeedbackAction::ManualRun && e.task == task)
        .filter(|e| now - e.timestamp < window_secs)
        .count()
}

/// In-memory view of history used for one cycle
#[derive(Debug, Clone, Default)]
pub struct FeatureAggregator {
    runs: HashMap<String, Vec<f64>>,
    preferences: BTreeMap<String, i64>,
    feedback: Vec<FeedbackEvent>,
    history_window: usize,
    manual_window_secs: f64,
    now: f64,
}

impl FeatureAggregator {
    pub fn new(
        runs: HashMap<String, Vec<f64>>,
        preferences: BTreeMap<String, i64>,
        feedback: Vec<FeedbackEvent>,
        history_window: usize,
        manual_window_secs: f64,
        now: f64,
    ) -> Self {
        Self {
            runs,
            preferences,
            feedback,
            history_window,
            manual_window_secs,
            now,
        }
    }

    /// Read run history, feedback and preferences as of `now`
    pub fn load(
        history: &HistoryLog,
        preferences: &PreferenceStore,
        history_window: usize,
        manual_window_secs: f64,
        now: f64,
    ) -> std::io::Result<Self> {
        Ok(Self::new(
            history.runs_by_task()?,
            preferences.load_or_default(),
            history.read_feedback()?,
            history_window,
            manual_window_secs,
            now,
        ))
    }

    pub fn avg_interval(&self, task: &str) -> Option<f64> {
        self.runs
            .get(task)
            .and_then(|ts| avg_interval(ts, self.history_window))
    }

    pub fn preference(&self, task: &str) -> i64 {
        self.preferences.get(task).copied().unwrap_or(0)
    }

    pub fn manual_count(&self, task: &str) -> usize {
        manual_count(&self.feedback, task, self.manual_window_secs, self.now)
    }

    /// Feature triple for `task`, using `fallback_interval` when there is not
    /// enough run history to measure a cadence
    pub fn features(&self, task: &str, fallback_interval: f64) -> FeatureTriple {
        FeatureTriple {
            avg_interval: self.avg_interval(task).unwrap_or(fallback_interval),
            preference: self.preference(task) as f64,
            manual_count: self.manual_count(task) as f64,
        }
    }
}
