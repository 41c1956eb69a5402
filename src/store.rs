//! Schedule Store
//!
//! Durable mapping of task name to interval, shared between the control loop
//! and the runner through a single JSON file.
//!
//! - Writes go to a sibling temp file which is then renamed over the target,
//!   so a concurrently polling runner never sees a partial document
//! - The file's modification time is the snapshot version marker
//! - Preferences live in a second JSON mapping with the same write discipline

use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, warn};

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store file not found: {0}")]
    NotFound(PathBuf),
    #[error("Store file corrupt at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Immutable view of the schedule at one version
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleSnapshot {
    /// Task name to interval in seconds
    pub intervals: BTreeMap<String, f64>,
    /// Modification time of the file this snapshot was read from
    pub version: Option<SystemTime>,
}

impl ScheduleSnapshot {
    pub fn new(intervals: BTreeMap<String, f64>) -> Self {
        Self {
            intervals,
            version: None,
        }
    }

    pub fn interval(&self, task: &str) -> Option<f64> {
        self.intervals.get(task).copied()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.intervals.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Raise every interval to at least `min_interval`
    pub fn clamped(mut self, min_interval: f64) -> Self {
        for interval in self.intervals.values_mut() {
            if !(*interval >= min_interval) {
                *interval = min_interval;
            }
        }
        self
    }
}

/// File-backed schedule store
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    path: PathBuf,
}

impl ScheduleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current snapshot
    ///
    /// A missing or unreadable file is `NotFound`, an undecodable one is
    /// `Corrupt`. Callers decide their own fallback.
    pub fn load(&self) -> StoreResult<ScheduleSnapshot> {
        let version = self.version();
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(self.path.clone()));
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        let intervals: BTreeMap<String, f64> =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        if let Some((task, interval)) = intervals.iter().find(|(_, v)| !v.is_finite()) {
            return Err(StoreError::Corrupt {
                path: self.path.clone(),
                reason: format!("interval for {} is not finite: {}", task, interval),
            });
        }

        Ok(ScheduleSnapshot { intervals, version })
    }

    /// Atomically replace the schedule file with `snapshot`
    pub fn save(&self, snapshot: &ScheduleSnapshot) -> StoreResult<()> {
        write_json_atomic(&self.path, &snapshot.intervals)?;
        debug!(path = %self.path.display(), tasks = snapshot.len(), "Schedule saved");
        Ok(())
    }

    /// Modification time of the schedule file, if it exists
    pub fn version(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    /// Whether the file changed since `version` was observed
    pub fn changed_since(&self, version: Option<SystemTime>) -> bool {
        self.version() != version
    }
}

/// Per-task preference accumulator file
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
}

impl PreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load all scores; a missing file is an empty mapping
    pub fn load(&self) -> StoreResult<BTreeMap<String, i64>> {
        match read_json::<BTreeMap<String, i64>>(&self.path) {
            Err(StoreError::NotFound(_)) => Ok(BTreeMap::new()),
            other => other,
        }
    }

    /// Load scores, treating a corrupt file as empty
    pub fn load_or_default(&self) -> BTreeMap<String, i64> {
        self.load().unwrap_or_else(|e| {
            warn!("Ignoring unreadable preferences: {}", e);
            BTreeMap::new()
        })
    }

    /// Add `delta` to the task's score and persist; returns the new score
    pub fn adjust(&self, task: &str, delta: i64) -> StoreResult<i64> {
        let mut prefs = self.load_or_default();
        let score = prefs.entry(task.to_string()).or_insert(0);
        *score += delta;
        let updated = *score;
        write_json_atomic(&self.path, &prefs)?;
        debug!(task, score = updated, "Preference adjusted");
        Ok(updated)
    }
}

/// Read and decode a JSON file, mapping a missing file to `NotFound`
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<T> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }
        Err(e) => return Err(StoreError::Io(e)),
    };
    serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Serialize `value` next to `path` and rename it into place
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> StoreResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_vec_pretty(value)?;
    let tmp_path = path.with_extension("tmp");

    let mut file = std::fs::File::create(&tmp_path)?;
    file.write_all(&json)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn snapshot(pairs: &[(&str, f64)]) -> ScheduleSnapshot {
        ScheduleSnapshot::new(pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect())
    }

    #[test]
    fn test_save_then_load_same_mapping() {
        let dir = TempDir::new().unwrap();
        let store = ScheduleStore::new(dir.path().join("schedule.json"));

        let original = snapshot(&[("backup.py", 10.0), ("sync.py", 42.5)]);
        store.save(&original).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.intervals, original.intervals);
        assert!(loaded.version.is_some());
        assert!(!dir.path().join("schedule.tmp").exists());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = ScheduleStore::new(dir.path().join("schedule.json"));
        assert!(matches!(store.load(), Err(StoreError::NotFound(_))));
        assert!(store.version().is_none());
    }

    #[test]
    fn test_corrupt_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("schedule.json");
        std::fs::write(&path, "{\"a\": ").unwrap();
        let store = ScheduleStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_changed_since_tracks_mtime() {
        let dir = TempDir::new().unwrap();
        let store = ScheduleStore::new(dir.path().join("schedule.json"));
        assert!(!store.changed_since(None));

        store.save(&snapshot(&[("a", 5.0)])).unwrap();
        assert!(store.changed_since(None));

        let version = store.version();
        assert!(!store.changed_since(version));
    }

    #[test]
    fn test_clamped_raises_low_intervals() {
        let clamped = snapshot(&[("a", 1.0), ("b", 10.0)]).clamped(3.0);
        assert_eq!(clamped.interval("a"), Some(3.0));
        assert_eq!(clamped.interval("b"), Some(10.0));
    }

    #[test]
    fn test_preferences_accumulate() {
        let dir = TempDir::new().unwrap();
        let prefs = PreferenceStore::new(dir.path().join("user_pref.json"));

        assert!(prefs.load().unwrap().is_empty());
        assert_eq!(prefs.adjust("a", 2).unwrap(), 2);
        assert_eq!(prefs.adjust("a", 2).unwrap(), 4);
        assert_eq!(prefs.adjust("b", -2).unwrap(), -2);

        let loaded = prefs.load().unwrap();
        assert_eq!(loaded.get("a"), Some(&4));
        assert_eq!(loaded.get("b"), Some(&-2));
    }
}
