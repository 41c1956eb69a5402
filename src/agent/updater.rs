//! Schedule Updater
//!
//! One control cycle:
//! 1. Load the schedule (abort the cycle if unavailable)
//! 2. Per task: features, baseline prediction, policy action, new interval
//! 3. Append a training sample per task
//! 4. Reward the choice and append an experience row per task
//! 5. Persist the whole schedule atomically
//! 6. Every N cycles, retrain the baseline predictor and the policy

use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{non_zero_tick, AgentConfig, Config};
use crate::corpus::{CsvLog, Experience, TrainingSample};
use crate::features::{FeatureAggregator, FeatureTriple};
use crate::history::{unix_now, HistoryLog};
use crate::model::{BaselineModel, ModelError, Predictor, QModel};
use crate::policy::{self, Action, PolicyAdjuster};
use crate::store::{PreferenceStore, ScheduleSnapshot, ScheduleStore, StoreError};

/// Reasons a cycle was abandoned
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Schedule unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("History unreadable: {0}")]
    History(#[from] std::io::Error),
}

/// Outcome for one task in one cycle
#[derive(Debug, Clone)]
pub struct TaskUpdate {
    pub task: String,
    pub features: FeatureTriple,
    pub baseline: f64,
    pub action: Action,
    pub interval: f64,
    pub reward: f64,
}

/// Outcome of a whole cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub updates: Vec<TaskUpdate>,
    pub retrain: Option<RetrainReport>,
}

/// Outcome of a retrain pass
#[derive(Debug, Clone, Default)]
pub struct RetrainReport {
    pub baseline_rows: Option<usize>,
    pub policy_rows: Option<usize>,
}

/// Control loop state
pub struct ScheduleUpdater {
    config: AgentConfig,
    store: ScheduleStore,
    history: HistoryLog,
    preferences: PreferenceStore,
    training: CsvLog,
    predictor: Box<dyn Predictor>,
    policy: PolicyAdjuster,
    cycles: u64,
}

impl ScheduleUpdater {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AgentConfig,
        store: ScheduleStore,
        history: HistoryLog,
        preferences: PreferenceStore,
        training: CsvLog,
        predictor: Box<dyn Predictor>,
        policy: PolicyAdjuster,
    ) -> Self {
        Self {
            config,
            store,
            history,
            preferences,
            training,
            predictor,
            policy,
            cycles: 0,
        }
    }

    /// Wire up the updater from the data directory
    ///
    /// A missing baseline model is fatal; the policy model is created on
    /// first run.
    pub fn from_config(config: &Config) -> Result<Self, ModelError> {
        let paths = config.paths();
        let predictor = BaselineModel::load(&paths.interval_model, config.min_training_rows)?;
        let q_model = QModel::load_or_init(&paths.policy_model)?;

        let policy = PolicyAdjuster::new(
            config.policy.clone(),
            Box::new(q_model),
            CsvLog::experience(&paths.experience),
        );

        Ok(Self::new(
            config.agent(),
            ScheduleStore::new(&paths.schedule),
            HistoryLog::new(&paths.run_log, &paths.feedback_log),
            PreferenceStore::new(&paths.preferences),
            CsvLog::training(&paths.training_data),
            Box::new(predictor),
            policy,
        ))
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Effective interval floor across the agent and policy settings
    fn min_interval(&self) -> f64 {
        self.config.min_interval.max(self.policy.config().min_interval)
    }

    fn floor(&self, interval: f64) -> f64 {
        let min = self.min_interval();
        if interval >= min {
            interval
        } else {
            min
        }
    }

    /// Run one control cycle as of `now` (unix seconds)
    pub fn run_cycle(&mut self, now: f64) -> Result<CycleReport, CycleError> {
        let snapshot = self.store.load()?;
        let aggregator = FeatureAggregator::load(
            &self.history,
            &self.preferences,
            self.config.history_window,
            self.config.manual_window_secs,
            now,
        )?;

        let mut intervals = BTreeMap::new();
        let mut updates = Vec::with_capacity(snapshot.len());

        for (task, &current) in &snapshot.intervals {
            let update = self.update_task(task, current, &aggregator);
            intervals.insert(task.clone(), update.interval);
            updates.push(update);
        }

        let next = ScheduleSnapshot::new(intervals);
        self.store.save(&next)?;

        self.cycles += 1;
        info!(cycle = self.cycles, tasks = next.len(), "Schedule updated: {:?}", next.intervals);

        let retrain = if self.cycles % self.config.retrain_every.max(1) == 0 {
            Some(self.retrain())
        } else {
            None
        };

        Ok(CycleReport {
            cycle: self.cycles,
            updates,
            retrain,
        })
    }

    fn update_task(&mut self, task: &str, current: f64, aggregator: &FeatureAggregator) -> TaskUpdate {
        let features = aggregator.features(task, current);

        let baseline = self.floor(self.predictor.predict(&features));
        let action = self.policy.select_action(&features);
        let interval = self.floor(self.policy.apply(baseline, action));

        debug!(
            task,
            baseline,
            action = action.as_str(),
            interval,
            "Interval chosen"
        );

        let sample = TrainingSample {
            task: task.to_string(),
            features,
            predicted_interval: interval,
        };
        if let Err(e) = self.training.append_sample(&sample) {
            warn!(task, "Failed to append training sample: {}", e);
        }

        let reward = policy::reward(&features, interval, self.min_interval(), &self.config.reward);
        let experience = Experience {
            state: features,
            action,
            reward,
            next_state: aggregator.features(task, interval),
        };
        if let Err(e) = self.policy.log_experience(&experience) {
            warn!(task, "Failed to append experience: {}", e);
        }

        TaskUpdate {
            task: task.to_string(),
            features,
            baseline,
            action,
            interval,
            reward,
        }
    }

    /// Retrain both learners; each one skips independently
    pub fn retrain(&mut self) -> RetrainReport {
        let mut report = RetrainReport::default();

        match self.training.read_samples() {
            Ok(samples) => match self.predictor.retrain(&samples) {
                Ok(()) => report.baseline_rows = Some(samples.len()),
                Err(ModelError::InsufficientData { have, need }) => {
                    info!(have, need, "Not enough data to retrain baseline model")
                }
                Err(e) => warn!("Baseline retrain failed, keeping prior model: {}", e),
            },
            Err(e) => warn!("Failed to read training corpus: {}", e),
        }

        match self.policy.train_from_log() {
            Ok(rows) => report.policy_rows = Some(rows),
            Err(ModelError::InsufficientData { have, need }) => {
                info!(have, need, "Not enough experience to retrain policy")
            }
            Err(e) => warn!("Policy retrain failed, keeping prior model: {}", e),
        }

        report
    }

    /// Run cycles on the configured cadence until shutdown
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let period = non_zero_tick(self.config.cycle_interval);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(every_secs = period.as_secs_f64(), "Schedule updater started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle(unix_now()) {
                        error!("Cycle skipped: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(cycles = self.cycles, "Schedule updater stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::corpus::CsvLog;
    use crate::model::{LinearModel, ModelResult};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    /// Predicts a fixed value regardless of features
    struct ConstPredictor(f64);

    impl Predictor for ConstPredictor {
        fn predict(&self, _features: &FeatureTriple) -> f64 {
            self.0
        }

        fn retrain(&mut self, _samples: &[crate::corpus::TrainingSample]) -> ModelResult<()> {
            Ok(())
        }
    }

    fn updater(dir: &TempDir, predictor: Box<dyn Predictor>, epsilon: f64) -> ScheduleUpdater {
        let root = dir.path();
        let policy = PolicyAdjuster::with_rng(
            PolicyConfig {
                epsilon,
                ..PolicyConfig::default()
            },
            Box::new(QModel::with_model(root.join("q_model.json"), LinearModel::zeros(3))),
            CsvLog::experience(root.join("q_experience.csv")),
            StdRng::seed_from_u64(3),
        );
        ScheduleUpdater::new(
            AgentConfig {
                retrain_every: 2,
                ..AgentConfig::default()
            },
            ScheduleStore::new(root.join("schedule.json")),
            HistoryLog::new(root.join("log.txt"), root.join("user_feedback.log")),
            PreferenceStore::new(root.join("user_pref.json")),
            CsvLog::training(root.join("training_data.csv")),
            predictor,
            policy,
        )
    }

    fn write_schedule(dir: &TempDir, pairs: &[(&str, f64)]) {
        let snapshot = ScheduleSnapshot::new(pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect());
        ScheduleStore::new(dir.path().join("schedule.json")).save(&snapshot).unwrap();
    }

    #[test]
    fn test_missing_schedule_aborts_cycle() {
        let dir = TempDir::new().unwrap();
        let mut agent = updater(&dir, Box::new(ConstPredictor(10.0)), 0.0);

        assert!(matches!(agent.run_cycle(1000.0), Err(CycleError::Store(StoreError::NotFound(_)))));
        assert_eq!(agent.cycles(), 0);
        assert!(!dir.path().join("training_data.csv").exists());
    }

    #[test]
    fn test_intervals_never_drop_below_floor() {
        let dir = TempDir::new().unwrap();
        write_schedule(&dir, &[("a", 10.0), ("b", 4.0), ("c", 60.0)]);

        for predicted in [-50.0, 0.0, 1.0, f64::NAN] {
            let mut agent = updater(&dir, Box::new(ConstPredictor(predicted)), 1.0);
            let report = agent.run_cycle(1000.0).unwrap();
            assert!(report.updates.iter().all(|u| u.interval >= 3.0));

            let saved = ScheduleStore::new(dir.path().join("schedule.json")).load().unwrap();
            assert!(saved.intervals.values().all(|&v| v >= 3.0));
        }
    }

    #[test]
    fn test_floor_collapse_is_penalised() {
        let dir = TempDir::new().unwrap();
        write_schedule(&dir, &[("a", 10.0)]);
        let mut agent = updater(&dir, Box::new(ConstPredictor(1.0)), 0.0);

        let report = agent.run_cycle(1000.0).unwrap();
        assert_eq!(report.updates[0].interval, 3.0);
        assert_eq!(report.updates[0].reward, AgentConfig::default().reward.floor);
    }

    #[test]
    fn test_floor_collapse_uses_stricter_policy_floor() {
        let dir = TempDir::new().unwrap();
        write_schedule(&dir, &[("a", 10.0)]);
        let root = dir.path();
        let policy = PolicyAdjuster::with_rng(
            PolicyConfig {
                epsilon: 0.0,
                min_interval: 5.0,
                ..PolicyConfig::default()
            },
            Box::new(QModel::with_model(root.join("q_model.json"), LinearModel::zeros(3))),
            CsvLog::experience(root.join("q_experience.csv")),
            StdRng::seed_from_u64(3),
        );
        let mut agent = ScheduleUpdater::new(
            AgentConfig::default(),
            ScheduleStore::new(root.join("schedule.json")),
            HistoryLog::new(root.join("log.txt"), root.join("user_feedback.log")),
            PreferenceStore::new(root.join("user_pref.json")),
            CsvLog::training(root.join("training_data.csv")),
            Box::new(ConstPredictor(1.0)),
            policy,
        );

        let report = agent.run_cycle(1000.0).unwrap();
        assert_eq!(report.updates[0].interval, 5.0);
        assert_eq!(report.updates[0].reward, AgentConfig::default().reward.floor);
    }

    #[test]
    fn test_undecodable_history_line_does_not_block_cycle() {
        let dir = TempDir::new().unwrap();
        write_schedule(&dir, &[("a", 30.0)]);
        std::fs::write(dir.path().join("log.txt"), b"100,a\n105,caf\xE9\n110,a\n").unwrap();
        let mut agent = updater(&dir, Box::new(ConstPredictor(10.0)), 0.0);

        let report = agent.run_cycle(200.0).unwrap();
        assert_eq!(report.updates[0].features.avg_interval, 10.0);
    }

    #[test]
    fn test_retrain_runs_on_cadence() {
        let dir = TempDir::new().unwrap();
        write_schedule(&dir, &[("a", 10.0)]);
        let mut agent = updater(&dir, Box::new(ConstPredictor(10.0)), 0.0);

        assert!(agent.run_cycle(1000.0).unwrap().retrain.is_none());
        let second = agent.run_cycle(1015.0).unwrap();
        let retrain = second.retrain.expect("retrain on second cycle");
        // Two experience rows is below the default minimum
        assert!(retrain.policy_rows.is_none());
        assert_eq!(retrain.baseline_rows, Some(2));
    }
}
