//! Configuration management

use anyhow::Result;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Shortest period any ticker or retry loop is allowed to use
pub const MIN_TICK: Duration = Duration::from_millis(10);

/// Raise a zero or sub-millisecond period to [`MIN_TICK`]
pub fn non_zero_tick(period: Duration) -> Duration {
    period.max(MIN_TICK)
}

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding every shared file (schedule, logs, corpora, models)
    pub data_dir: PathBuf,

    /// Directory holding task payloads
    pub task_dir: PathBuf,

    /// Optional interpreter used to launch a payload (e.g. `python3`)
    pub task_program: Option<String>,

    /// Floor applied to every interval, in seconds
    pub min_interval: f64,

    /// Control loop cadence
    pub cycle_interval: Duration,

    /// Runner watcher tick
    pub watch_tick: Duration,

    /// Timer retry period when not due or interval unknown
    pub idle_retry: Duration,

    /// Number of recent runs used for the average interval
    pub history_window: usize,

    /// Sliding window for manual-run counting, in seconds
    pub manual_window_secs: f64,

    /// Cycles between retrains
    pub retrain_every: u64,

    /// Minimum corpus rows before a retrain is attempted
    pub min_training_rows: usize,

    /// Preference step applied by increase/decrease commands
    pub preference_step: i64,

    /// Policy tuning
    pub policy: PolicyConfig,

    /// Reward shaping
    pub reward: RewardConfig,

    /// Dashboard refresh period
    pub dashboard_refresh: Duration,

    /// Emit JSON logs in daemon modes
    pub log_json: bool,
}

/// Epsilon-greedy and fitted-Q parameters
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Exploration probability (0.0-1.0)
    pub epsilon: f64,
    /// Learning rate blending old and bootstrapped action values
    pub alpha: f64,
    /// Discount applied to the next state's best action value
    pub gamma: f64,
    /// Multiplier for the `decrease` action (< 1)
    pub decrease_factor: f64,
    /// Multiplier for the `increase` action (> 1)
    pub increase_factor: f64,
    /// Floor applied after the action transform
    pub min_interval: f64,
    /// Minimum experience rows before a retrain
    pub min_experience_rows: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.2,
            alpha: 0.1,
            gamma: 0.9,
            decrease_factor: 0.85,
            increase_factor: 1.15,
            min_interval: 3.0,
            min_experience_rows: 10,
        }
    }
}

/// Reward shaping constants
#[derive(Debug, Clone)]
pub struct RewardConfig {
    /// Added when manual runs happened inside the window
    pub manual: f64,
    /// Added when the task carries a non-zero preference
    pub preference: f64,
    /// Added when the new interval collapsed to the floor
    pub floor: f64,
    /// Used when no other signal fires
    pub baseline: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            manual: 1.0,
            preference: 0.5,
            floor: -1.0,
            baseline: 0.1,
        }
    }
}

/// Runner timing
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub watch_tick: Duration,
    pub idle_retry: Duration,
    /// Floor applied to intervals read from disk
    pub min_interval: f64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            watch_tick: Duration::from_secs(2),
            idle_retry: Duration::from_millis(500),
            min_interval: 3.0,
        }
    }
}

/// Control loop tuning
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub min_interval: f64,
    pub cycle_interval: Duration,
    pub history_window: usize,
    pub manual_window_secs: f64,
    pub retrain_every: u64,
    pub min_training_rows: usize,
    pub reward: RewardConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            min_interval: 3.0,
            cycle_interval: Duration::from_secs(15),
            history_window: 6,
            manual_window_secs: 180.0,
            retrain_every: 20,
            min_training_rows: 10,
            reward: RewardConfig::default(),
        }
    }
}

/// Locations of the shared files inside the data directory
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub schedule: PathBuf,
    pub run_log: PathBuf,
    pub feedback_log: PathBuf,
    pub preferences: PathBuf,
    pub training_data: PathBuf,
    pub experience: PathBuf,
    pub interval_model: PathBuf,
    pub policy_model: PathBuf,
}

impl DataPaths {
    pub fn new(data_dir: &std::path::Path) -> Self {
        Self {
            schedule: data_dir.join("schedule.json"),
            run_log: data_dir.join("log.txt"),
            feedback_log: data_dir.join("user_feedback.log"),
            preferences: data_dir.join("user_pref.json"),
            training_data: data_dir.join("training_data.csv"),
            experience: data_dir.join("q_experience.csv"),
            interval_model: data_dir.join("interval_model.json"),
            policy_model: data_dir.join("q_model.json"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let data_dir = std::env::var("CADENCE_DATA_DIR")
            .map(|p| PathBuf::from(shellexpand::tilde(&p).into_owned()))
            .unwrap_or_else(|_| {
                dirs::data_local_dir()
                    .map(|d| d.join("cadence"))
                    .unwrap_or_else(|| PathBuf::from("./data"))
            });

        let task_dir = std::env::var("CADENCE_TASK_DIR")
            .map(|p| PathBuf::from(shellexpand::tilde(&p).into_owned()))
            .unwrap_or_else(|_| data_dir.join("tasks"));

        let task_program = std::env::var("CADENCE_TASK_PROGRAM")
            .ok()
            .filter(|p| !p.trim().is_empty());

        let min_interval: f64 = env_or("CADENCE_MIN_INTERVAL", 3.0);
        if !(min_interval > 0.0) {
            anyhow::bail!("CADENCE_MIN_INTERVAL must be positive, got {}", min_interval);
        }

        let epsilon: f64 = env_or("CADENCE_EPSILON", 0.2);
        if !(0.0..=1.0).contains(&epsilon) {
            anyhow::bail!("CADENCE_EPSILON must be within 0.0-1.0, got {}", epsilon);
        }

        let min_training_rows = env_or("CADENCE_MIN_TRAINING_ROWS", 10);

        let policy = PolicyConfig {
            epsilon,
            alpha: env_or("CADENCE_ALPHA", 0.1),
            gamma: env_or("CADENCE_GAMMA", 0.9),
            decrease_factor: env_or("CADENCE_DECREASE_FACTOR", 0.85),
            increase_factor: env_or("CADENCE_INCREASE_FACTOR", 1.15),
            min_interval,
            min_experience_rows: min_training_rows,
        };

        let reward = RewardConfig {
            manual: env_or("CADENCE_REWARD_MANUAL", 1.0),
            preference: env_or("CADENCE_REWARD_PREFERENCE", 0.5),
            floor: env_or("CADENCE_REWARD_FLOOR", -1.0),
            baseline: env_or("CADENCE_REWARD_BASELINE", 0.1),
        };

        Ok(Self {
            data_dir,
            task_dir,
            task_program,
            min_interval,
            cycle_interval: non_zero_tick(Duration::from_secs(env_or("CADENCE_CYCLE_SECS", 15))),
            watch_tick: non_zero_tick(Duration::from_millis(env_or("CADENCE_WATCH_TICK_MS", 2000))),
            idle_retry: non_zero_tick(Duration::from_millis(env_or("CADENCE_IDLE_RETRY_MS", 500))),
            history_window: env_or::<usize>("CADENCE_HISTORY_WINDOW", 6).max(2),
            manual_window_secs: env_or("CADENCE_MANUAL_WINDOW_SECS", 180.0),
            retrain_every: env_or::<u64>("CADENCE_RETRAIN_EVERY", 20).max(1),
            min_training_rows,
            preference_step: env_or("CADENCE_PREFERENCE_STEP", 2),
            policy,
            reward,
            dashboard_refresh: non_zero_tick(Duration::from_secs(env_or(
                "CADENCE_DASHBOARD_REFRESH_SECS",
                3,
            ))),
            log_json: std::env::var("CADENCE_LOG_JSON")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        })
    }

    pub fn paths(&self) -> DataPaths {
        DataPaths::new(&self.data_dir)
    }

    pub fn runner(&self) -> RunnerConfig {
        RunnerConfig {
            watch_tick: self.watch_tick,
            idle_retry: self.idle_retry,
            min_interval: self.min_interval,
        }
    }

    pub fn agent(&self) -> AgentConfig {
        AgentConfig {
            min_interval: self.min_interval,
            cycle_interval: self.cycle_interval,
            history_window: self.history_window,
            manual_window_secs: self.manual_window_secs,
            retrain_every: self.retrain_every,
            min_training_rows: self.min_training_rows,
            reward: self.reward.clone(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_paths_layout() {
        let paths = DataPaths::new(std::path::Path::new("/tmp/cadence"));
        assert_eq!(paths.schedule, PathBuf::from("/tmp/cadence/schedule.json"));
        assert_eq!(paths.run_log, PathBuf::from("/tmp/cadence/log.txt"));
        assert_eq!(paths.experience, PathBuf::from("/tmp/cadence/q_experience.csv"));
    }

    #[test]
    fn test_defaults_match_across_subconfigs() {
        let agent = AgentConfig::default();
        let policy = PolicyConfig::default();
        assert_eq!(agent.min_interval, policy.min_interval);
        assert!(policy.decrease_factor < 1.0 && policy.increase_factor > 1.0);
        assert_eq!(agent.history_window, 6);
    }

    #[test]
    fn test_non_zero_tick() {
        assert_eq!(non_zero_tick(Duration::ZERO), MIN_TICK);
        assert_eq!(non_zero_tick(Duration::from_micros(5)), MIN_TICK);
        assert_eq!(non_zero_tick(Duration::from_secs(2)), Duration::from_secs(2));
    }

    #[test]
    fn test_zero_periods_from_env_are_raised() {
        std::env::set_var("CADENCE_WATCH_TICK_MS", "0");
        std::env::set_var("CADENCE_IDLE_RETRY_MS", "0");
        std::env::set_var("CADENCE_DASHBOARD_REFRESH_SECS", "0");
        let config = Config::from_env().unwrap();
        std::env::remove_var("CADENCE_WATCH_TICK_MS");
        std::env::remove_var("CADENCE_IDLE_RETRY_MS");
        std::env::remove_var("CADENCE_DASHBOARD_REFRESH_SECS");

        assert_eq!(config.watch_tick, MIN_TICK);
        assert_eq!(config.idle_retry, MIN_TICK);
        assert_eq!(config.dashboard_refresh, MIN_TICK);
        assert_eq!(config.runner().watch_tick, MIN_TICK);
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        assert_eq!(env_or::<u64>("CADENCE_TEST_UNSET_KEY_XYZ", 7), 7);
    }
}
