//! Cadence
//!
//! Self-tuning interval scheduler. A fixed set of named tasks runs on
//! intervals that are re-estimated every control cycle from run history,
//! explicit user preference and recent manual overrides.
//!
//! # Features
//!
//! - **Runner**: one timer per task, hot reload of the schedule file
//! - **Control loop**: features → baseline predictor → epsilon-greedy policy
//! - **Online learning**: fitted-Q iteration over logged experience
//! - **Feedback**: console for manual runs and preference nudges
//! - **Dashboard**: terminal view of last/next runs
//!
//! # Architecture
//!
//! ```text
//!  Console ──► user_feedback.log, user_pref.json ─┐
//!                                                 ▼
//!  Runner ◄── schedule.json ◄── ScheduleUpdater ◄── log.txt
//!    │            (atomic)          │
//!    └──► log.txt                   ├── Predictor (interval_model.json)
//!                                   ├── PolicyAdjuster (q_model.json)
//!                                   └── training_data.csv, q_experience.csv
//! ```
//!
//! The runner and the control loop share nothing in memory; they cooperate
//! only through the files in the data directory.

pub mod agent;
pub mod config;
pub mod console;
pub mod corpus;
pub mod dashboard;
pub mod features;
pub mod history;
pub mod model;
pub mod policy;
pub mod runner;
pub mod store;

pub use agent::{CycleError, CycleReport, ScheduleUpdater};
pub use config::{AgentConfig, Config, DataPaths, PolicyConfig, RewardConfig, RunnerConfig};
pub use console::{Command, Console};
pub use corpus::{CsvLog, Experience, TrainingSample};
pub use features::{FeatureAggregator, FeatureTriple};
pub use history::{FeedbackAction, FeedbackEvent, HistoryLog, ParseError, RunEvent};
pub use model::{BaselineModel, LinearModel, ModelError, Predictor, QModel, ValueFunction};
pub use policy::{Action, PolicyAdjuster};
pub use runner::{CommandExecutor, Runner, SharedSchedule, TaskExecutor};
pub use store::{PreferenceStore, ScheduleSnapshot, ScheduleStore, StoreError};
