//! Control Loop
//!
//! Closes the loop between observed behavior and the schedule:
//! Observe (history, feedback) → Predict (baseline) → Decide (policy) →
//! Act (write schedule) → Learn (experience, periodic retrain)

mod updater;

pub use updater::{CycleError, CycleReport, RetrainReport, ScheduleUpdater, TaskUpdate};
