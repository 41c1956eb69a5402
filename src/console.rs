//! Interactive Console
//!
//! Line-oriented commands that record user feedback:
//! - `run <task>`: run now, log a manual run and a run event
//! - `increase <task>` / `decrease <task>`: log feedback and move the preference
//! - `exit`
//!
//! Only tasks present in the current schedule are accepted; anything else is
//! ignored without comment.

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::history::{unix_now, FeedbackAction, FeedbackEvent, HistoryLog, RunEvent};
use crate::runner::TaskExecutor;
use crate::store::{PreferenceStore, ScheduleStore};

/// Parsed console input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(String),
    Increase(String),
    Decrease(String),
    Exit,
}

impl Command {
    /// Parse one line; malformed input yields `None`
    pub fn parse(line: &str) -> Option<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["exit"] => Some(Self::Exit),
            ["run", task] => Some(Self::Run(task.to_string())),
            ["increase", task] => Some(Self::Increase(task.to_string())),
            ["decrease", task] => Some(Self::Decrease(task.to_string())),
            _ => None,
        }
    }

    fn task(&self) -> Option<&str> {
        match self {
            Self::Run(t) | Self::Increase(t) | Self::Decrease(t) => Some(t),
            Self::Exit => None,
        }
    }
}

/// Feedback writer behind the console
pub struct Console {
    store: ScheduleStore,
    history: HistoryLog,
    preferences: PreferenceStore,
    executor: Arc<dyn TaskExecutor>,
    preference_step: i64,
}

impl Console {
    pub fn new(
        store: ScheduleStore,
        history: HistoryLog,
        preferences: PreferenceStore,
        executor: Arc<dyn TaskExecutor>,
        preference_step: i64,
    ) -> Self {
        Self {
            store,
            history,
            preferences,
            executor,
            preference_step,
        }
    }

    fn is_known(&self, task: &str) -> bool {
        self.store
            .load()
            .map(|s| s.interval(task).is_some())
            .unwrap_or(false)
    }

    /// Apply one command; returns false on `exit`
    pub async fn handle(&self, command: Command) -> Result<bool> {
        if command == Command::Exit {
            return Ok(false);
        }
        let Some(task) = command.task() else {
            return Ok(true);
        };
        if !self.is_known(task) {
            debug!(task, "Ignoring command for unknown task");
            return Ok(true);
        }

        match &command {
            Command::Run(task) => {
                if let Err(e) = self.executor.execute(task).await {
                    warn!(task = %task, "Manual run failed: {}", e);
                }
                let now = unix_now();
                self.history.append_feedback(&FeedbackEvent {
                    timestamp: now,
                    task: task.clone(),
                    action: FeedbackAction::ManualRun,
                })?;
                self.history.append_run(&RunEvent {
                    timestamp: now,
                    task: task.clone(),
                })?;
            }
            Command::Increase(task) => self.record_preference(task, FeedbackAction::Increase, self.preference_step)?,
            Command::Decrease(task) => self.record_preference(task, FeedbackAction::Decrease, -self.preference_step)?,
            Command::Exit => {}
        }
        Ok(true)
    }

    fn record_preference(&self, task: &str, action: FeedbackAction, delta: i64) -> Result<()> {
        self.history.append_feedback(&FeedbackEvent {
            timestamp: unix_now(),
            task: task.to_string(),
            action,
        })?;
        self.preferences.adjust(task, delta)?;
        Ok(())
    }

    /// Read commands from stdin until `exit` or end of input
    pub async fn run(self) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(b"Commands: run <task>, increase <task>, decrease <task>, exit\n")
            .await?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            stdout.write_all(b">> ").await?;
            stdout.flush().await?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let Some(command) = Command::parse(&line) else {
                continue;
            };
            if !self.handle(command).await? {
                break;
            }
        }
        Ok(())
    }
}
