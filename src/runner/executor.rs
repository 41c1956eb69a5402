//! Task payload execution

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Payload failures; the scheduler treats them as completed runs
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Failed to launch {task}: {source}")]
    Spawn {
        task: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{task} exited with {status}")]
    Failed { task: String, status: String },
}

/// Runs one task to completion
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &str) -> Result<(), ExecError>;
}

/// Launches `<task_dir>/<task>`, optionally through an interpreter
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    task_dir: PathBuf,
    program: Option<String>,
}

impl CommandExecutor {
    pub fn new(task_dir: impl Into<PathBuf>, program: Option<String>) -> Self {
        Self {
            task_dir: task_dir.into(),
            program,
        }
    }

    fn command(&self, task: &str) -> tokio::process::Command {
        let script = self.task_dir.join(task);
        match &self.program {
            Some(program) => {
                let mut cmd = tokio::process::Command::new(program);
                cmd.arg(script);
                cmd
            }
            None => tokio::process::Command::new(script),
        }
    }
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    async fn execute(&self, task: &str) -> Result<(), ExecError> {
        let status = self
            .command(task)
            .current_dir(&self.task_dir)
            .stdin(std::process::Stdio::null())
            .status()
            .await
            .map_err(|source| ExecError::Spawn {
                task: task.to_string(),
                source,
            })?;

        debug!(task, %status, "Task exited");

        if status.success() {
            Ok(())
        } else {
            Err(ExecError::Failed {
                task: task.to_string(),
                status: status.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_executor_reports_exit_status() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("ok.sh"), "exit 0\n").unwrap();
        std::fs::write(dir.path().join("fail.sh"), "exit 3\n").unwrap();

        let executor = CommandExecutor::new(dir.path(), Some("sh".to_string()));
        assert!(executor.execute("ok.sh").await.is_ok());
        assert!(matches!(
            executor.execute("fail.sh").await,
            Err(ExecError::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_payload_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let executor = CommandExecutor::new(dir.path(), None);
        assert!(matches!(
            executor.execute("does-not-exist").await,
            Err(ExecError::Spawn { .. })
        ));
    }
}
