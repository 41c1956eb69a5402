//! Console feedback tests

use async_trait::async_trait;
use cadence::runner::ExecError;
use cadence::{
    Command, Console, FeedbackAction, HistoryLog, PreferenceStore, ScheduleSnapshot, ScheduleStore,
    TaskExecutor,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Default)]
struct CountingExecutor {
    ran: Mutex<Vec<String>>,
}

#[async_trait]
impl TaskExecutor for CountingExecutor {
    async fn execute(&self, task: &str) -> Result<(), ExecError> {
        self.ran.lock().push(task.to_string());
        Ok(())
    }
}

fn setup(temp: &TempDir) -> (Console, Arc<CountingExecutor>, HistoryLog, PreferenceStore) {
    let root = temp.path();
    let store = ScheduleStore::new(root.join("schedule.json"));
    let snapshot = ScheduleSnapshot::new([("backup".to_string(), 10.0)].into_iter().collect());
    store.save(&snapshot).unwrap();

    let history = HistoryLog::new(root.join("log.txt"), root.join("user_feedback.log"));
    let preferences = PreferenceStore::new(root.join("user_pref.json"));
    let executor = Arc::new(CountingExecutor::default());
    let console = Console::new(store, history.clone(), preferences.clone(), executor.clone(), 2);
    (console, executor, history, preferences)
}

#[tokio::test]
async fn test_manual_run_logs_feedback_and_run() {
    let temp = TempDir::new().unwrap();
    let (console, executor, history, _) = setup(&temp);

    assert!(console.handle(Command::Run("backup".to_string())).await.unwrap());

    assert_eq!(*executor.ran.lock(), vec!["backup".to_string()]);
    let feedback = history.read_feedback().unwrap();
    assert_eq!(feedback.len(), 1);
    assert_eq!(feedback[0].action, FeedbackAction::ManualRun);
    let runs = history.read_runs().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].timestamp, feedback[0].timestamp);
}

#[tokio::test]
async fn test_preference_commands_accumulate() {
    let temp = TempDir::new().unwrap();
    let (console, _, history, preferences) = setup(&temp);

    console.handle(Command::Increase("backup".to_string())).await.unwrap();
    console.handle(Command::Increase("backup".to_string())).await.unwrap();
    console.handle(Command::Decrease("backup".to_string())).await.unwrap();

    assert_eq!(preferences.load().unwrap().get("backup"), Some(&2));
    let actions: Vec<FeedbackAction> = history.read_feedback().unwrap().iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![FeedbackAction::Increase, FeedbackAction::Increase, FeedbackAction::Decrease]
    );
}

#[tokio::test]
async fn test_unknown_task_is_ignored() {
    let temp = TempDir::new().unwrap();
    let (console, executor, history, preferences) = setup(&temp);

    assert!(console.handle(Command::Run("nope".to_string())).await.unwrap());
    assert!(console.handle(Command::Increase("nope".to_string())).await.unwrap());

    assert!(executor.ran.lock().is_empty());
    assert!(history.read_feedback().unwrap().is_empty());
    assert!(preferences.load_or_default().is_empty());
}

#[tokio::test]
async fn test_exit_stops_console() {
    let temp = TempDir::new().unwrap();
    let (console, _, _, _) = setup(&temp);
    assert!(!console.handle(Command::Exit).await.unwrap());
}
