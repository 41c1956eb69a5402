//! Cadence - Entry Point
//!
//! Modes:
//! - Default: runner and control loop side by side
//! - --agent / -a: control loop only
//! - --runner / -r: task runner only
//! - --console / -c: interactive feedback console
//! - --dashboard / -d: terminal status view
//! - --bootstrap / -b: seed the baseline model

use cadence::{
    dashboard, BaselineModel, CommandExecutor, Config, Console, HistoryLog, PreferenceStore, Runner,
    ScheduleStore, ScheduleUpdater,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let has = |long: &str, short: &str| args.iter().any(|a| a == long || a == short);
    let agent_mode = has("--agent", "-a");
    let runner_mode = has("--runner", "-r");
    let console_mode = has("--console", "-c");
    let dashboard_mode = has("--dashboard", "-d");
    let bootstrap_mode = has("--bootstrap", "-b");

    if has("--help", "-h") {
        println!("Cadence v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: cadence [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --agent, -a       Run the schedule updater only");
        println!("  --runner, -r      Run the task runner only");
        println!("  --console, -c     Interactive console (run/increase/decrease/exit)");
        println!("  --dashboard, -d   Terminal status dashboard");
        println!("  --bootstrap, -b   Seed the baseline model from a synthetic corpus");
        println!("  --help, -h        Show this help");
        println!();
        println!("Default: run the runner and the schedule updater together");
        println!();
        println!("Environment variables:");
        println!("  CADENCE_DATA_DIR        Shared data directory");
        println!("  CADENCE_TASK_DIR        Task payload directory");
        println!("  CADENCE_TASK_PROGRAM    Interpreter for payloads (e.g. python3)");
        println!("  CADENCE_MIN_INTERVAL    Interval floor in seconds (default: 3)");
        println!("  CADENCE_CYCLE_SECS      Control loop cadence (default: 15)");
        println!("  CADENCE_EPSILON         Exploration rate (default: 0.2)");
        println!("  CADENCE_LOG_JSON        Emit JSON logs");
        println!("  RUST_LOG                Log level");
        return Ok(());
    }

    let config = Config::from_env()?;
    let interactive = console_mode || dashboard_mode;

    // Setup logging based on mode
    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(if interactive { Level::WARN } else { Level::INFO });

    if interactive {
        // Keep stdout for the console / dashboard
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else if config.log_json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let paths = config.paths();
    std::fs::create_dir_all(&config.data_dir)?;

    let store = ScheduleStore::new(&paths.schedule);
    let history = HistoryLog::new(&paths.run_log, &paths.feedback_log);
    let executor = Arc::new(CommandExecutor::new(&config.task_dir, config.task_program.clone()));

    if bootstrap_mode {
        let mut rng = rand::thread_rng();
        BaselineModel::bootstrap(
            &paths.interval_model,
            &mut rng,
            config.min_interval,
            config.min_training_rows,
        )?;
        info!("Baseline model written to {}", paths.interval_model.display());
        return Ok(());
    }

    if console_mode {
        let console = Console::new(
            store,
            history,
            PreferenceStore::new(&paths.preferences),
            executor,
            config.preference_step,
        );
        return console.run().await;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
        }
        let _ = shutdown_tx.send(true);
    });

    if dashboard_mode {
        dashboard::run(store, history, config.dashboard_refresh, shutdown_rx).await;
        return Ok(());
    }

    info!("Cadence v{} (data: {})", env!("CARGO_PKG_VERSION"), config.data_dir.display());

    let run_agent = agent_mode || !runner_mode;
    let run_runner = runner_mode || !agent_mode;

    // Model problems are fatal before anything starts
    let updater = if run_agent {
        match ScheduleUpdater::from_config(&config) {
            Ok(updater) => Some(updater),
            Err(e) => {
                error!("Cannot start schedule updater: {} (try --bootstrap)", e);
                return Err(e.into());
            }
        }
    } else {
        None
    };

    let agent_task = updater.map(|u| tokio::spawn(u.run(shutdown_rx.clone())));
    let runner_task = run_runner.then(|| {
        let runner = Runner::new(config.runner(), store, history, executor);
        tokio::spawn(runner.run(shutdown_rx.clone()))
    });

    if let Some(task) = agent_task {
        task.await?;
    }
    if let Some(task) = runner_task {
        task.await?;
    }

    Ok(())
}
