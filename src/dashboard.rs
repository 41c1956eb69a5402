//! Terminal Dashboard
//!
//! Read-only view of the schedule joined with the run log.

use chrono::{Local, TimeZone};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use crate::config::non_zero_tick;
use crate::history::{unix_now, HistoryLog};
use crate::store::ScheduleStore;

const RULE_WIDTH: usize = 65;

/// Local `HH:MM:SS` for a unix timestamp
pub fn format_time(ts: f64) -> String {
    let millis = (ts * 1000.0).round() as i64;
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

/// One status table
pub fn render(schedule: &BTreeMap<String, f64>, last_runs: &HashMap<String, f64>, now: f64) -> String {
    let mut out = String::new();
    out.push_str("───────────── SCHEDULER STATUS ─────────────\n");
    out.push_str(&format!(
        "{:<15}{:<20}{:<20}{:<15}\n",
        "Task", "Last Run", "Next Run", "Interval (s)"
    ));
    out.push_str(&"-".repeat(RULE_WIDTH));
    out.push('\n');

    for (task, interval) in schedule {
        let (last, next) = match last_runs.get(task) {
            Some(&ts) => (format_time(ts), format_time(ts + interval)),
            None => ("Never".to_string(), "Unknown".to_string()),
        };
        out.push_str(&format!(
            "{:<15}{:<20}{:<20}{:<15}\n",
            task, last, next, *interval as i64
        ));
    }

    out.push_str(&"-".repeat(RULE_WIDTH));
    out.push('\n');
    out.push_str(&format!("Updated at {}\n", format_time(now)));
    out
}

fn draw(table: &str) {
    let mut stdout = std::io::stdout().lock();
    if let Err(e) = write!(stdout, "\x1B[2J\x1B[H{}", table).and_then(|_| stdout.flush()) {
        debug!("Dashboard redraw failed: {}", e);
    }
}

/// Redraw until shutdown
pub async fn run(
    store: ScheduleStore,
    history: HistoryLog,
    refresh: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(non_zero_tick(refresh));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let schedule = store.load().map(|s| s.intervals).unwrap_or_default();
                let last_runs = history.last_runs().unwrap_or_else(|e| {
                    debug!("Run log unreadable: {}", e);
                    HashMap::new()
                });

                draw(&render(&schedule, &last_runs, unix_now()));
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
