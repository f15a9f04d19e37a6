use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::info;

use super::Orchestrator;

/// Background dispatch loop.
/// Runs the orchestrator once per `interval`, starting immediately. A run that
/// overruns the interval delays the next tick rather than stacking runs.
pub async fn run_dispatch_loop(orchestrator: Orchestrator, interval: Duration) {
    info!(interval_sec = interval.as_secs(), "Dispatch engine started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let summary = orchestrator.run_once().await;
        if summary.fetched > 0 {
            info!(executions = summary.fetched, "Dispatch tick complete");
        }
    }
}
