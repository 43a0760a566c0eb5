//! Background loops a running worker keeps alive.
//!
//! Neither loop talks to a remote scheduler: the heartbeat only refreshes the
//! worker's own `last_heartbeat`, and the poll loop only reports spare
//! capacity. Delivering jobs and reporting liveness over a network is the job
//! of whatever distribution layer embeds the worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::worker::supervisor::Worker;

fn ticker(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Refresh the worker's heartbeat every `heartbeat_interval` until `shutdown`
/// fires or the worker stops.
pub async fn run_heartbeat(worker: Arc<Worker>, shutdown: CancellationToken) {
    let mut interval = ticker(worker.config().heartbeat_interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                if !worker.is_running() {
                    break;
                }
                worker.update_heartbeat();
                tracing::debug!(worker_id = %worker.id(), "Heartbeat");
            }
        }
    }
}

/// Report spare capacity every `job_poll_interval` until `shutdown` fires or
/// the worker stops. Ticks are skipped while the worker cannot accept work.
pub async fn run_job_poll(worker: Arc<Worker>, shutdown: CancellationToken) {
    let mut interval = ticker(worker.config().job_poll_interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                if !worker.is_running() {
                    break;
                }
                if !worker.can_accept_job() {
                    continue;
                }
                tracing::debug!(
                    worker_id = %worker.id(),
                    load = worker.current_load(),
                    capacity = worker.capacity(),
                    "Polling for jobs"
                );
            }
        }
    }
}

/// Spawn both loops for `worker`.
pub fn spawn_background_loops(
    worker: &Arc<Worker>,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(run_heartbeat(worker.clone(), shutdown.clone())),
        tokio::spawn(run_job_poll(worker.clone(), shutdown.clone())),
    ]
}
