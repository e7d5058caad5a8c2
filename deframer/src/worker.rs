//! Periodic refresh loop run beside the HTTP server.

use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Duration;
use tracing::{error, info};

use crate::pipeline::Pipeline;

/// Run one refresh cycle and log its outcome. Errors never escape.
pub async fn run_cycle(pipeline: &Pipeline) {
    match pipeline.refresh_all().await {
        Ok(count) => info!("worker: refreshed {} feed(s)", count),
        Err(aborted) => error!(completed = aborted.completed, error = %aborted.source, "worker: refresh cycle aborted"),
    }
}

/// Background refresh loop. Runs a cycle every `interval` until `shutdown` is
/// signalled; a failed cycle is logged and retried on the next tick.
///
/// Stop it with `Notify::notify_one`: the stored permit is picked up even when the
/// signal arrives in the middle of a cycle.
pub async fn run_worker(pipeline: Arc<Pipeline>, interval: Duration, shutdown: Arc<Notify>) {
    info!("worker: refreshing every {:?}", interval);

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("worker: shutdown requested");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                run_cycle(&pipeline).await;
            }
        }
    }
}
