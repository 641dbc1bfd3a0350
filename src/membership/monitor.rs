use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::service::Coordinator;

/// Every `interval`, evicts nodes that sent no heartbeat since the previous
/// sweep.
pub fn spawn_failure_detector(
    coordinator: Arc<Coordinator>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; a sweep needs one full period.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let failed = coordinator.check_failed().await;
                    if failed.is_empty() {
                        continue;
                    }
                    tracing::warn!("No heartbeat from {:?}, removing", failed);
                    coordinator.remove_nodes(&failed).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Failure detector stopped");
    })
}
