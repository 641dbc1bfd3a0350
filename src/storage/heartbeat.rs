use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::protocol::{KvMessage, StatusType};

/// Sends `HEARTBEAT host port` on the coordinator socket every `period`
/// until shutdown is signalled or the socket writer goes away.
pub fn spawn_heartbeat(
    tx: mpsc::UnboundedSender<KvMessage>,
    host: String,
    port: u16,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        let beat = KvMessage::with_value(StatusType::Heartbeat, host.as_str(), port.to_string());

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if tx.send(beat.clone()).is_err() {
                        tracing::warn!("Coordinator socket closed, heartbeats stopped");
                        break;
                    }
                    tracing::debug!("Heartbeat sent for {}:{}", host, port);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
