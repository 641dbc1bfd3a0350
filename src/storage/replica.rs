use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::protocol::{KvMessage, NodeConnection, StatusType};

enum LinkCommand {
    Forward {
        slot: u8,
        key: String,
        value: String,
        ack: oneshot::Sender<bool>,
    },
    Disconnect,
}

/// Outbound connection to one successor holding a copy of our primary data.
///
/// A single task owns the socket and applies forwards in enqueue order.
/// The slot number travels with each forward, so re-tagging the link never
/// affects messages already queued.
pub struct ReplicaLink {
    target: String,
    slot: u8,
    tx: mpsc::UnboundedSender<LinkCommand>,
}

impl ReplicaLink {
    pub fn open(
        target: String,
        slot: u8,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_link(target.clone(), rx, connect_timeout, read_timeout));
        tracing::info!("Opened replica link {} -> slot {}", target, slot);
        Self { target, slot, tx }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn retag(&mut self, slot: u8) {
        if self.slot != slot {
            tracing::info!(
                "Replica link to {} moves from slot {} to slot {}",
                self.target,
                self.slot,
                slot
            );
            self.slot = slot;
        }
    }

    /// Queues `PUT_FROM_COORDINATOR_<slot> key value`. The receiver resolves
    /// to `true` once the replica acknowledged the write.
    pub fn forward(&self, key: &str, value: &str) -> oneshot::Receiver<bool> {
        let (ack, rx) = oneshot::channel();
        let cmd = LinkCommand::Forward {
            slot: self.slot,
            key: key.to_string(),
            value: value.to_string(),
            ack,
        };
        // A dead link task drops `ack`, which the caller sees as a failure.
        let _ = self.tx.send(cmd);
        rx
    }

    pub fn disconnect(self) {
        let _ = self.tx.send(LinkCommand::Disconnect);
        tracing::info!("Closed replica link to {}", self.target);
    }
}

async fn run_link(
    target: String,
    mut rx: mpsc::UnboundedReceiver<LinkCommand>,
    connect_timeout: Duration,
    read_timeout: Duration,
) {
    let mut conn = match NodeConnection::connect(&target, connect_timeout, read_timeout).await {
        Ok(conn) => Some(conn),
        Err(e) => {
            tracing::warn!("Replica {} unreachable: {}", target, e);
            None
        }
    };

    while let Some(cmd) = rx.recv().await {
        match cmd {
            LinkCommand::Forward {
                slot,
                key,
                value,
                ack,
            } => {
                if conn.is_none() {
                    conn = NodeConnection::connect(&target, connect_timeout, read_timeout)
                        .await
                        .ok();
                }
                let Some(active) = conn.as_mut() else {
                    tracing::warn!("Dropping forward of {} to unreachable replica {}", key, target);
                    let _ = ack.send(false);
                    continue;
                };

                let Some(status) = StatusType::replica_put(slot) else {
                    let _ = ack.send(false);
                    continue;
                };
                let msg = KvMessage::with_value(status, key.as_str(), value.as_str());
                let ok = match active.request(&msg).await {
                    Ok(reply) => {
                        let accepted = matches!(
                            reply.status(),
                            Some(
                                StatusType::PutSuccess
                                    | StatusType::PutUpdate
                                    | StatusType::DeleteSuccess
                                    | StatusType::DeleteError
                            )
                        );
                        if !accepted {
                            tracing::warn!("Replica {} answered {} for {}", target, reply, key);
                        }
                        accepted
                    }
                    Err(e) => {
                        tracing::warn!("Forward of {} to {} failed: {}", key, target, e);
                        conn = None;
                        false
                    }
                };
                let _ = ack.send(ok);
            }
            LinkCommand::Disconnect => break,
        }
    }
}

/// Waits for queued forwards, logging the ones that were not applied.
pub async fn await_acks(acks: Vec<oneshot::Receiver<bool>>) -> usize {
    let mut failed = 0;
    for ack in acks {
        if !ack.await.unwrap_or(false) {
            failed += 1;
        }
    }
    if failed > 0 {
        tracing::warn!("{} replica forward(s) were not applied", failed);
    }
    failed
}
