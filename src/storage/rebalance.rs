use std::collections::HashMap;
use std::sync::atomic::Ordering;

use super::replica::await_acks;
use super::server::KvServer;
use super::types::{DELETE_SENTINEL, NodeState, StorageSlot};
use crate::error::RebalanceError;
use crate::protocol::{KvMessage, NodeConnection, StatusType};

impl KvServer {
    /// Moves every primary key the current metadata assigns elsewhere to its
    /// owner. Writes are refused with `SERVER_WRITE_LOCK` while keys are in
    /// flight; reads keep being served.
    ///
    /// Only keys the destination acknowledged are deleted locally, so an
    /// aborted run leaves each key on exactly one node. Returns how many
    /// keys moved.
    pub async fn rebalance(&self) -> Result<usize, RebalanceError> {
        let _guard = self.rebalance_guard.lock().await;
        self.rebalancing.store(true, Ordering::SeqCst);

        let bins = {
            let mut state = self.state.write().await;
            for link in state.take_links() {
                link.disconnect();
            }
            self.bin_foreign_keys(&state)
        };

        let mut moved = Vec::new();
        let mut outcome = Ok(());
        for (target, entries) in bins {
            tracing::info!("{} moving {} key(s) to {}", self.name, entries.len(), target);
            if let Err(e) = self.move_bin(&target, entries, &mut moved).await {
                outcome = Err(e);
                break;
            }
        }

        {
            let mut state = self.state.write().await;
            for key in &moved {
                state.primary.remove(key);
                self.subscriptions.remove_key(key);
            }
            if !moved.is_empty() {
                self.persistence
                    .save(StorageSlot::Primary, &state.primary)
                    .await;
            }
        }
        self.rebalancing.store(false, Ordering::SeqCst);

        let acks = {
            let mut guard = self.state.write().await;
            let state: &mut NodeState = &mut guard;
            self.update_replicas(state);

            let mut acks = Vec::new();
            for link in state.links() {
                for key in &moved {
                    acks.push(link.forward(key, DELETE_SENTINEL));
                }
                for (key, value) in &state.primary {
                    acks.push(link.forward(key, value));
                }
            }
            acks
        };
        await_acks(acks).await;

        outcome.map(|()| moved.len())
    }

    fn bin_foreign_keys(&self, state: &NodeState) -> HashMap<String, Vec<(String, String)>> {
        let mut bins: HashMap<String, Vec<(String, String)>> = HashMap::new();
        for (key, value) in &state.primary {
            match state.metadata.owner_of_key(key) {
                Some(owner) if owner != self.name => {
                    bins.entry(owner.to_string())
                        .or_default()
                        .push((key.clone(), value.clone()));
                }
                _ => {}
            }
        }
        bins
    }

    async fn move_bin(
        &self,
        target: &str,
        entries: Vec<(String, String)>,
        moved: &mut Vec<String>,
    ) -> Result<(), RebalanceError> {
        let mut conn = NodeConnection::connect(
            target,
            self.config.connect_timeout,
            self.config.read_timeout,
        )
        .await
        .map_err(|source| RebalanceError::Protocol {
            target: target.to_string(),
            source,
        })?;

        for (key, value) in entries {
            self.move_key(&mut conn, &key, &value).await?;
            moved.push(key.clone());

            for subscriber in self.subscriptions.subscribers(&key) {
                let resubscribe =
                    KvMessage::with_value(StatusType::Subscribe, key.as_str(), subscriber.as_str());
                match conn.request(&resubscribe).await {
                    Ok(reply) if reply.is(StatusType::SubscribeSuccess) => {}
                    Ok(reply) => tracing::warn!(
                        "{} kept no subscription for {} on {}: {}",
                        target,
                        subscriber,
                        key,
                        reply
                    ),
                    Err(e) => tracing::warn!(
                        "Failed to move subscription of {} on {} to {}: {}",
                        subscriber,
                        key,
                        target,
                        e
                    ),
                }
            }
        }
        Ok(())
    }

    async fn move_key(
        &self,
        conn: &mut NodeConnection,
        key: &str,
        value: &str,
    ) -> Result<(), RebalanceError> {
        let request = KvMessage::with_value(StatusType::Put, key, value);
        let policy = &self.config.retry;

        for attempt in 0..policy.max_attempts {
            let reply = conn
                .request(&request)
                .await
                .map_err(|source| RebalanceError::Protocol {
                    target: conn.addr().to_string(),
                    source,
                })?;

            match reply.status() {
                Some(StatusType::PutSuccess | StatusType::PutUpdate) => return Ok(()),
                Some(
                    StatusType::ServerWriteLock
                    | StatusType::ServerNotResponsible
                    | StatusType::ServerStopped,
                ) => {
                    tracing::debug!("{} not ready for {} ({}), retrying", conn.addr(), key, reply);
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
                _ => {
                    return Err(RebalanceError::Rejected {
                        key: key.to_string(),
                        target: conn.addr().to_string(),
                        response: reply.to_string(),
                    });
                }
            }
        }

        Err(RebalanceError::RetriesExhausted {
            key: key.to_string(),
            target: conn.addr().to_string(),
            attempts: policy.max_attempts,
        })
    }
}
