use std::sync::atomic::Ordering;

use super::replica::await_acks;
use super::server::KvServer;
use super::subscriptions::notify;
use super::types::{DELETE_SENTINEL, PutOutcome, StorageSlot, apply_put};
use crate::protocol::{KvMessage, StatusType};
use crate::ring::Metadata;

pub const UNKNOWN_STATUS_REPLY: &str = "FAILED Failure due to unknown status type.";

impl KvServer {
    /// Answers one request. Never fails: every problem maps to a response.
    pub async fn handle_message(&self, msg: KvMessage) -> KvMessage {
        if !self.is_started() && !msg.is(StatusType::ServerStart) {
            return KvMessage::new(StatusType::ServerStopped);
        }

        let Some(status) = msg.status() else {
            return KvMessage::raw(UNKNOWN_STATUS_REPLY);
        };

        match status {
            StatusType::ServerStart => {
                self.started_by_ecs.store(true, Ordering::SeqCst);
                tracing::info!("{} started", self.name);
                KvMessage::new(StatusType::ServerStartSuccess)
            }
            StatusType::ServerStop => {
                self.started_by_ecs.store(false, Ordering::SeqCst);
                tracing::info!("{} stopped", self.name);
                KvMessage::new(StatusType::ServerStopSuccess)
            }
            StatusType::ServerShutdown => {
                self.started_by_ecs.store(false, Ordering::SeqCst);
                match self.close().await {
                    Ok(()) => KvMessage::new(StatusType::ServerShutdownSuccess),
                    Err(e) => {
                        tracing::error!("Shutdown of {} failed: {:#}", self.name, e);
                        KvMessage::new(StatusType::ServerShutdownError)
                    }
                }
            }
            StatusType::KeyrangeUpdate => {
                let text = msg.key().unwrap_or_default();
                match text.parse::<Metadata>() {
                    Ok(metadata) => self.update_metadata(metadata).await,
                    Err(e) => {
                        tracing::error!("{} rejected metadata update: {}", self.name, e);
                        KvMessage::raw(UNKNOWN_STATUS_REPLY)
                    }
                }
            }
            StatusType::Put => match (msg.key(), msg.value()) {
                (Some(key), Some(value)) => self.handle_put(key, value).await,
                _ => KvMessage::new(StatusType::PutError),
            },
            StatusType::PutFromCoordinator1 | StatusType::PutFromCoordinator2 => {
                match (msg.key(), msg.value(), status.replica_slot()) {
                    (Some(key), Some(value), Some(slot)) => {
                        self.handle_replica_put(slot, key, value).await
                    }
                    _ => KvMessage::new(StatusType::PutError),
                }
            }
            StatusType::Get => match msg.key() {
                Some(key) => self.handle_get(key).await,
                None => KvMessage::new(StatusType::GetError),
            },
            StatusType::Subscribe | StatusType::Unsubscribe => match (msg.key(), msg.value()) {
                (Some(key), Some(addr)) => {
                    self.handle_subscription(status == StatusType::Subscribe, key, addr)
                        .await
                }
                _ => KvMessage::raw(UNKNOWN_STATUS_REPLY),
            },
            StatusType::Keyrange => {
                let metadata = self.served_metadata().await;
                KvMessage::with_key(StatusType::KeyrangeSuccess, metadata.to_string())
            }
            StatusType::KeyrangeRead => {
                let metadata = self.served_metadata().await.read_view();
                KvMessage::with_key(StatusType::KeyrangeSuccess, metadata.to_string())
            }
            StatusType::Rebalance => match self.rebalance().await {
                Ok(moved) => {
                    tracing::info!("{} rebalanced {} key(s)", self.name, moved);
                    KvMessage::new(StatusType::RebalanceSuccess)
                }
                Err(e) => {
                    tracing::error!("{} failed to rebalance: {}", self.name, e);
                    KvMessage::new(StatusType::RebalanceError)
                }
            },
            _ => KvMessage::raw(UNKNOWN_STATUS_REPLY),
        }
    }

    async fn handle_put(&self, key: &str, value: &str) -> KvMessage {
        if self.is_rebalancing() {
            return KvMessage::new(StatusType::ServerWriteLock);
        }

        let (outcome, acks) = {
            let mut state = self.state.write().await;
            if self.is_rebalancing() {
                return KvMessage::new(StatusType::ServerWriteLock);
            }
            if let Some(range) = state.own_range(&self.name)
                && !range.contains_key(key)
            {
                return KvMessage::new(StatusType::ServerNotResponsible);
            }

            let outcome = apply_put(&mut state.primary, key, value);
            let mut acks = Vec::new();
            if outcome.changed() {
                self.persistence
                    .save(StorageSlot::Primary, &state.primary)
                    .await;
                acks = state.links().map(|link| link.forward(key, value)).collect();
            }
            (outcome, acks)
        };

        await_acks(acks).await;

        let response = match outcome {
            PutOutcome::Inserted => KvMessage::with_value(StatusType::PutSuccess, key, value),
            PutOutcome::Updated => KvMessage::with_value(StatusType::PutUpdate, key, value),
            PutOutcome::Deleted => KvMessage::with_key(StatusType::DeleteSuccess, key),
            PutOutcome::Missing => return KvMessage::with_key(StatusType::DeleteError, key),
        };

        let subscribers = self.subscriptions.subscribers(key);
        if !subscribers.is_empty() {
            let update = match outcome {
                PutOutcome::Deleted => {
                    KvMessage::with_value(StatusType::DeleteSuccess, key, DELETE_SENTINEL)
                }
                _ => response.clone(),
            };
            notify(subscribers, update, self.config.connect_timeout);
        }

        response
    }

    async fn handle_replica_put(&self, slot: u8, key: &str, value: &str) -> KvMessage {
        let Some(slot) = StorageSlot::from_replica(slot) else {
            return KvMessage::new(StatusType::PutError);
        };

        let mut state = self.state.write().await;
        let outcome = apply_put(state.map_mut(slot), key, value);
        if outcome.changed() {
            self.persistence.save(slot, state.map(slot)).await;
        }

        match outcome {
            PutOutcome::Inserted => KvMessage::with_value(StatusType::PutSuccess, key, value),
            PutOutcome::Updated => KvMessage::with_value(StatusType::PutUpdate, key, value),
            PutOutcome::Deleted => KvMessage::with_key(StatusType::DeleteSuccess, key),
            PutOutcome::Missing => KvMessage::with_key(StatusType::DeleteError, key),
        }
    }

    async fn handle_get(&self, key: &str) -> KvMessage {
        let state = self.state.read().await;

        let found = [&state.primary, &state.replica1, &state.replica2]
            .into_iter()
            .find_map(|map| map.get(key));
        if let Some(value) = found {
            return KvMessage::with_value(StatusType::GetSuccess, key, value.as_str());
        }

        // A managed node without a range yet is not the authority for misses.
        let responsible = self.started_by_self.load(Ordering::SeqCst)
            || state
                .own_range(&self.name)
                .is_some_and(|range| range.contains_key(key));
        if responsible {
            KvMessage::with_key(StatusType::GetError, key)
        } else {
            KvMessage::new(StatusType::ServerNotResponsible)
        }
    }

    async fn handle_subscription(&self, subscribe: bool, key: &str, addr: &str) -> KvMessage {
        if !self.state.read().await.primary.contains_key(key) {
            return KvMessage::new(StatusType::ServerNotResponsible);
        }

        if subscribe {
            if self.subscriptions.subscribe(key, addr) {
                tracing::info!(
                    "{} subscribed to {} on {}, subscribers now [{}]",
                    addr,
                    key,
                    self.name,
                    self.subscriptions.render(key)
                );
                KvMessage::with_value(StatusType::SubscribeSuccess, key, addr)
            } else {
                KvMessage::raw(format!(
                    "SUBSCRIPTION UPDATE: Client {} is already subscribed.",
                    addr
                ))
            }
        } else if self.subscriptions.unsubscribe(key, addr) {
            tracing::info!(
                "{} unsubscribed from {} on {}, subscribers now [{}]",
                addr,
                key,
                self.name,
                self.subscriptions.render(key)
            );
            KvMessage::with_value(StatusType::UnsubscribeSuccess, key, addr)
        } else {
            KvMessage::raw(format!(
                "UNSUBSCRIBE UPDATE: Client {} is not subscribed.",
                addr
            ))
        }
    }

    /// The metadata handed to clients. A node that has never received a
    /// broadcast claims the whole ring.
    async fn served_metadata(&self) -> Metadata {
        let metadata = self.state.read().await.metadata.clone();
        if metadata.is_empty() {
            Metadata::full_ring(&self.name)
        } else {
            metadata
        }
    }
}
