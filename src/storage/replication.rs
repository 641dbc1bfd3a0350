use std::collections::HashMap;

use tokio::sync::oneshot;

use super::replica::{ReplicaLink, await_acks};
use super::server::KvServer;
use super::types::{NodeState, StorageSlot};
use crate::protocol::{KvMessage, StatusType};
use crate::ring::Metadata;

impl KvServer {
    /// Installs a metadata broadcast: re-targets replica links, adopts data
    /// of departed predecessors and hands off keys that moved away.
    pub(super) async fn update_metadata(&self, metadata: Metadata) -> KvMessage {
        let (acks, needs_rebalance) = {
            let mut guard = self.state.write().await;
            let state: &mut NodeState = &mut guard;

            let old_range = state.own_range(&self.name);
            state.metadata = metadata;
            let new_range = state.own_range(&self.name);
            tracing::info!(
                "{} installed metadata for {} node(s)",
                self.name,
                state.metadata.len()
            );

            self.update_replicas(state);
            let acks = self.update_coordinators(state).await;

            let needs_rebalance = match new_range {
                Some(range) if old_range != new_range => {
                    state.primary.keys().any(|key| !range.contains_key(key))
                }
                _ => false,
            };
            (acks, needs_rebalance)
        };

        await_acks(acks).await;

        if needs_rebalance {
            match self.rebalance().await {
                Ok(moved) => tracing::info!("{} handed off {} key(s)", self.name, moved),
                Err(e) => tracing::error!("{} could not hand off keys: {}", self.name, e),
            }
        }

        KvMessage::new(StatusType::KeyrangeSuccess)
    }

    /// Points replica slot 1/2 at the first/second successor. Links whose
    /// target is unchanged are kept, possibly under a new slot number.
    pub(super) fn update_replicas(&self, state: &mut NodeState) {
        let (succ1, succ2) = state.metadata.successors(&self.name);
        let mut old = [state.replica1_link.take(), state.replica2_link.take()];

        let mut claim = |target: Option<String>, slot: u8| -> Option<ReplicaLink> {
            let target = target.filter(|t| *t != self.name)?;
            for link in old.iter_mut() {
                if let Some(mut kept) = link.take_if(|l| l.target() == target) {
                    kept.retag(slot);
                    return Some(kept);
                }
            }
            Some(ReplicaLink::open(
                target,
                slot,
                self.config.connect_timeout,
                self.config.read_timeout,
            ))
        };

        let link1 = claim(succ1, 1);
        let link2 = claim(succ2, 2);
        state.replica1_link = link1;
        state.replica2_link = link2;

        for stale in old.into_iter().flatten() {
            stale.disconnect();
        }
    }

    /// Tracks the two predecessors whose data the replica slots hold. A
    /// predecessor missing from the new metadata has failed or left; its
    /// replica copy is promoted into the primary map.
    pub(super) async fn update_coordinators(
        &self,
        state: &mut NodeState,
    ) -> Vec<oneshot::Receiver<bool>> {
        let (pred1, pred2) = state.metadata.predecessors(&self.name);
        let old1 = state.coordinator1.take();
        let old2 = state.coordinator2.take();

        let departed =
            |node: &Option<String>| node.as_ref().is_some_and(|n| !state.metadata.contains_node(n));
        let lost1 = departed(&old1);
        let lost2 = departed(&old2);

        let mut absorbed = HashMap::new();
        if lost1 {
            tracing::warn!(
                "{} takes over the range of departed {}",
                self.name,
                old1.as_deref().unwrap_or_default()
            );
            absorbed.extend(std::mem::take(&mut state.replica1));
            if lost2 {
                tracing::warn!(
                    "{} also takes over the range of departed {}",
                    self.name,
                    old2.as_deref().unwrap_or_default()
                );
                absorbed.extend(std::mem::take(&mut state.replica2));
            }
        }

        let mut acks = Vec::new();
        if !absorbed.is_empty() {
            for (key, value) in absorbed {
                if state.primary.contains_key(&key) {
                    continue;
                }
                acks.extend(state.links().map(|link| link.forward(&key, &value)));
                state.primary.insert(key, value);
            }
            self.persistence
                .save(StorageSlot::Primary, &state.primary)
                .await;
        }

        let mut previous = [
            (old1, std::mem::take(&mut state.replica1)),
            (old2, std::mem::take(&mut state.replica2)),
        ];
        let mut claim = |owner: &Option<String>| -> HashMap<String, String> {
            let Some(owner) = owner else {
                return HashMap::new();
            };
            previous
                .iter_mut()
                .find(|(tracked, _)| tracked.as_deref() == Some(owner.as_str()))
                .map(|(_, map)| std::mem::take(map))
                .unwrap_or_default()
        };
        state.replica1 = claim(&pred1);
        state.replica2 = claim(&pred2);
        state.coordinator1 = pred1;
        state.coordinator2 = pred2;

        self.persistence
            .save(StorageSlot::Replica1, &state.replica1)
            .await;
        self.persistence
            .save(StorageSlot::Replica2, &state.replica2)
            .await;

        acks
    }
}
