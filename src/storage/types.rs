use std::collections::HashMap;

use super::replica::ReplicaLink;
use crate::ring::{KeyRange, Metadata};

/// Value written to delete a key.
pub const DELETE_SENTINEL: &str = "null";

/// The three maps a node keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageSlot {
    Primary,
    Replica1,
    Replica2,
}

impl StorageSlot {
    pub fn from_replica(slot: u8) -> Option<StorageSlot> {
        match slot {
            1 => Some(StorageSlot::Replica1),
            2 => Some(StorageSlot::Replica2),
            _ => None,
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            StorageSlot::Primary => "storage.json",
            StorageSlot::Replica1 => "storage_replica_1.json",
            StorageSlot::Replica2 => "storage_replica_2.json",
        }
    }
}

/// Result of applying one PUT to a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Updated,
    Deleted,
    /// Delete of a key that was not there.
    Missing,
}

impl PutOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, PutOutcome::Missing)
    }
}

pub fn apply_put(map: &mut HashMap<String, String>, key: &str, value: &str) -> PutOutcome {
    if value == DELETE_SENTINEL {
        return match map.remove(key) {
            Some(_) => PutOutcome::Deleted,
            None => PutOutcome::Missing,
        };
    }

    match map.insert(key.to_string(), value.to_string()) {
        Some(_) => PutOutcome::Updated,
        None => PutOutcome::Inserted,
    }
}

/// Everything guarded by the node's state lock.
#[derive(Default)]
pub struct NodeState {
    pub primary: HashMap<String, String>,
    pub replica1: HashMap<String, String>,
    pub replica2: HashMap<String, String>,
    pub metadata: Metadata,
    /// First and second predecessor: the nodes whose data the replica
    /// slots hold.
    pub coordinator1: Option<String>,
    pub coordinator2: Option<String>,
    pub replica1_link: Option<ReplicaLink>,
    pub replica2_link: Option<ReplicaLink>,
}

impl NodeState {
    pub fn map(&self, slot: StorageSlot) -> &HashMap<String, String> {
        match slot {
            StorageSlot::Primary => &self.primary,
            StorageSlot::Replica1 => &self.replica1,
            StorageSlot::Replica2 => &self.replica2,
        }
    }

    pub fn map_mut(&mut self, slot: StorageSlot) -> &mut HashMap<String, String> {
        match slot {
            StorageSlot::Primary => &mut self.primary,
            StorageSlot::Replica1 => &mut self.replica1,
            StorageSlot::Replica2 => &mut self.replica2,
        }
    }

    pub fn own_range(&self, name: &str) -> Option<KeyRange> {
        self.metadata.range_of(name)
    }

    pub fn links(&self) -> impl Iterator<Item = &ReplicaLink> {
        self.replica1_link.iter().chain(self.replica2_link.iter())
    }

    pub fn take_links(&mut self) -> Vec<ReplicaLink> {
        self.replica1_link
            .take()
            .into_iter()
            .chain(self.replica2_link.take())
            .collect()
    }
}
