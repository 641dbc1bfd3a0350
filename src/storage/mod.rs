//! Storage Node
//!
//! A single member of the ring: holds its own key range plus replica copies of
//! its two predecessors' ranges.
//!
//! ## Core Concepts
//! - **State machine**: `handle_message` gates on the started flags, then
//!   dispatches on the status word (`handlers`).
//! - **Replication**: every primary write is forwarded synchronously to the two
//!   successors through `ReplicaLink` tasks (`replica`, `replication`).
//! - **Recovery**: when a predecessor disappears from the metadata its replica
//!   copy is promoted into the primary map (`replication`).
//! - **Rebalancing**: keys the metadata assigns elsewhere are moved to their new
//!   owner while writes are locked (`rebalance`).
//! - **Durability**: each map is mirrored to a JSON file in the data directory
//!   (`persistence`).

pub mod handlers;
pub mod heartbeat;
pub mod persistence;
pub mod rebalance;
pub mod replica;
pub mod replication;
pub mod server;
pub mod subscriptions;
pub mod types;

pub use server::KvServer;
pub use types::{DELETE_SENTINEL, StorageSlot};
