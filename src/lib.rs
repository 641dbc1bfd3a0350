//! Partitioned, Replicated Key-Value Store
//!
//! This library crate defines the subsystems shared by the `ring-kv` binary
//! (`node` and `coordinator` subcommands) and by embedding applications.
//!
//! ## Architecture Modules
//! - **`ring`**: consistent hashing over MD5 positions, key ranges and the
//!   metadata table every participant caches.
//! - **`protocol`**: the `\n\r`-framed text protocol, message grammar and
//!   connection helpers.
//! - **`storage`**: the storage node. Serves reads and writes for its range,
//!   replicates to its two successors, recovers departed predecessors and
//!   rebalances keys on topology change.
//! - **`membership`**: the coordinator. Registers nodes, assigns ranges,
//!   broadcasts metadata and evicts nodes that stop sending heartbeats.
//! - **`client`**: the routing client and subscription listener.
//! - **`config`** / **`error`**: runtime settings and typed errors.

pub mod client;
pub mod config;
pub mod error;
pub mod membership;
pub mod protocol;
pub mod ring;
pub mod storage;
