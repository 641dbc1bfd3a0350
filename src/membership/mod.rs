//! Coordinator (External Configuration Service)
//!
//! Single, non-replicated process that owns cluster membership.
//!
//! ## Core Concepts
//! - **Registration**: nodes connect and announce `NEW_SERVER host port`; the
//!   coordinator places them on the ring immediately.
//! - **Metadata**: every add/remove recomputes all ranges and broadcasts
//!   `KEYRANGE_UPDATE` to every node; nodes whose range changed get `REBALANCE`.
//! - **Failure Detection**: nodes send periodic heartbeats; a node silent for a
//!   whole detection interval is removed (`monitor`).
//! - **Admin API**: optional HTTP/JSON surface for operators (`handlers`).

pub mod connection;
pub mod handlers;
pub mod monitor;
pub mod service;
pub mod types;

pub use service::Coordinator;
pub use types::{EcsNode, NodeStatus};
