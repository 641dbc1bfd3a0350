//! Consistent-Hash Ring
//!
//! Pure computation shared by the coordinator, the storage nodes and the client.
//!
//! ## Core Concepts
//! - **Position**: MD5 of a node's `host:port`, read as a big-endian `u128`.
//! - **Ownership**: a node owns `(predecessor, own_position]`, wrapping past the top.
//! - **Metadata**: the serialized name → range table every participant caches.
//! - **Replication**: the two successors of a node hold its data; the two
//!   predecessors are the nodes it holds replicas for.

pub mod hash;
pub mod metadata;
pub mod positions;

pub use hash::{KeyRange, hash, in_range};
pub use metadata::Metadata;
pub use positions::Ring;
