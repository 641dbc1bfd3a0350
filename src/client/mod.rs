//! Client Router
//!
//! Library-side access to the cluster: `KvStore` routes requests by key hash
//! and follows redirects; `NotificationListener` collects subscription pushes.

pub mod listener;
pub mod store;

pub use listener::NotificationListener;
pub use store::KvStore;
