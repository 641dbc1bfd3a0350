use std::time::Duration;

use dashmap::DashMap;

use crate::protocol::{KvMessage, deliver_once};

/// Key → subscriber addresses (`host:port`), in subscription order.
/// Lives only on the key's primary owner and is never persisted.
#[derive(Default)]
pub struct Subscriptions {
    table: DashMap<String, Vec<String>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if `addr` was already subscribed.
    pub fn subscribe(&self, key: &str, addr: &str) -> bool {
        let mut entry = self.table.entry(key.to_string()).or_default();
        if entry.iter().any(|existing| existing == addr) {
            return false;
        }
        entry.push(addr.to_string());
        true
    }

    /// Returns `false` if `addr` was not subscribed.
    pub fn unsubscribe(&self, key: &str, addr: &str) -> bool {
        let removed = match self.table.get_mut(key) {
            Some(mut subscribers) => {
                let before = subscribers.len();
                subscribers.retain(|existing| existing != addr);
                subscribers.len() != before
            }
            None => false,
        };
        self.table.remove_if(key, |_, subscribers| subscribers.is_empty());
        removed
    }

    pub fn subscribers(&self, key: &str) -> Vec<String> {
        self.table
            .get(key)
            .map(|subscribers| subscribers.clone())
            .unwrap_or_default()
    }

    /// Comma-separated form used in logs.
    pub fn render(&self, key: &str) -> String {
        self.subscribers(key).join(",")
    }

    pub fn remove_key(&self, key: &str) -> Vec<String> {
        self.table
            .remove(key)
            .map(|(_, subscribers)| subscribers)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn clear(&self) {
        self.table.clear();
    }
}

/// Pushes `msg` to every subscriber over a fresh connection. Delivery is
/// at-most-once; failures are logged and dropped.
pub fn notify(subscribers: Vec<String>, msg: KvMessage, connect_timeout: Duration) {
    for subscriber in subscribers {
        let msg = msg.clone();
        tokio::spawn(async move {
            if let Err(e) = deliver_once(&subscriber, &msg, connect_timeout).await {
                tracing::debug!("Notification to {} dropped: {}", subscriber, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_is_idempotent() {
        let subs = Subscriptions::new();

        assert!(subs.subscribe("k", "localhost:9000"));
        assert!(!subs.subscribe("k", "localhost:9000"));
        assert!(subs.subscribe("k", "localhost:9001"));

        assert_eq!(subs.render("k"), "localhost:9000,localhost:9001");
    }

    #[test]
    fn test_unsubscribe_drops_empty_entries() {
        let subs = Subscriptions::new();
        subs.subscribe("k", "localhost:9000");

        assert!(!subs.unsubscribe("k", "localhost:9999"));
        assert!(subs.unsubscribe("k", "localhost:9000"));
        assert!(!subs.unsubscribe("k", "localhost:9000"));

        assert!(subs.is_empty());
    }

    #[test]
    fn test_remove_key_returns_subscribers() {
        let subs = Subscriptions::new();
        subs.subscribe("a", "localhost:9000");
        subs.subscribe("b", "localhost:9001");

        assert_eq!(subs.remove_key("a"), vec!["localhost:9000".to_string()]);
        assert!(subs.subscribers("a").is_empty());
        assert_eq!(subs.len(), 1);
    }
}
