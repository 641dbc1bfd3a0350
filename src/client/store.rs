use std::collections::HashMap;
use std::time::Duration;

use crate::config::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, RetryPolicy};
use crate::error::ClientError;
use crate::protocol::{KvMessage, NodeConnection, StatusType};
use crate::ring::Metadata;
use crate::storage::DELETE_SENTINEL;

/// Client-side router.
///
/// Caches the write and read metadata, sends each request to the node that
/// owns the key, and absorbs the routing replies (`SERVER_WRITE_LOCK`,
/// `SERVER_STOPPED`, `SERVER_NOT_RESPONSIBLE`) with a bounded retry loop.
pub struct KvStore {
    write_metadata: Metadata,
    read_metadata: Metadata,
    connections: HashMap<String, NodeConnection>,
    connect_timeout: Duration,
    read_timeout: Duration,
    retry: RetryPolicy,
}

impl KvStore {
    /// Starts out believing `initial` (`host:port`) owns the whole ring.
    pub fn new(initial: &str) -> Self {
        Self::with_settings(
            initial,
            DEFAULT_CONNECT_TIMEOUT,
            DEFAULT_READ_TIMEOUT,
            RetryPolicy::default(),
        )
    }

    pub fn with_settings(
        initial: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            write_metadata: Metadata::full_ring(initial),
            read_metadata: Metadata::full_ring(initial),
            connections: HashMap::new(),
            connect_timeout,
            read_timeout,
            retry,
        }
    }

    pub fn write_metadata(&self) -> &Metadata {
        &self.write_metadata
    }

    pub fn read_metadata(&self) -> &Metadata {
        &self.read_metadata
    }

    pub async fn put(&mut self, key: &str, value: &str) -> Result<KvMessage, ClientError> {
        let request = KvMessage::with_value(StatusType::Put, key, value);
        self.route(key, &request, false).await
    }

    pub async fn delete(&mut self, key: &str) -> Result<KvMessage, ClientError> {
        self.put(key, DELETE_SENTINEL).await
    }

    pub async fn get(&mut self, key: &str) -> Result<KvMessage, ClientError> {
        let request = KvMessage::with_key(StatusType::Get, key);
        self.route(key, &request, true).await
    }

    /// Registers `addr` (a [`super::NotificationListener`] address) for
    /// updates of `key`.
    pub async fn subscribe(&mut self, key: &str, addr: &str) -> Result<KvMessage, ClientError> {
        let request = KvMessage::with_value(StatusType::Subscribe, key, addr);
        self.route(key, &request, false).await
    }

    pub async fn unsubscribe(&mut self, key: &str, addr: &str) -> Result<KvMessage, ClientError> {
        let request = KvMessage::with_value(StatusType::Unsubscribe, key, addr);
        self.route(key, &request, false).await
    }

    async fn route(
        &mut self,
        key: &str,
        request: &KvMessage,
        mut read: bool,
    ) -> Result<KvMessage, ClientError> {
        let mut last = String::from("none");

        for attempt in 0..self.retry.max_attempts {
            let metadata = if read {
                &self.read_metadata
            } else {
                &self.write_metadata
            };
            let target = metadata
                .owner_of_key(key)
                .map(str::to_string)
                .ok_or_else(|| ClientError::NoRoute(key.to_string()))?;

            let reply = match self.round_trip(&target, request).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!("Request to {} failed: {}", target, e);
                    last = e.to_string();
                    tokio::time::sleep(self.retry.delay_for(attempt)).await;
                    self.refresh_from_any(&target).await;
                    continue;
                }
            };

            match reply.status() {
                Some(StatusType::ServerWriteLock | StatusType::ServerStopped) => {
                    tracing::debug!("{} busy ({}), backing off", target, reply);
                    last = reply.to_string();
                    tokio::time::sleep(self.retry.delay_for(attempt)).await;
                }
                Some(StatusType::ServerNotResponsible) => {
                    last = reply.to_string();
                    if let Err(e) = self.refresh(&target, read).await {
                        tracing::warn!("Metadata refresh from {} failed: {}", target, e);
                    }
                    if read {
                        // The write owner always answers authoritatively.
                        read = false;
                        if let Err(e) = self.refresh(&target, false).await {
                            tracing::warn!("Metadata refresh from {} failed: {}", target, e);
                        }
                    }
                    // The owner may still be installing the same update.
                    tokio::time::sleep(self.retry.delay_for(attempt)).await;
                }
                _ => return Ok(reply),
            }
        }

        Err(ClientError::RetriesExhausted {
            key: key.to_string(),
            attempts: self.retry.max_attempts,
            last,
        })
    }

    async fn round_trip(
        &mut self,
        target: &str,
        request: &KvMessage,
    ) -> Result<KvMessage, ClientError> {
        if !self.connections.contains_key(target) {
            let conn =
                NodeConnection::connect(target, self.connect_timeout, self.read_timeout).await?;
            self.connections.insert(target.to_string(), conn);
        }

        let Some(conn) = self.connections.get_mut(target) else {
            return Err(ClientError::NoRoute(target.to_string()));
        };
        match conn.request(request).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                self.connections.remove(target);
                Err(e.into())
            }
        }
    }

    async fn refresh(&mut self, via: &str, read: bool) -> Result<(), ClientError> {
        let status = if read {
            StatusType::KeyrangeRead
        } else {
            StatusType::Keyrange
        };
        let reply = self.round_trip(via, &KvMessage::new(status)).await?;
        if !reply.is(StatusType::KeyrangeSuccess) {
            return Err(ClientError::UnexpectedResponse(reply.to_string()));
        }

        let metadata: Metadata = reply.key().unwrap_or_default().parse()?;
        if metadata.is_empty() {
            return Err(ClientError::UnexpectedResponse(reply.to_string()));
        }
        tracing::debug!("Refreshed {} metadata from {}", status, via);
        if read {
            self.read_metadata = metadata;
        } else {
            self.write_metadata = metadata;
        }
        Ok(())
    }

    /// After `unreachable` failed, asks the other known nodes for fresh
    /// metadata until one answers.
    async fn refresh_from_any(&mut self, unreachable: &str) {
        let mut candidates = self.write_metadata.node_order();
        for name in self.read_metadata.node_order() {
            if !candidates.contains(&name) {
                candidates.push(name);
            }
        }

        for candidate in candidates.into_iter().filter(|c| c != unreachable) {
            if self.refresh(&candidate, false).await.is_ok() {
                if let Err(e) = self.refresh(&candidate, true).await {
                    tracing::debug!("Read metadata refresh from {} failed: {}", candidate, e);
                }
                return;
            }
        }
    }
}
