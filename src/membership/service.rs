use anyhow::{Context, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::info;

use super::connection::accept_loop;
use super::handlers::admin_router;
use super::monitor::spawn_failure_detector;
use super::types::{EcsNode, NodeStatus};
use crate::config::CoordinatorConfig;
use crate::protocol::{KvMessage, StatusType};
use crate::ring::{Metadata, Ring};

const AWAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Default)]
pub struct CoordinatorState {
    pub nodes: HashMap<String, EcsNode>,
    pub ring: Ring,
}

impl CoordinatorState {
    pub fn metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        for node in self.nodes.values() {
            if let Some(range) = node.range {
                metadata.insert(&node.name, range);
            }
        }
        metadata
    }

    /// Re-derives every node's range from the ring. Returns the nodes whose
    /// range changed, newcomers included.
    fn recompute_ranges(&mut self) -> Vec<String> {
        let mut changed = Vec::new();
        for node in self.nodes.values_mut() {
            let range = self.ring.range_for(node.position);
            if range != node.range {
                node.range = range;
                changed.push(node.name.clone());
            }
        }
        changed
    }

    fn broadcast(&self, msg: &KvMessage) {
        for node in self.nodes.values() {
            node.send(msg.clone());
        }
    }
}

/// The external configuration service (ECS).
///
/// Owns the authoritative ring. Every membership change recomputes ranges,
/// broadcasts the new metadata and asks nodes whose range changed to
/// rebalance.
pub struct Coordinator {
    config: CoordinatorConfig,
    state: RwLock<CoordinatorState>,
    pending: Mutex<Vec<EcsNode>>,
    shutdown_tx: watch::Sender<bool>,
    listen_addr: OnceLock<SocketAddr>,
    admin_addr: OnceLock<SocketAddr>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            state: RwLock::new(CoordinatorState::default()),
            pending: Mutex::new(Vec::new()),
            shutdown_tx,
            listen_addr: OnceLock::new(),
            admin_addr: OnceLock::new(),
        })
    }

    /// Binds the node-facing listener, starts the failure detector and, if
    /// configured, the admin HTTP API.
    pub async fn start(config: CoordinatorConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let coordinator = Self::new(config);

        let listener = TcpListener::bind(coordinator.config.bind_addr())
            .await
            .with_context(|| format!("binding {}", coordinator.config.bind_addr()))?;
        let local = listener.local_addr()?;
        let _ = coordinator.listen_addr.set(local);
        info!("Coordinator listening on {}", local);

        {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                accept_loop(coordinator, listener).await;
            });
        }

        spawn_failure_detector(
            coordinator.clone(),
            coordinator.config.detection_interval,
            coordinator.shutdown_tx.subscribe(),
        );

        if let Some(admin_port) = coordinator.config.admin_port {
            let admin_bind = format!("{}:{}", coordinator.config.address, admin_port);
            let admin_listener = TcpListener::bind(&admin_bind)
                .await
                .with_context(|| format!("binding admin API on {}", admin_bind))?;
            let admin_local = admin_listener.local_addr()?;
            let _ = coordinator.admin_addr.set(admin_local);
            info!("Admin API listening on {}", admin_local);

            let app = admin_router(coordinator.clone());
            let mut shutdown = coordinator.shutdown_tx.subscribe();
            tokio::spawn(async move {
                let serve = axum::serve(admin_listener, app).with_graceful_shutdown(async move {
                    while !*shutdown.borrow_and_update() {
                        if shutdown.changed().await.is_err() {
                            break;
                        }
                    }
                });
                if let Err(e) = serve.await {
                    tracing::error!("Admin API failed: {}", e);
                }
            });
        }

        Ok(coordinator)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listen_addr.get().copied()
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr.get().copied()
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Stops the listener, the detector and the admin API. Nodes are left
    /// untouched; use [`Coordinator::shutdown_service`] to stop them.
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Queues a newly connected node and places it on the ring.
    pub async fn register(&self, node: EcsNode) -> Option<String> {
        info!("Node {} registered", node.name);
        self.pending.lock().await.push(node);
        self.add_node().await
    }

    /// Places the most recently registered pending node on the ring.
    pub async fn add_node(&self) -> Option<String> {
        let node = self.pending.lock().await.pop()?;
        let mut state = self.state.write().await;

        if let Some(stale) = state.nodes.remove(&node.name) {
            tracing::warn!("{} re-registered, replacing its old entry", stale.name);
            state.ring = state.ring.remove_position(stale.position);
        }

        let ring = match state.ring.add_position(node.position) {
            Ok(ring) => ring,
            Err(e) => {
                tracing::error!("Cannot place {}: {}", node.name, e);
                return None;
            }
        };

        node.send(KvMessage::new(StatusType::ServerStart));
        node.started.store(true, Ordering::SeqCst);

        let name = node.name.clone();
        state.ring = ring;
        state.nodes.insert(name.clone(), node);

        let changed = state.recompute_ranges();
        let metadata = state.metadata();
        state.broadcast(&KvMessage::with_key(
            StatusType::KeyrangeUpdate,
            metadata.to_string(),
        ));
        for changed_name in &changed {
            if let Some(node) = state.nodes.get(changed_name) {
                node.send(KvMessage::new(StatusType::Rebalance));
            }
        }

        info!(
            "Added {} ({} node(s) on the ring, {} to rebalance)",
            name,
            state.nodes.len(),
            changed.len()
        );
        Some(name)
    }

    pub async fn add_nodes(&self, count: usize) -> Vec<String> {
        let mut added = Vec::new();
        for _ in 0..count {
            match self.add_node().await {
                Some(name) => added.push(name),
                None => break,
            }
        }
        added
    }

    /// Drops nodes from the ring and broadcasts the shrunken metadata. The
    /// removed nodes get nothing; their successors recover the data from
    /// replica copies.
    pub async fn remove_nodes(&self, names: &[String]) -> bool {
        let mut state = self.state.write().await;
        let mut removed = false;

        for name in names {
            match state.nodes.remove(name) {
                Some(node) => {
                    state.ring = state.ring.remove_position(node.position);
                    removed = true;
                    info!("Removed {} from the ring", name);
                }
                None => tracing::warn!("Cannot remove unknown node {}", name),
            }
        }

        if removed {
            state.recompute_ranges();
            let metadata = state.metadata();
            state.broadcast(&KvMessage::with_key(
                StatusType::KeyrangeUpdate,
                metadata.to_string(),
            ));
        }
        removed
    }

    pub async fn start_service(&self) -> bool {
        self.set_started(true).await
    }

    pub async fn stop_service(&self) -> bool {
        self.set_started(false).await
    }

    async fn set_started(&self, started: bool) -> bool {
        let state = self.state.read().await;
        if state.nodes.is_empty() {
            return false;
        }

        let command = if started {
            StatusType::ServerStart
        } else {
            StatusType::ServerStop
        };
        for node in state.nodes.values() {
            if node.started.swap(started, Ordering::SeqCst) != started {
                node.send(KvMessage::new(command));
            }
        }
        info!("Sent {} to {} node(s)", command, state.nodes.len());
        true
    }

    /// Shuts every node down and empties the ring. Stopped nodes are started
    /// first so they accept the shutdown.
    pub async fn shutdown_service(&self) -> bool {
        let mut state = self.state.write().await;
        if state.nodes.is_empty() {
            return false;
        }

        for node in state.nodes.values() {
            if !node.started.swap(true, Ordering::SeqCst) {
                node.send(KvMessage::new(StatusType::ServerStart));
            }
            node.send(KvMessage::new(StatusType::ServerShutdown));
        }

        let count = state.nodes.len();
        state.nodes.clear();
        state.ring = Ring::new();
        info!("Shut down {} node(s)", count);
        true
    }

    /// Waits until at least `count` nodes have answered anything.
    pub async fn await_nodes(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let ready = {
                let state = self.state.read().await;
                state
                    .nodes
                    .values()
                    .filter(|node| node.last_status().is_some())
                    .count()
            };
            if ready >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(AWAIT_POLL_INTERVAL).await;
        }
    }

    pub async fn list_nodes(&self) -> Vec<NodeStatus> {
        let state = self.state.read().await;
        let mut nodes: Vec<NodeStatus> = state.nodes.values().map(EcsNode::snapshot).collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        nodes
    }

    pub async fn node_for_key(&self, key: &str) -> Option<String> {
        self.state
            .read()
            .await
            .metadata()
            .owner_of_key(key)
            .map(str::to_string)
    }

    pub async fn metadata(&self) -> Metadata {
        self.state.read().await.metadata()
    }

    pub async fn record_heartbeat(&self, name: &str) {
        let state = self.state.read().await;
        match state.nodes.get(name) {
            Some(node) => node.beat(),
            None => tracing::debug!("Heartbeat from unplaced node {}", name),
        }
    }

    pub async fn record_status(&self, name: &str, status: StatusType) {
        if status == StatusType::RebalanceError {
            tracing::warn!("{} reported a failed rebalance", name);
        }
        let state = self.state.read().await;
        if let Some(node) = state.nodes.get(name) {
            node.record_status(status);
        }
    }

    /// Reads and clears every heartbeat flag. Nodes that had not beaten since
    /// the previous sweep are returned.
    pub async fn check_failed(&self) -> Vec<String> {
        let state = self.state.read().await;
        state
            .nodes
            .values()
            .filter(|node| !node.heartbeat.swap(false, Ordering::SeqCst))
            .map(|node| node.name.clone())
            .collect()
    }
}
