use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{Context, Result};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock, mpsc, watch};

use super::heartbeat::spawn_heartbeat;
use super::persistence::Persistence;
use super::subscriptions::Subscriptions;
use super::types::{NodeState, StorageSlot};
use crate::config::NodeConfig;
use crate::protocol::{
    FrameReader, KvMessage, StatusType, open_stream, spawn_writer, write_message,
};
use crate::ring::Metadata;

/// A storage node.
///
/// Owns a primary map plus two replica maps, answers the wire protocol on its
/// listening port and, when a coordinator is configured, follows the
/// coordinator's lifecycle and metadata broadcasts.
pub struct KvServer {
    pub(super) name: String,
    pub(super) config: NodeConfig,
    pub(super) state: RwLock<NodeState>,
    pub(super) subscriptions: Subscriptions,
    pub(super) persistence: Persistence,
    pub(super) started_by_ecs: AtomicBool,
    pub(super) started_by_self: AtomicBool,
    pub(super) rebalancing: AtomicBool,
    pub(super) rebalance_guard: Mutex<()>,
    ecs_tx: StdMutex<Option<mpsc::UnboundedSender<KvMessage>>>,
    shutdown_tx: watch::Sender<bool>,
    running: AtomicBool,
}

impl KvServer {
    /// Builds a node without touching the network or the disk.
    pub fn new(config: NodeConfig) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        let standalone = config.coordinator.is_none();

        Arc::new(Self {
            name: config.name(),
            persistence: Persistence::new(config.data_dir.clone()),
            config,
            state: RwLock::new(NodeState::default()),
            subscriptions: Subscriptions::new(),
            started_by_ecs: AtomicBool::new(false),
            started_by_self: AtomicBool::new(standalone),
            rebalancing: AtomicBool::new(false),
            rebalance_guard: Mutex::new(()),
            ecs_tx: StdMutex::new(None),
            shutdown_tx,
            running: AtomicBool::new(false),
        })
    }

    /// Loads persisted data, binds the listener and, if configured, joins
    /// the coordinator.
    pub async fn start(config: NodeConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let server = Self::new(config);

        let primary = server.persistence.load(StorageSlot::Primary).await;
        if !primary.is_empty() {
            tracing::info!("Loaded {} persisted key(s) for {}", primary.len(), server.name);
        }
        server.state.write().await.primary = primary;

        let listener = TcpListener::bind(server.name.as_str())
            .await
            .with_context(|| format!("binding {}", server.name))?;
        server.running.store(true, Ordering::SeqCst);
        tracing::info!("Storage node listening on {}", server.name);

        {
            let server = server.clone();
            tokio::spawn(async move {
                server.accept_loop(listener).await;
            });
        }

        match server.config.coordinator.clone() {
            Some(coordinator) => server.join_coordinator(&coordinator).await?,
            None => tracing::info!("No coordinator configured, {} serves standalone", server.name),
        }

        Ok(server)
    }

    async fn join_coordinator(self: &Arc<Self>, coordinator: &str) -> Result<()> {
        let stream = open_stream(coordinator, self.config.connect_timeout)
            .await
            .with_context(|| format!("connecting to coordinator {}", coordinator))?;
        let (read_half, write_half) = stream.into_split();
        let tx = spawn_writer(write_half, coordinator.to_string());

        let hello = KvMessage::with_value(
            StatusType::NewServer,
            self.config.address.as_str(),
            self.config.port.to_string(),
        );
        tx.send(hello)
            .map_err(|_| anyhow::anyhow!("coordinator writer closed before NEW_SERVER"))?;
        tracing::info!("Registered {} with coordinator {}", self.name, coordinator);

        spawn_heartbeat(
            tx.clone(),
            self.config.address.clone(),
            self.config.port,
            self.config.heartbeat_period,
            self.shutdown_tx.subscribe(),
        );

        if let Ok(mut slot) = self.ecs_tx.lock() {
            *slot = Some(tx.clone());
        }

        let server = self.clone();
        tokio::spawn(async move {
            server.serve_coordinator(read_half, tx).await;
        });
        Ok(())
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!("{} accepted connection from {}", self.name, peer);
                        let server = self.clone();
                        tokio::spawn(async move {
                            server.serve_client(stream).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept failed on {}: {}", self.name, e);
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                },
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }
        tracing::info!("{} stopped accepting connections", self.name);
    }

    async fn serve_client(self: Arc<Self>, stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = FrameReader::new(read_half, self.config.read_timeout);
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                request = reader.next_request() => match request {
                    Ok(Some(msg)) => {
                        let response = self.handle_message(msg).await;
                        if let Err(e) = write_message(&mut write_half, &response).await {
                            tracing::debug!("Client {} went away: {}", peer, e);
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Dropping client {}: {}", peer, e);
                        break;
                    }
                },
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }
    }

    /// Coordinator pushes arrive here; replies go back on the shared writer
    /// so they interleave correctly with heartbeats.
    async fn serve_coordinator(
        self: Arc<Self>,
        read_half: OwnedReadHalf,
        tx: mpsc::UnboundedSender<KvMessage>,
    ) {
        let mut reader = FrameReader::new(read_half, self.config.read_timeout);
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                request = reader.next_request() => match request {
                    Ok(Some(msg)) => {
                        tracing::info!("{} received {} from coordinator", self.name, msg.status().map(|s| s.as_str()).unwrap_or("?"));
                        let response = self.handle_message(msg).await;
                        if tx.send(response).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::warn!("Coordinator closed the connection to {}", self.name);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Coordinator link of {} failed: {}", self.name, e);
                        break;
                    }
                },
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }
    }

    pub(super) fn notify_coordinator(&self, msg: KvMessage) {
        let tx = self.ecs_tx.lock().ok().and_then(|slot| slot.clone());
        if let Some(tx) = tx
            && tx.send(msg).is_err()
        {
            tracing::warn!("{} could not reach the coordinator", self.name);
        }
    }

    /// Graceful exit: tells the coordinator, drops replica copies and stops
    /// every background task.
    pub async fn close(&self) -> Result<()> {
        tracing::info!("Shutting down {}", self.name);
        self.notify_coordinator(KvMessage::with_value(
            StatusType::KillingMyself,
            self.config.address.as_str(),
            self.config.port.to_string(),
        ));

        {
            let mut state = self.state.write().await;
            state.replica1.clear();
            state.replica2.clear();
            for link in state.take_links() {
                link.disconnect();
            }
            self.persistence
                .try_save(StorageSlot::Replica1, &state.replica1)
                .await?;
            self.persistence
                .try_save(StorageSlot::Replica2, &state.replica2)
                .await?;
        }
        self.subscriptions.clear();

        self.stop_tasks();
        Ok(())
    }

    /// Abrupt exit: the node simply goes silent, as if the process died.
    pub async fn kill(&self) {
        tracing::warn!("Killing {}", self.name);
        let links = self.state.write().await.take_links();
        for link in links {
            link.disconnect();
        }
        self.stop_tasks();
    }

    fn stop_tasks(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.ecs_tx.lock() {
            slot.take();
        }
        self.shutdown_tx.send_replace(true);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.started_by_ecs.load(Ordering::SeqCst) || self.started_by_self.load(Ordering::SeqCst)
    }

    pub fn is_rebalancing(&self) -> bool {
        self.rebalancing.load(Ordering::SeqCst)
    }

    pub async fn metadata(&self) -> Metadata {
        self.state.read().await.metadata.clone()
    }

    pub async fn replica_targets(&self) -> (Option<String>, Option<String>) {
        let state = self.state.read().await;
        (
            state.replica1_link.as_ref().map(|l| l.target().to_string()),
            state.replica2_link.as_ref().map(|l| l.target().to_string()),
        )
    }

    pub async fn coordinators(&self) -> (Option<String>, Option<String>) {
        let state = self.state.read().await;
        (state.coordinator1.clone(), state.coordinator2.clone())
    }

    pub async fn primary_snapshot(&self) -> HashMap<String, String> {
        self.state.read().await.primary.clone()
    }

    pub async fn replica_snapshot(&self, slot: u8) -> HashMap<String, String> {
        let state = self.state.read().await;
        StorageSlot::from_replica(slot)
            .map(|slot| state.map(slot).clone())
            .unwrap_or_default()
    }

    pub fn subscribers(&self, key: &str) -> Vec<String> {
        self.subscriptions.subscribers(key)
    }
}

/// Resolves once shutdown has been signalled, including before the call.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
