use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

use crate::protocol::{KvMessage, StatusType};
use crate::ring::{KeyRange, hash};

/// A registered storage node as the coordinator sees it.
///
/// `range` only changes under the coordinator's write lock; the liveness and
/// lifecycle fields are atomics so heartbeats and start/stop can be handled
/// under the shared lock.
pub struct EcsNode {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub position: u128,
    pub range: Option<KeyRange>,
    pub started: AtomicBool,
    pub heartbeat: AtomicBool,
    pub last_heartbeat_ms: AtomicU64,
    pub last_status: Mutex<Option<StatusType>>,
    tx: mpsc::UnboundedSender<KvMessage>,
}

impl EcsNode {
    pub fn new(host: &str, port: u16, tx: mpsc::UnboundedSender<KvMessage>) -> Self {
        let name = format!("{}:{}", host, port);
        Self {
            position: hash(&name),
            name,
            host: host.to_string(),
            port,
            range: None,
            started: AtomicBool::new(false),
            heartbeat: AtomicBool::new(true),
            last_heartbeat_ms: AtomicU64::new(now_ms()),
            last_status: Mutex::new(None),
            tx,
        }
    }

    /// Fire-and-forget push on the node's socket.
    pub fn send(&self, msg: KvMessage) {
        if self.tx.send(msg).is_err() {
            tracing::warn!("Connection to {} is gone, message dropped", self.name);
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn beat(&self) {
        self.heartbeat.store(true, Ordering::SeqCst);
        self.last_heartbeat_ms.store(now_ms(), Ordering::SeqCst);
    }

    pub fn record_status(&self, status: StatusType) {
        if let Ok(mut last) = self.last_status.lock() {
            *last = Some(status);
        }
    }

    pub fn last_status(&self) -> Option<StatusType> {
        self.last_status.lock().ok().and_then(|last| *last)
    }

    pub fn snapshot(&self) -> NodeStatus {
        NodeStatus {
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port,
            position: format!("{:x}", self.position),
            range: self.range.map(|range| range.to_string()),
            started: self.is_started(),
            last_status: self.last_status().map(|status| status.to_string()),
            millis_since_heartbeat: now_ms()
                .saturating_sub(self.last_heartbeat_ms.load(Ordering::SeqCst)),
        }
    }
}

/// Operator-facing view of one node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeStatus {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub position: String,
    pub range: Option<String>,
    pub started: bool,
    pub last_status: Option<String>,
    pub millis_since_heartbeat: u64,
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
