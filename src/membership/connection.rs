use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use super::service::Coordinator;
use super::types::EcsNode;
use crate::protocol::{FrameReader, KvMessage, StatusType, spawn_writer};

pub async fn accept_loop(coordinator: Arc<Coordinator>, listener: TcpListener) {
    let mut shutdown = coordinator.shutdown_signal();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!("Coordinator accepted connection from {}", peer);
                    let coordinator = coordinator.clone();
                    tokio::spawn(async move {
                        serve_node(coordinator, stream).await;
                    });
                }
                Err(e) => {
                    tracing::error!("Coordinator accept failed: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!("Coordinator stopped accepting nodes");
}

/// One task per node socket. The first `NEW_SERVER` names the connection;
/// everything after is heartbeats, departures and replies to pushes.
async fn serve_node(coordinator: Arc<Coordinator>, stream: TcpStream) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_default();
    let (read_half, write_half) = stream.into_split();
    let tx = spawn_writer(write_half, peer.clone());
    let mut reader = FrameReader::new(read_half, coordinator.config().read_timeout);
    let mut shutdown = coordinator.shutdown_signal();
    let mut name: Option<String> = None;

    loop {
        let msg = tokio::select! {
            request = reader.next_request() => match request {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Connection {} failed: {}", peer, e);
                    break;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        let Some(status) = msg.status() else {
            tracing::warn!("Ignoring unrecognised message from {}: {}", peer, msg);
            continue;
        };

        match status {
            StatusType::NewServer => {
                let Some((host, port)) = endpoint(&msg) else {
                    tracing::warn!("Malformed NEW_SERVER from {}: {}", peer, msg);
                    continue;
                };
                let node = EcsNode::new(host, port, tx.clone());
                name = Some(node.name.clone());
                coordinator.register(node).await;
            }
            StatusType::Heartbeat => {
                if let Some(sender) = sender_name(&msg, name.as_deref()) {
                    coordinator.record_heartbeat(&sender).await;
                }
            }
            StatusType::KillingMyself => {
                if let Some(sender) = sender_name(&msg, name.as_deref()) {
                    tracing::info!("{} is leaving", sender);
                    coordinator.remove_nodes(&[sender]).await;
                }
            }
            other => match name.as_deref() {
                Some(sender) => {
                    tracing::debug!("{} reported {}", sender, other);
                    coordinator.record_status(sender, other).await;
                }
                None => tracing::warn!("Status {} from unregistered peer {}", other, peer),
            },
        }
    }

    match name {
        Some(name) => tracing::warn!("Lost connection to {}", name),
        None => tracing::debug!("Connection {} closed", peer),
    }
}

fn endpoint(msg: &KvMessage) -> Option<(&str, u16)> {
    let host = msg.key()?;
    let port = msg.value()?.trim().parse().ok()?;
    Some((host, port))
}

fn sender_name(msg: &KvMessage, registered: Option<&str>) -> Option<String> {
    endpoint(msg)
        .map(|(host, port)| format!("{}:{}", host, port))
        .or_else(|| registered.map(str::to_string))
}
