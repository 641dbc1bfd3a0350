//! End-to-end cluster tests: a coordinator plus storage nodes on loopback,
//! driven through the routing client.

use ring_kv::client::{KvStore, NotificationListener};
use ring_kv::config::{CoordinatorConfig, NodeConfig, RetryPolicy};
use ring_kv::membership::Coordinator;
use ring_kv::protocol::{KvMessage, NodeConnection, StatusType};
use ring_kv::ring::{Metadata, Ring, hash};
use ring_kv::storage::KvServer;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const HEARTBEAT: Duration = Duration::from_millis(100);
const DETECTION: Duration = Duration::from_millis(400);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(15);

struct TestNode {
    server: Arc<KvServer>,
    _dir: TempDir,
}

async fn coordinator() -> Arc<Coordinator> {
    let mut config = CoordinatorConfig::new("localhost", 0);
    config.heartbeat_period = HEARTBEAT;
    config.detection_interval = DETECTION;
    Coordinator::start(config).await.unwrap()
}

async fn node(coordinator: &Coordinator, port: u16) -> TestNode {
    let dir = tempfile::tempdir().unwrap();
    let mut config = NodeConfig::new("localhost", port, dir.path())
        .with_coordinator(coordinator.listen_addr().unwrap().to_string());
    config.heartbeat_period = HEARTBEAT;
    config.retry = RetryPolicy {
        max_attempts: 20,
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(400),
    };
    TestNode {
        server: KvServer::start(config).await.unwrap(),
        _dir: dir,
    }
}

fn client(initial: &str) -> KvStore {
    KvStore::with_settings(
        initial,
        Duration::from_secs(1),
        Duration::from_secs(2),
        RetryPolicy {
            max_attempts: 20,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(400),
        },
    )
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn settled(nodes: &[&TestNode]) -> bool {
    for node in nodes {
        if node.server.metadata().await.len() != nodes.len() || node.server.is_rebalancing() {
            return false;
        }
    }
    true
}

fn expected_metadata(names: &[&str]) -> Metadata {
    let mut ring = Ring::new();
    for name in names {
        ring = ring.add_position(hash(name)).unwrap();
    }
    let mut metadata = Metadata::new();
    for name in names {
        metadata.insert(name, ring.range_for(hash(name)).unwrap());
    }
    metadata
}

/// Key → how many of `nodes` hold it in their primary map.
async fn primary_counts(nodes: &[&TestNode]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for node in nodes {
        for key in node.server.primary_snapshot().await.into_keys() {
            *counts.entry(key).or_insert(0) += 1;
        }
    }
    counts
}

fn keys(n: usize) -> Vec<(String, String)> {
    (0..n)
        .map(|i| (format!("key{}", i), format!("value {}", i)))
        .collect()
}

#[tokio::test]
async fn test_replicas_follow_ring_successors() {
    let coordinator = coordinator().await;
    let a = node(&coordinator, 6750).await;
    let b = node(&coordinator, 6751).await;
    let c = node(&coordinator, 6752).await;

    eventually("three-node ring", || async { settled(&[&a, &b, &c]).await }).await;

    let expected = [
        (&a, "localhost:6752", "localhost:6751"),
        (&b, "localhost:6750", "localhost:6752"),
        (&c, "localhost:6751", "localhost:6750"),
    ];
    for (node, r1, r2) in expected {
        assert_eq!(
            node.server.replica_targets().await,
            (Some(r1.to_string()), Some(r2.to_string())),
            "replicas of {}",
            node.server.name()
        );
    }

    coordinator.shutdown_service().await;
    coordinator.stop();
}

#[tokio::test]
async fn test_join_moves_keys_to_newcomer() {
    let coordinator = coordinator().await;
    let a = node(&coordinator, 6790).await;
    eventually("single-node ring", || async { settled(&[&a]).await }).await;

    let mut store = client("localhost:6790");
    let data = keys(40);
    for (key, value) in &data {
        let reply = store.put(key, value).await.unwrap();
        assert!(reply.is(StatusType::PutSuccess), "got {}", reply);
    }

    let b = node(&coordinator, 6791).await;
    eventually("two-node ring", || async { settled(&[&a, &b]).await }).await;

    let metadata = expected_metadata(&["localhost:6790", "localhost:6791"]);
    eventually("keys on their owners", || async {
        let a_keys = a.server.primary_snapshot().await;
        let b_keys = b.server.primary_snapshot().await;
        data.iter().all(|(key, _)| {
            match metadata.owner_of_key(key) {
                Some("localhost:6790") => a_keys.contains_key(key) && !b_keys.contains_key(key),
                _ => b_keys.contains_key(key) && !a_keys.contains_key(key),
            }
        })
    })
    .await;

    for (key, value) in &data {
        let reply = store.get(key).await.unwrap();
        assert_eq!(reply.value(), Some(value.as_str()), "value of {}", key);
    }

    coordinator.shutdown_service().await;
    coordinator.stop();
}

#[tokio::test]
async fn test_failed_node_data_is_recovered_from_replicas() {
    let coordinator = coordinator().await;
    let a = node(&coordinator, 6780).await;
    let b = node(&coordinator, 6781).await;
    let c = node(&coordinator, 6782).await;
    eventually("three-node ring", || async { settled(&[&a, &b, &c]).await }).await;

    let mut store = client("localhost:6780");
    let data = keys(30);
    for (key, value) in &data {
        let reply = store.put(key, value).await.unwrap();
        assert!(
            reply.is(StatusType::PutSuccess) || reply.is(StatusType::PutUpdate),
            "got {}",
            reply
        );
    }

    c.server.kill().await;

    eventually("failed node evicted", || async {
        coordinator.list_nodes().await.len() == 2 && settled(&[&a, &b]).await
    })
    .await;

    eventually("every key on exactly one survivor", || async {
        let counts = primary_counts(&[&a, &b]).await;
        data.iter().all(|(key, _)| counts.get(key) == Some(&1))
    })
    .await;

    for (key, value) in &data {
        let reply = store.get(key).await.unwrap();
        assert_eq!(reply.value(), Some(value.as_str()), "value of {}", key);
    }

    coordinator.shutdown_service().await;
    coordinator.stop();
}

#[tokio::test]
async fn test_stop_and_start_gate_requests() {
    let coordinator = coordinator().await;
    let a = node(&coordinator, 6798).await;
    eventually("single-node ring", || async { settled(&[&a]).await }).await;

    let mut conn = NodeConnection::connect(
        "localhost:6798",
        Duration::from_secs(1),
        Duration::from_secs(1),
    )
    .await
    .unwrap();

    assert!(coordinator.stop_service().await);
    eventually("node stopped", || async { !a.server.is_started() }).await;
    let reply = conn
        .request(&KvMessage::with_value(StatusType::Put, "k", "v"))
        .await
        .unwrap();
    assert!(reply.is(StatusType::ServerStopped));

    assert!(coordinator.start_service().await);
    eventually("node started", || async { a.server.is_started() }).await;
    let reply = conn
        .request(&KvMessage::with_value(StatusType::Put, "k", "v"))
        .await
        .unwrap();
    assert!(reply.is(StatusType::PutSuccess));

    coordinator.shutdown_service().await;
    coordinator.stop();
}

#[tokio::test]
async fn test_shutdown_stops_every_node() {
    let coordinator = coordinator().await;
    let a = node(&coordinator, 6795).await;
    let b = node(&coordinator, 6796).await;
    eventually("two-node ring", || async { settled(&[&a, &b]).await }).await;

    assert!(coordinator.shutdown_service().await);

    eventually("nodes shut down", || async {
        !a.server.is_running() && !b.server.is_running()
    })
    .await;
    assert!(coordinator.list_nodes().await.is_empty());
    assert!(a.server.replica_snapshot(1).await.is_empty());

    coordinator.stop();
}

#[tokio::test]
async fn test_subscription_follows_key_to_new_owner() {
    let metadata = expected_metadata(&["localhost:6800", "localhost:6801"]);
    let key = (0..500)
        .map(|i| format!("sub{}", i))
        .find(|k| metadata.owner_of_key(k) == Some("localhost:6801"))
        .unwrap();

    let coordinator = coordinator().await;
    let a = node(&coordinator, 6800).await;
    eventually("single-node ring", || async { settled(&[&a]).await }).await;

    let mut store = client("localhost:6800");
    let mut listener = NotificationListener::bind("localhost").await.unwrap();
    store.put(&key, "before").await.unwrap();
    let reply = store.subscribe(&key, listener.addr()).await.unwrap();
    assert!(reply.is(StatusType::SubscribeSuccess));

    let b = node(&coordinator, 6801).await;
    eventually("subscription moved", || async {
        b.server.subscribers(&key) == vec![listener.addr().to_string()]
            && a.server.subscribers(&key).is_empty()
    })
    .await;

    let reply = store.put(&key, "after").await.unwrap();
    assert!(reply.is(StatusType::PutUpdate), "got {}", reply);

    let update = listener.next(Duration::from_secs(2)).await.unwrap();
    assert_eq!(update.to_string(), format!("PUT_UPDATE {} after", key));

    coordinator.shutdown_service().await;
    coordinator.stop();
}
