//! Runtime settings for storage nodes, the coordinator and the client router.
//!
//! Defaults mirror the production timings; tests shrink them.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(10);
pub const DETECTION_INTERVAL: Duration = Duration::from_secs(20);

/// Exponential backoff with jitter, shared by the client router and rebalance.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(150),
            max_delay: Duration::from_millis(1200),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let cap = self.max_delay.as_millis() as u64;
        let shift = attempt.min(16) as u32;
        let delay_ms = base.saturating_mul(1u64 << shift).min(cap);
        let jitter = rand::random::<u64>() % 50;
        Duration::from_millis(delay_ms + jitter)
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub address: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// `host:port` of the coordinator; `None` runs the node standalone.
    pub coordinator: Option<String>,
    pub heartbeat_period: Duration,
    pub read_timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
}

impl NodeConfig {
    pub fn new(address: impl Into<String>, port: u16, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            address: address.into(),
            port,
            data_dir: data_dir.into(),
            coordinator: None,
            heartbeat_period: HEARTBEAT_PERIOD,
            read_timeout: DEFAULT_READ_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_coordinator(mut self, coordinator: impl Into<String>) -> Self {
        self.coordinator = Some(coordinator.into());
        self
    }

    /// Ring identity of the node.
    pub fn name(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Names are hashed onto the ring and split on whitespace by the wire
    /// grammar, so neither part may be blank or contain spaces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_plain_host(&self.address) {
            return Err(ConfigError::InvalidAddress(self.address.clone()));
        }
        if let Some(coordinator) = &self.coordinator
            && !is_endpoint(coordinator)
        {
            return Err(ConfigError::InvalidAddress(coordinator.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub address: String,
    pub port: u16,
    pub admin_port: Option<u16>,
    pub detection_interval: Duration,
    /// Heartbeat period the nodes are expected to use.
    pub heartbeat_period: Duration,
    pub read_timeout: Duration,
}

impl CoordinatorConfig {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            admin_port: None,
            detection_interval: DETECTION_INTERVAL,
            heartbeat_period: HEARTBEAT_PERIOD,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_plain_host(&self.address) {
            return Err(ConfigError::InvalidAddress(self.address.clone()));
        }
        let detection_ms = self.detection_interval.as_millis() as u64;
        let heartbeat_ms = self.heartbeat_period.as_millis() as u64;
        if detection_ms * 2 < heartbeat_ms * 3 {
            return Err(ConfigError::DetectionTooShort {
                detection_ms,
                heartbeat_ms,
            });
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

fn is_plain_host(host: &str) -> bool {
    !host.is_empty() && !host.chars().any(char::is_whitespace)
}

/// `host:port` with a numeric port.
fn is_endpoint(addr: &str) -> bool {
    match addr.rsplit_once(':') {
        Some((host, port)) => is_plain_host(host) && port.parse::<u16>().is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_coordinator_timing_is_valid() {
        let config = CoordinatorConfig::new("localhost", 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_detection_must_outlast_heartbeats() {
        let mut config = CoordinatorConfig::new("localhost", 5000);
        config.heartbeat_period = Duration::from_millis(1000);
        config.detection_interval = Duration::from_millis(1400);

        assert_eq!(
            config.validate(),
            Err(ConfigError::DetectionTooShort {
                detection_ms: 1400,
                heartbeat_ms: 1000
            })
        );

        config.detection_interval = Duration::from_millis(1500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let policy = RetryPolicy::default();

        let first = policy.delay_for(0);
        let late = policy.delay_for(30);

        assert!(first >= Duration::from_millis(150) && first < Duration::from_millis(200));
        assert!(late >= Duration::from_millis(1200) && late < Duration::from_millis(1250));
    }

    #[test]
    fn test_node_name() {
        let config = NodeConfig::new("localhost", 6750, "/tmp/node");
        assert_eq!(config.name(), "localhost:6750");
        assert!(config.coordinator.is_none());
    }

    #[test]
    fn test_node_addresses_are_validated() {
        let config = NodeConfig::new("localhost", 6750, "/tmp/node");
        assert!(config.validate().is_ok());
        assert!(config.clone().with_coordinator("[::1]:5000").validate().is_ok());

        assert_eq!(
            config.clone().with_coordinator("localhost").validate(),
            Err(ConfigError::InvalidAddress("localhost".to_string()))
        );
        assert_eq!(
            NodeConfig::new("my host", 6750, "/tmp/node").validate(),
            Err(ConfigError::InvalidAddress("my host".to_string()))
        );
    }
}
