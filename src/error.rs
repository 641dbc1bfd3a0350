//! Typed errors for the library layers.
//!
//! Service loops and the binary wrap these in `anyhow::Error`; the variants
//! here are what callers are expected to match on.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out waiting for a complete frame")]
    Timeout,

    #[error("Frame exceeds {0} bytes")]
    FrameTooLarge(usize),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MetadataError {
    #[error("Malformed metadata entry: {0}")]
    MalformedEntry(String),

    #[error("Invalid hex bound in entry: {0}")]
    InvalidHex(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RingError {
    #[error("Ring position {0:x} is already taken")]
    PositionCollision(u128),
}

#[derive(Error, Debug)]
pub enum RebalanceError {
    #[error("Key {key} was rejected by {target}: {response}")]
    Rejected {
        key: String,
        target: String,
        response: String,
    },

    #[error("Gave up moving key {key} to {target} after {attempts} attempts")]
    RetriesExhausted {
        key: String,
        target: String,
        attempts: usize,
    },

    #[error("Protocol failure talking to {target}: {source}")]
    Protocol {
        target: String,
        #[source]
        source: ProtocolError,
    },
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("No server is responsible for key {0}")]
    NoRoute(String),

    #[error("Request for key {key} still failing after {attempts} attempts (last status: {last})")]
    RetriesExhausted {
        key: String,
        attempts: usize,
        last: String,
    },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "Detection interval {detection_ms}ms must be at least 1.5x the heartbeat period {heartbeat_ms}ms"
    )]
    DetectionTooShort { detection_ms: u64, heartbeat_ms: u64 },

    #[error("Invalid address {0}")]
    InvalidAddress(String),
}
