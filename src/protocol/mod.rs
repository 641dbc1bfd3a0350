//! Wire Protocol
//!
//! Line-oriented text protocol spoken between clients, storage nodes and the
//! coordinator.
//!
//! ## Core Concepts
//! - **Framing**: every message ends with `\n\r`; receivers read up to `\r` and keep
//!   only printable ASCII.
//! - **Grammar**: `STATUS[ KEY[ VALUE]]`; values may contain spaces.
//! - **Connections**: `NodeConnection` for request/response round trips,
//!   `spawn_writer` for sockets shared by several producers.

pub mod codec;
pub mod connection;
pub mod message;

pub use codec::{FRAME_TERMINATOR, FrameReader, MAX_FRAME_BYTES, write_message};
pub use connection::{NodeConnection, deliver_once, open_stream, spawn_writer};
pub use message::{KvMessage, StatusType};

#[cfg(test)]
mod tests;
