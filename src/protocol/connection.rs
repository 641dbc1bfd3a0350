use std::time::Duration;

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use super::codec::{FrameReader, write_message};
use super::message::KvMessage;
use crate::error::ProtocolError;

/// Request/response connection to a storage node.
pub struct NodeConnection {
    addr: String,
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl NodeConnection {
    pub async fn connect(
        addr: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, ProtocolError> {
        let stream = open_stream(addr, connect_timeout).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            addr: addr.to_string(),
            reader: FrameReader::new(read_half, read_timeout),
            writer: write_half,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn send(&mut self, msg: &KvMessage) -> Result<(), ProtocolError> {
        write_message(&mut self.writer, msg).await
    }

    pub async fn request(&mut self, msg: &KvMessage) -> Result<KvMessage, ProtocolError> {
        self.send(msg).await?;
        self.reader.next_response().await
    }
}

pub async fn open_stream(addr: &str, connect_timeout: Duration) -> Result<TcpStream, ProtocolError> {
    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| ProtocolError::Connect {
            addr: addr.to_string(),
            reason: "connect timed out".to_string(),
        })?
        .map_err(|e| ProtocolError::Connect {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Opens a fresh connection, writes one message and hangs up.
pub async fn deliver_once(
    addr: &str,
    msg: &KvMessage,
    connect_timeout: Duration,
) -> Result<(), ProtocolError> {
    let mut stream = open_stream(addr, connect_timeout).await?;
    write_message(&mut stream, msg).await
}

/// Owns the write half of a shared socket. Messages queued on the returned
/// sender are written in order; the task drains and exits once every sender
/// is dropped or a write fails.
pub fn spawn_writer(mut write_half: OwnedWriteHalf, peer: String) -> mpsc::UnboundedSender<KvMessage> {
    let (tx, mut rx) = mpsc::unbounded_channel::<KvMessage>();

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write_message(&mut write_half, &msg).await {
                tracing::warn!("Failed to write to {}: {}", peer, e);
                break;
            }
        }
        tracing::debug!("Writer for {} finished", peer);
    });

    tx
}
