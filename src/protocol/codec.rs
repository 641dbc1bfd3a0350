use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::message::KvMessage;
use crate::error::ProtocolError;

pub const MAX_FRAME_BYTES: usize = 128 * 1024;
pub const FRAME_TERMINATOR: &[u8] = b"\n\r";

/// Reads `\r`-terminated frames, dropping everything outside printable ASCII.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    read_timeout: Duration,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, read_timeout: Duration) -> Self {
        Self {
            inner: BufReader::new(inner),
            read_timeout,
        }
    }

    /// Server-side read: idles until the peer starts a frame, then the frame
    /// must complete within the read timeout. `None` on clean EOF.
    pub async fn next_request(&mut self) -> Result<Option<KvMessage>, ProtocolError> {
        let available = self.inner.fill_buf().await?;
        if available.is_empty() {
            return Ok(None);
        }
        self.read_frame().await
    }

    /// Client-side read: the whole response must arrive within the timeout.
    pub async fn next_response(&mut self) -> Result<KvMessage, ProtocolError> {
        self.read_frame()
            .await?
            .ok_or(ProtocolError::ConnectionClosed)
    }

    async fn read_frame(&mut self) -> Result<Option<KvMessage>, ProtocolError> {
        let mut buf = Vec::new();
        let limit = MAX_FRAME_BYTES as u64 + 1;

        let read = tokio::time::timeout(
            self.read_timeout,
            (&mut self.inner).take(limit).read_until(b'\r', &mut buf),
        )
        .await
        .map_err(|_| ProtocolError::Timeout)??;

        if read == 0 {
            return Ok(None);
        }

        if buf.last() != Some(&b'\r') {
            if buf.len() > MAX_FRAME_BYTES {
                return Err(ProtocolError::FrameTooLarge(MAX_FRAME_BYTES));
            }
            return Err(ProtocolError::ConnectionClosed);
        }

        let text: String = buf
            .iter()
            .filter(|b| (32..=126).contains(*b))
            .map(|b| *b as char)
            .collect();

        Ok(Some(KvMessage::parse(&text)))
    }
}

pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &KvMessage,
) -> Result<(), ProtocolError> {
    let mut bytes = msg.to_string().into_bytes();
    bytes.extend_from_slice(FRAME_TERMINATOR);

    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
