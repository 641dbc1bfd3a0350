use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use crate::config::DEFAULT_READ_TIMEOUT;
use crate::error::ProtocolError;
use crate::protocol::{FrameReader, KvMessage};

/// Receives subscription pushes. Each inbound connection carries exactly one
/// message.
pub struct NotificationListener {
    addr: String,
    rx: mpsc::UnboundedReceiver<KvMessage>,
    shutdown: watch::Sender<bool>,
}

impl NotificationListener {
    /// Binds an ephemeral port on `host`. The advertised address is
    /// `host:port`, so `host` must be reachable by the storage nodes.
    pub async fn bind(host: &str) -> Result<Self, ProtocolError> {
        let listener = TcpListener::bind(format!("{}:0", host)).await?;
        let port = listener.local_addr()?.port();
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, mut stop) = watch::channel(false);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            let mut reader = FrameReader::new(stream, DEFAULT_READ_TIMEOUT);
                            match reader.next_response().await {
                                Ok(msg) => {
                                    let _ = tx.send(msg);
                                }
                                Err(e) => tracing::debug!("Dropped notification: {}", e),
                            }
                        });
                    }
                    _ = stop.changed() => break,
                }
            }
        });

        Ok(Self {
            addr: format!("{}:{}", host, port),
            rx,
            shutdown,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Next notification, or `None` if nothing arrives within `timeout`.
    pub async fn next(&mut self, timeout: Duration) -> Option<KvMessage> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }
}

impl Drop for NotificationListener {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}
