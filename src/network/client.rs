//! Network Client
//!
//! [`TcpPeer`] is the outbound side of a remote node. Sends never block the
//! caller: messages queue to a writer task that owns the connection.

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::write_message;
use crate::error::{Error, Result};
use crate::id::NodeId;
use crate::peer::{Peer, PeerRef};
use crate::protocol::Message;

/// Remote peer reached over TCP.
///
/// The writer task connects on first use and reconnects after a failed
/// write. A message that cannot be delivered is dropped; the election
/// protocol tolerates lost messages.
#[derive(Debug, Clone)]
pub struct TcpPeer {
    id: NodeId,
    address: String,
    tx: mpsc::UnboundedSender<Message>,
}

impl TcpPeer {
    /// Start the writer task for `address`. Must be called from within a
    /// tokio runtime.
    pub fn spawn(id: NodeId, address: String, connect_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(id.clone(), address.clone(), connect_timeout, rx));
        Self { id, address, tx }
    }

    /// Get the peer's address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Wrap this peer as a [`PeerRef`]
    pub fn into_ref(self) -> PeerRef {
        Arc::new(self)
    }
}

impl Peer for TcpPeer {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn send(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| Error::PeerUnreachable(self.id.clone()))
    }
}

/// Drain the queue onto a (re)connecting stream until every sender is gone
async fn run_writer(
    id: NodeId,
    address: String,
    connect_timeout: Duration,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    let mut stream: Option<TcpStream> = None;

    while let Some(message) = rx.recv().await {
        if stream.is_none() {
            match connect(&address, connect_timeout).await {
                Ok(connected) => {
                    tracing::debug!("Connected to peer {} at {}", id, address);
                    stream = Some(connected);
                }
                Err(e) => {
                    tracing::debug!("Dropping {} for {}: {}", message.type_name(), id, e);
                    continue;
                }
            }
        }

        if let Some(connected) = stream.as_mut() {
            if let Err(e) = write_message(connected, &message).await {
                tracing::debug!("Write to {} failed, reconnecting on next send: {}", id, e);
                stream = None;
            }
        }
    }

    tracing::trace!("Writer for {} stopped", id);
}

/// Connect to an address
async fn connect(address: &str, connect_timeout: Duration) -> Result<TcpStream> {
    let result = timeout(connect_timeout, TcpStream::connect(address)).await;

    match result {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        Ok(Err(e)) => Err(Error::ConnectionFailed {
            address: address.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
    }
}
