//! Network Server
//!
//! TCP listener feeding every received frame into a node's inbound endpoint.

use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use super::read_message;
use crate::error::{Error, Result};
use crate::peer::{LocalPeer, Peer};

/// Network server for election traffic
pub struct NetworkServer {
    /// Bound listener
    listener: TcpListener,
    /// Where decoded messages go
    inbound: LocalPeer,
    /// Shutdown signal
    shutdown: watch::Sender<bool>,
}

impl NetworkServer {
    /// Bind the listener
    pub async fn bind(bind_address: &str, inbound: LocalPeer) -> Result<Self> {
        let listener = TcpListener::bind(bind_address).await?;
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            listener,
            inbound,
            shutdown,
        })
    }

    /// Get the bound address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until stopped
    pub async fn start(&self) -> Result<()> {
        tracing::info!("Network server listening on {}", self.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let peer_addr = addr.to_string();
                            let inbound = self.inbound.clone();

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(socket, &peer_addr, inbound).await {
                                    tracing::warn!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Network server stopped");
        Ok(())
    }

    /// Stop the server
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Forward frames from one connection until it closes
async fn handle_connection(socket: TcpStream, peer_addr: &str, inbound: LocalPeer) -> Result<()> {
    let (mut reader, _writer) = socket.into_split();

    loop {
        match read_message(&mut reader).await {
            Ok(message) => {
                tracing::trace!("Received {} from {}", message.type_name(), peer_addr);
                if inbound.send(message).is_err() {
                    // Node is gone
                    break;
                }
            }
            Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // Connection closed
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::NodeId;
    use crate::peer::local_channel;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_server_bind_and_stop() {
        let (inbound, _mailbox) = local_channel(NodeId::new("01").unwrap());
        let server = Arc::new(NetworkServer::bind("127.0.0.1:0", inbound).await.unwrap());
        assert_ne!(server.local_addr().unwrap().port(), 0);

        let running = server.clone();
        let task = tokio::spawn(async move { running.start().await });
        tokio::task::yield_now().await;
        server.stop();

        assert!(task.await.unwrap().is_ok());
    }
}
