//! Peer Capability
//!
//! A node only needs two things from its environment: a way to send a typed
//! message to a peer, and a stream of messages addressed to itself. Any
//! transport can provide them; [`LocalPeer`] does it in-process and
//! [`crate::network::TcpPeer`] over TCP.

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::id::NodeId;
use crate::protocol::Message;

/// Addressable endpoint of a remote participant
pub trait Peer: Send + Sync {
    /// Stable id of the peer
    fn id(&self) -> &NodeId;

    /// Queue a message for delivery. Must not block.
    fn send(&self, message: Message) -> Result<()>;
}

/// Shared, non-owning reference to a peer
pub type PeerRef = Arc<dyn Peer>;

/// In-process endpoint that delivers into a [`Mailbox`]
#[derive(Debug, Clone)]
pub struct LocalPeer {
    id: NodeId,
    tx: mpsc::UnboundedSender<Message>,
}

impl LocalPeer {
    /// Wrap this endpoint as a [`PeerRef`]
    pub fn into_ref(self) -> PeerRef {
        Arc::new(self)
    }

    /// Check whether the receiving side is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl Peer for LocalPeer {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn send(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| Error::PeerUnreachable(self.id.clone()))
    }
}

/// Inbound side of a node: every message addressed to it
#[derive(Debug)]
pub struct Mailbox {
    id: NodeId,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Mailbox {
    /// Id of the node owning this mailbox
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Wait for the next message
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Take the next message if one is queued
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Take every queued message
    pub fn drain(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(message) = self.try_recv() {
            messages.push(message);
        }
        messages
    }
}

/// Create a connected endpoint/mailbox pair for `id`
pub fn local_channel(id: NodeId) -> (LocalPeer, Mailbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        LocalPeer { id: id.clone(), tx },
        Mailbox { id, rx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_delivery_in_order() {
        let id = NodeId::new("03").unwrap();
        let (peer, mut mailbox) = local_channel(id.clone());
        let sender = NodeId::new("01").unwrap();

        peer.send(Message::VoteInquiry { id: sender.clone() }).unwrap();
        peer.send(Message::Ping { id: sender.clone() }).unwrap();

        assert_eq!(peer.id(), &id);
        assert_eq!(
            mailbox.drain(),
            vec![
                Message::VoteInquiry { id: sender.clone() },
                Message::Ping { id: sender },
            ]
        );
        assert!(mailbox.try_recv().is_none());
    }

    #[test]
    fn test_send_to_dropped_mailbox_fails() {
        let id = NodeId::new("09").unwrap();
        let (peer, mailbox) = local_channel(id.clone());
        drop(mailbox);

        assert!(peer.is_closed());
        match peer.send(Message::Ping { id: id.clone() }) {
            Err(Error::PeerUnreachable(target)) => assert_eq!(target, id),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
