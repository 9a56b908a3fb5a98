//! Peer Registry
//!
//! The node's view of who else is in the cluster. Ids are unique and never
//! equal to the node's own id, so a node can never end up tracking itself
//! as a remote master.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::Fault;
use crate::id::NodeId;
use crate::peer::PeerRef;

/// Known peers, keyed and ordered by id
pub struct PeerRegistry {
    /// This node's ID
    self_id: NodeId,
    /// Known peers (never includes self)
    peers: BTreeMap<NodeId, PeerRef>,
}

impl PeerRegistry {
    /// Create an empty registry for `self_id`
    pub fn new(self_id: NodeId) -> Self {
        Self {
            self_id,
            peers: BTreeMap::new(),
        }
    }

    /// Create a registry from an initial peer set.
    ///
    /// Fails with [`Fault::Config`] if a peer uses our own id or two peers
    /// share an id.
    pub fn with_peers(self_id: NodeId, peers: Vec<PeerRef>) -> Result<Self, Fault> {
        let mut registry = Self::new(self_id);
        for peer in peers {
            registry.add(peer).map_err(|fault| match fault {
                Fault::SelfReference(id) => {
                    Fault::Config(format!("Can't have same ids ({})", id))
                }
                Fault::DuplicatePeer(id) => {
                    Fault::Config(format!("Initial peers repeat id {}", id))
                }
                other => other,
            })?;
        }
        Ok(registry)
    }

    /// Get this node's ID
    pub fn self_id(&self) -> &NodeId {
        &self.self_id
    }

    /// Register a peer
    pub fn add(&mut self, peer: PeerRef) -> Result<(), Fault> {
        let id = peer.id().clone();
        if id == self.self_id {
            return Err(Fault::SelfReference(id));
        }
        if self.peers.contains_key(&id) {
            return Err(Fault::DuplicatePeer(id));
        }
        self.peers.insert(id, peer);
        Ok(())
    }

    /// Deregister a peer, returning it if it was known
    pub fn remove(&mut self, id: &NodeId) -> Option<PeerRef> {
        self.peers.remove(id)
    }

    /// Look up a peer
    pub fn lookup(&self, id: &NodeId) -> Result<&PeerRef, Fault> {
        self.peers
            .get(id)
            .ok_or_else(|| Fault::UnknownPeer { id: id.clone() })
    }

    /// Check if a peer is registered
    pub fn contains(&self, id: &NodeId) -> bool {
        self.peers.contains_key(id)
    }

    /// Ordered ids of all peers plus self
    pub fn ids(&self) -> BTreeSet<NodeId> {
        let mut ids: BTreeSet<NodeId> = self.peers.keys().cloned().collect();
        ids.insert(self.self_id.clone());
        ids
    }

    /// All peers in id order
    pub fn peers(&self) -> impl Iterator<Item = &PeerRef> {
        self.peers.values()
    }

    /// Peers whose id is greater than `id`, in id order
    pub fn higher_than<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a PeerRef> + 'a {
        self.peers
            .iter()
            .filter(move |(peer_id, _)| *peer_id > id)
            .map(|(_, peer)| peer)
    }

    /// Number of peers (excluding self)
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
