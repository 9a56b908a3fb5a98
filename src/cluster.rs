//! Local Cluster
//!
//! Runs a whole election cluster inside one process, every node wired to
//! every other over in-process channels. Used by `wolfelect simulate` and by
//! the multi-node tests.

use std::collections::BTreeMap;

use crate::config::ElectionConfig;
use crate::error::{Fault, Result};
use crate::id::NodeId;
use crate::peer::{local_channel, LocalPeer, Mailbox, PeerRef};
use crate::service::NodeHandle;
use crate::state::NodeStatus;

/// A fully connected set of in-process nodes
pub struct LocalCluster {
    config: ElectionConfig,
    /// Inbound endpoint of every node ever started, destroyed ones included
    endpoints: BTreeMap<NodeId, LocalPeer>,
    /// Running nodes
    handles: BTreeMap<NodeId, NodeHandle>,
}

impl LocalCluster {
    /// Start one node per id. Must be called from within a tokio runtime.
    pub fn start(ids: impl IntoIterator<Item = NodeId>, config: ElectionConfig) -> Result<Self> {
        let mut endpoints = BTreeMap::new();
        let mut mailboxes: Vec<Mailbox> = Vec::new();
        for id in ids {
            if endpoints.contains_key(&id) {
                return Err(Fault::Config(format!("Initial peers repeat id {}", id)).into());
            }
            let (endpoint, mailbox) = local_channel(id.clone());
            endpoints.insert(id, endpoint);
            mailboxes.push(mailbox);
        }

        let mut cluster = Self {
            config,
            endpoints,
            handles: BTreeMap::new(),
        };
        for mailbox in mailboxes {
            let id = mailbox.id().clone();
            let handle = NodeHandle::spawn(mailbox, cluster.peers_of(&id), config)?;
            cluster.handles.insert(id, handle);
        }

        tracing::info!("Started local cluster of {} nodes", cluster.handles.len());
        Ok(cluster)
    }

    /// Start a new node and register it with every running member
    pub async fn join(&mut self, id: NodeId) -> Result<NodeHandle> {
        if self.endpoints.contains_key(&id) {
            return Err(Fault::DuplicatePeer(id).into());
        }
        let (endpoint, mailbox) = local_channel(id.clone());

        for handle in self.handles.values() {
            handle.add_peer(endpoint.clone().into_ref()).await?;
        }

        let handle = NodeHandle::spawn(mailbox, self.peers_of(&id), self.config)?;
        self.endpoints.insert(id.clone(), endpoint);
        self.handles.insert(id.clone(), handle.clone());

        tracing::info!("Node {} joined the cluster", id);
        Ok(handle)
    }

    /// Tear a node down. The other members keep it registered, as they
    /// would a crashed peer.
    pub async fn destroy(&mut self, id: &NodeId) -> Result<()> {
        let handle = self
            .handles
            .remove(id)
            .ok_or_else(|| Fault::UnknownPeer { id: id.clone() })?;
        handle.teardown().await?;

        tracing::info!("Node {} destroyed", id);
        Ok(())
    }

    /// Get a running node
    pub fn handle(&self, id: &NodeId) -> Option<&NodeHandle> {
        self.handles.get(id)
    }

    /// Raw inbound endpoint of a node, for injecting messages
    pub fn endpoint(&self, id: &NodeId) -> Option<LocalPeer> {
        self.endpoints.get(id).cloned()
    }

    /// Ids of the running nodes
    pub fn ids(&self) -> Vec<NodeId> {
        self.handles.keys().cloned().collect()
    }

    /// Status of every running node, in id order
    pub async fn statuses(&self) -> Result<Vec<NodeStatus>> {
        let mut statuses = Vec::with_capacity(self.handles.len());
        for handle in self.handles.values() {
            statuses.push(handle.status().await?);
        }
        Ok(statuses)
    }

    /// Tear down every running node
    pub async fn shutdown(mut self) -> Result<()> {
        for (_, handle) in std::mem::take(&mut self.handles) {
            handle.teardown().await?;
        }
        Ok(())
    }

    fn peers_of(&self, id: &NodeId) -> Vec<PeerRef> {
        self.endpoints
            .iter()
            .filter(|(peer_id, _)| *peer_id != id)
            .map(|(_, endpoint)| endpoint.clone().into_ref())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::Peer;
    use crate::protocol::Message;
    use crate::state::{MasterStatus, NodeEvent};
    use std::time::Duration;
    use tokio::time::{timeout, Instant};

    const TIMEOUT_MS: u64 = 500;

    fn id(s: &str) -> NodeId {
        NodeId::new(s).unwrap()
    }

    fn ten_nodes() -> Vec<NodeId> {
        (0..10).map(|i| id(&format!("0{}", i))).collect()
    }

    fn config() -> ElectionConfig {
        ElectionConfig::new(Duration::from_millis(TIMEOUT_MS))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(TIMEOUT_MS * 6)).await;
    }

    async fn assert_converged(cluster: &LocalCluster, master: &NodeId) {
        for status in cluster.statuses().await.unwrap() {
            if &status.id == master {
                assert_eq!(status.master, MasterStatus::Master, "{} should be master", status.id);
            } else {
                assert_eq!(
                    status.master,
                    MasterStatus::Following(master.clone()),
                    "{} should follow {}",
                    status.id,
                    master
                );
            }
            assert!(!status.election_in_progress);
        }
    }

    async fn next_event(events: &mut tokio::sync::broadcast::Receiver<NodeEvent>) -> NodeEvent {
        timeout(Duration::from_secs(30), events.recv())
            .await
            .expect("no event within 30s")
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_highest_node_wins() {
        let cluster = LocalCluster::start(ten_nodes(), config()).unwrap();
        let mut events = cluster.handle(&id("09")).unwrap().subscribe().await.unwrap();

        assert_eq!(next_event(&mut events).await, NodeEvent::BecameMaster);
        settle().await;
        assert_converged(&cluster, &id("09")).await;

        cluster.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_highest_takes_over_after_master_dies() {
        let mut cluster = LocalCluster::start(ten_nodes(), config()).unwrap();
        settle().await;
        assert_converged(&cluster, &id("09")).await;

        let mut events = cluster.handle(&id("08")).unwrap().subscribe().await.unwrap();
        let killed_at = Instant::now();
        cluster.destroy(&id("09")).await.unwrap();

        assert_eq!(next_event(&mut events).await, NodeEvent::BecameMaster);
        // Detection takes at most two liveness ticks, then one round
        let bound = config().heartbeat_interval * 2 + config().election_timeout * 2;
        assert!(killed_at.elapsed() <= bound);

        settle().await;
        assert_converged(&cluster, &id("08")).await;
        assert!(cluster.handle(&id("09")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_highest_node_takes_over() {
        let mut cluster = LocalCluster::start(ten_nodes(), config()).unwrap();
        settle().await;
        cluster.destroy(&id("09")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_converged(&cluster, &id("08")).await;

        let mut old_master = cluster.handle(&id("08")).unwrap().subscribe().await.unwrap();
        let newcomer = cluster.join(id("10")).await.unwrap();
        let mut new_master = newcomer.subscribe().await.unwrap();

        assert_eq!(next_event(&mut new_master).await, NodeEvent::BecameMaster);
        assert_eq!(next_event(&mut old_master).await, NodeEvent::SteppedDown);

        settle().await;
        assert_converged(&cluster, &id("10")).await;

        // Everyone, the newcomer included, knows all eleven ids
        let ids = newcomer.peer_ids().await.unwrap();
        assert_eq!(ids.len(), 11);
        assert!(cluster.join(id("10")).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_forged_victory_is_ignored() {
        let cluster = LocalCluster::start(ten_nodes(), config()).unwrap();
        settle().await;

        let target = cluster.handle(&id("03")).unwrap();
        let mut events = target.subscribe().await.unwrap();
        cluster
            .endpoint(&id("03"))
            .unwrap()
            .send(Message::Victory { id: id("99") })
            .unwrap();

        assert_eq!(
            next_event(&mut events).await,
            NodeEvent::Fault(Fault::UnknownPeer { id: id("99") })
        );
        let status = target.status().await.unwrap();
        assert_eq!(status.master, MasterStatus::Following(id("09")));

        settle().await;
        assert_converged(&cluster, &id("09")).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_unknown_node() {
        let mut cluster = LocalCluster::start(vec![id("a"), id("b")], config()).unwrap();
        let err = cluster.destroy(&id("zz")).await.unwrap_err();
        assert_eq!(err.fault(), Some(&Fault::UnknownPeer { id: id("zz") }));
        assert_eq!(cluster.ids(), vec![id("a"), id("b")]);
    }

    #[test]
    fn test_duplicate_initial_ids_rejected() {
        let result = LocalCluster::start(vec![id("a"), id("a")], config());
        assert!(matches!(result, Err(crate::Error::Fault(Fault::Config(_)))));
    }
}
