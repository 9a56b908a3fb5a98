//! Node Service
//!
//! Runs a [`Node`] as a single tokio task. The task owns the node outright
//! and handles one input at a time: an inbound message, a timer fire or an
//! API command. [`NodeHandle`] is the cloneable async front door to it.

use std::collections::BTreeSet;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::ElectionConfig;
use crate::error::{Error, Result};
use crate::id::NodeId;
use crate::peer::{Mailbox, PeerRef};
use crate::state::{Node, NodeEvent, NodeStatus};
use crate::timer::{TimerFired, TokioTimers};

/// Pending API commands per node
const COMMAND_CAPACITY: usize = 64;

/// API request to the node task
enum NodeCommand {
    AddPeer {
        peer: PeerRef,
        response_tx: oneshot::Sender<Result<()>>,
    },
    RemovePeer {
        id: NodeId,
        response_tx: oneshot::Sender<()>,
    },
    GetPeer {
        id: NodeId,
        response_tx: oneshot::Sender<Result<PeerRef>>,
    },
    PeerIds {
        response_tx: oneshot::Sender<BTreeSet<NodeId>>,
    },
    StepDown {
        response_tx: oneshot::Sender<()>,
    },
    Status {
        response_tx: oneshot::Sender<NodeStatus>,
    },
    Subscribe {
        response_tx: oneshot::Sender<Option<broadcast::Receiver<NodeEvent>>>,
    },
    Teardown {
        response_tx: oneshot::Sender<()>,
    },
}

/// Handle to a running node.
///
/// Once every handle is dropped the node tears itself down.
#[derive(Clone)]
pub struct NodeHandle {
    id: NodeId,
    commands: mpsc::Sender<NodeCommand>,
}

impl NodeHandle {
    /// Build a node around `mailbox` and start it on the current runtime.
    ///
    /// The node takes the mailbox's id. Must be called from within a tokio
    /// runtime.
    pub fn spawn(mailbox: Mailbox, peers: Vec<PeerRef>, config: ElectionConfig) -> Result<Self> {
        let id = mailbox.id().clone();
        let (timers, fired) = TokioTimers::new();
        let node = Node::new(id.clone(), peers, config, timers)?;
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);

        tokio::spawn(run_node(node, mailbox, fired, command_rx));
        tracing::debug!("{}: node task started", id);

        Ok(Self { id, commands })
    }

    /// Get this node's ID
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Check if the node task is still running
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Register a peer; the node re-elects
    pub async fn add_peer(&self, peer: PeerRef) -> Result<()> {
        self.request(|response_tx| NodeCommand::AddPeer { peer, response_tx })
            .await?
    }

    /// Deregister a peer; the node re-elects if it was known
    pub async fn remove_peer(&self, id: NodeId) -> Result<()> {
        self.request(|response_tx| NodeCommand::RemovePeer { id, response_tx })
            .await
    }

    /// Look up a peer
    pub async fn get_peer(&self, id: NodeId) -> Result<PeerRef> {
        self.request(|response_tx| NodeCommand::GetPeer { id, response_tx })
            .await?
    }

    /// Ordered ids of all peers plus self
    pub async fn peer_ids(&self) -> Result<BTreeSet<NodeId>> {
        self.request(|response_tx| NodeCommand::PeerIds { response_tx })
            .await
    }

    /// Give up the master role if held
    pub async fn step_down(&self) -> Result<()> {
        self.request(|response_tx| NodeCommand::StepDown { response_tx })
            .await
    }

    /// Snapshot of the node's state
    pub async fn status(&self) -> Result<NodeStatus> {
        self.request(|response_tx| NodeCommand::Status { response_tx })
            .await
    }

    /// Subscribe to the node's signals
    pub async fn subscribe(&self) -> Result<broadcast::Receiver<NodeEvent>> {
        self.request(|response_tx| NodeCommand::Subscribe { response_tx })
            .await?
            .ok_or(Error::ShuttingDown)
    }

    /// Tear the node down. Idempotent.
    pub async fn teardown(&self) -> Result<()> {
        match self
            .request(|response_tx| NodeCommand::Teardown { response_tx })
            .await
        {
            Ok(()) | Err(Error::ShuttingDown) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> NodeCommand,
    ) -> Result<R> {
        let (response_tx, response_rx) = oneshot::channel();
        self.commands
            .send(command(response_tx))
            .await
            .map_err(|_| Error::ShuttingDown)?;
        response_rx.await.map_err(|_| Error::ShuttingDown)
    }
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("id", &self.id)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Node task main loop
async fn run_node(
    mut node: Node<TokioTimers>,
    mut mailbox: Mailbox,
    mut fired: mpsc::UnboundedReceiver<TimerFired>,
    mut commands: mpsc::Receiver<NodeCommand>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(NodeCommand::Teardown { response_tx }) => {
                        node.teardown();
                        commands.close();
                        let _ = response_tx.send(());
                        break;
                    }
                    Some(command) => handle_command(&mut node, command),
                    None => {
                        tracing::debug!("{}: all handles dropped", node.id());
                        node.teardown();
                        break;
                    }
                }
            }
            Some(message) = mailbox.recv() => {
                node.handle_message(message);
            }
            Some(timer) = fired.recv() => {
                node.handle_timer(timer);
            }
        }
    }
}

fn handle_command(node: &mut Node<TokioTimers>, command: NodeCommand) {
    match command {
        NodeCommand::AddPeer { peer, response_tx } => {
            let _ = response_tx.send(node.add_peer(peer));
        }
        NodeCommand::RemovePeer { id, response_tx } => {
            node.remove_peer(&id);
            let _ = response_tx.send(());
        }
        NodeCommand::GetPeer { id, response_tx } => {
            let _ = response_tx.send(node.get_peer(&id));
        }
        NodeCommand::PeerIds { response_tx } => {
            let _ = response_tx.send(node.peer_ids());
        }
        NodeCommand::StepDown { response_tx } => {
            node.step_down();
            let _ = response_tx.send(());
        }
        NodeCommand::Status { response_tx } => {
            let _ = response_tx.send(node.status());
        }
        NodeCommand::Subscribe { response_tx } => {
            let _ = response_tx.send(node.subscribe());
        }
        NodeCommand::Teardown { response_tx } => {
            node.teardown();
            let _ = response_tx.send(());
        }
    }
}
