//! Election Node
//!
//! The per-node state machine. Every input (a peer message, a timer fire, an
//! API call) is handled to completion before the next one, so the registry,
//! the master cell and the vote tally need no locking.
//!
//! The protocol steps live next to their state: `election.rs` (vote
//! solicitation), `monitor.rs` (victory claims and master liveness),
//! `leadership.rs` (own master role) and `watchdog.rs`.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::election::Election;
use super::monitor::MasterState;
use super::registry::PeerRegistry;
use crate::config::ElectionConfig;
use crate::error::{Fault, Result};
use crate::id::NodeId;
use crate::peer::PeerRef;
use crate::protocol::{Message, MessageKind};
use crate::timer::{ManualTimers, TimerFired, TimerId, TimerKind, TimerService};

/// Buffered signals per subscriber
const EVENT_CAPACITY: usize = 256;

/// Signals emitted to external observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// This node became master
    BecameMaster,
    /// This node stopped being master
    SteppedDown,
    /// Non-fatal protocol fault
    Fault(Fault),
}

impl NodeEvent {
    /// Signal name
    pub fn name(&self) -> &'static str {
        match self {
            NodeEvent::BecameMaster => "master",
            NodeEvent::SteppedDown => "stepped_down",
            NodeEvent::Fault(_) => "error",
        }
    }
}

/// Who this node believes is master
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasterStatus {
    Unknown,
    Master,
    Following(NodeId),
}

impl std::fmt::Display for MasterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MasterStatus::Unknown => write!(f, "UNKNOWN"),
            MasterStatus::Master => write!(f, "MASTER"),
            MasterStatus::Following(id) => write!(f, "FOLLOWING {}", id),
        }
    }
}

/// Point-in-time view of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: NodeId,
    pub master: MasterStatus,
    pub election_in_progress: bool,
    pub peers: Vec<NodeId>,
}

/// Bully election participant
pub struct Node<T: TimerService> {
    /// This node's ID
    pub(super) id: NodeId,
    /// Election timing
    pub(super) config: ElectionConfig,
    /// Known peers
    pub(super) registry: PeerRegistry,
    /// Timer service
    pub(super) timers: T,
    /// Believed master
    pub(super) master: MasterState,
    /// Current election round and follow-up
    pub(super) election: Election,
    /// Message kinds currently accepted
    pub(super) subscriptions: HashSet<MessageKind>,
    /// Pending first election
    startup: Option<TimerId>,
    /// Watchdog timer
    pub(super) watchdog: Option<TimerId>,
    /// Observer channel, dropped on teardown
    events: Option<broadcast::Sender<NodeEvent>>,
    pub(super) torn_down: bool,
}

impl<T: TimerService> Node<T> {
    /// Create a node and schedule its first election.
    ///
    /// Fails with [`Fault::Config`] if `id` appears among `peers` or two
    /// peers share an id.
    pub fn new(id: NodeId, peers: Vec<PeerRef>, config: ElectionConfig, timers: T) -> Result<Self> {
        config.validate()?;
        let registry = PeerRegistry::with_peers(id.clone(), peers)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let mut node = Self {
            id,
            config,
            registry,
            timers,
            master: MasterState::Unknown,
            election: Election::default(),
            subscriptions: [MessageKind::VoteInquiry, MessageKind::Victory, MessageKind::Ping]
                .into_iter()
                .collect(),
            startup: None,
            watchdog: None,
            events: Some(events),
            torn_down: false,
        };

        tracing::debug!("{}: initializing, known peers {:?}", node.id, node.peer_list());

        if node.config.startup_delay.is_zero() {
            node.start();
        } else {
            let delay = node.config.startup_delay;
            node.startup = Some(node.timers.schedule_once(TimerKind::Startup, delay));
        }
        Ok(node)
    }

    fn start(&mut self) {
        tracing::debug!("{}: time to elect new master", self.id);
        self.trigger_election();
        self.start_watchdog();
    }

    /// Get this node's ID
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Get the election timing
    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// Subscribe to signals. Returns `None` after teardown.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<NodeEvent>> {
        self.events.as_ref().map(|events| events.subscribe())
    }

    /// Who this node believes is master
    pub fn master(&self) -> MasterStatus {
        self.master.status()
    }

    /// Check if this node is master
    pub fn is_master(&self) -> bool {
        self.master.is_leader()
    }

    /// Check if an election round is open
    pub fn election_in_progress(&self) -> bool {
        self.election.in_progress()
    }

    /// Check if the node has been torn down
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Snapshot of the node's state
    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            id: self.id.clone(),
            master: self.master(),
            election_in_progress: self.election_in_progress(),
            peers: self.peer_list(),
        }
    }

    fn peer_list(&self) -> Vec<NodeId> {
        self.registry.peers().map(|p| p.id().clone()).collect()
    }

    /// Register a peer and re-elect
    pub fn add_peer(&mut self, peer: PeerRef) -> Result<()> {
        if self.torn_down {
            return Err(crate::Error::ShuttingDown);
        }
        let id = peer.id().clone();
        if let Err(fault) = self.registry.add(peer) {
            self.report(fault.clone());
            return Err(fault.into());
        }
        tracing::debug!("{}: added new peer {}", self.id, id);
        self.trigger_election();
        Ok(())
    }

    /// Deregister a peer and re-elect. Unknown ids are ignored.
    pub fn remove_peer(&mut self, id: &NodeId) {
        if self.torn_down {
            return;
        }
        if self.master.following_id() == Some(id) {
            self.forget_master();
        }
        if self.registry.remove(id).is_some() {
            tracing::debug!("{}: removed peer {}", self.id, id);
            self.trigger_election();
        }
    }

    /// Look up a peer, reporting unknown ids
    pub fn get_peer(&self, id: &NodeId) -> Result<PeerRef> {
        match self.lookup(id) {
            Some(peer) => Ok(peer),
            None => Err(Fault::UnknownPeer { id: id.clone() }.into()),
        }
    }

    /// Ordered ids of all peers plus self
    pub fn peer_ids(&self) -> BTreeSet<NodeId> {
        self.registry.ids()
    }

    /// Stop all activity: step down, cancel every timer, drop all
    /// subscriptions and detach observers.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.step_down();
        if let Some(watchdog) = self.watchdog.take() {
            self.timers.cancel(watchdog);
        }
        if let Some(startup) = self.startup.take() {
            self.timers.cancel(startup);
        }
        self.forget_master();
        self.close_election();
        self.timers.cancel_all();
        self.subscriptions.clear();
        self.events = None;
        self.torn_down = true;
        tracing::info!("{}: torn down", self.id);
    }

    /// Handle a message addressed to this node
    pub fn handle_message(&mut self, message: Message) {
        let kind = message.kind();
        if !self.subscriptions.contains(&kind) {
            tracing::trace!(
                "{}: ignoring {} from {} (not subscribed)",
                self.id,
                kind,
                message.sender()
            );
            return;
        }

        match message {
            Message::VoteInquiry { id } => self.answer_vote_inquiry(&id),
            Message::Alive { id } => self.record_alive(&id),
            Message::Victory { id } => self.handle_victory(id),
            Message::Ping { id } => self.handle_ping(&id),
        }
    }

    /// Handle a timer expiry
    pub fn handle_timer(&mut self, fired: TimerFired) {
        if self.torn_down {
            return;
        }
        match fired.kind {
            TimerKind::Startup => {
                if self.startup != Some(fired.id) {
                    return;
                }
                self.startup = None;
                self.timers.cancel(fired.id);
                self.start();
            }
            TimerKind::ElectionRound => self.close_round(fired.id),
            TimerKind::ElectionFollowUp => self.check_follow_up(fired.id),
            TimerKind::Heartbeat => self.broadcast_heartbeat(fired.id),
            TimerKind::MasterLiveness => self.check_master_liveness(fired.id),
            TimerKind::Watchdog => self.watchdog_tick(fired.id),
        }
    }

    /// Look up a peer, reporting [`Fault::UnknownPeer`] if it is not known
    pub(super) fn lookup(&self, id: &NodeId) -> Option<PeerRef> {
        match self.registry.lookup(id) {
            Ok(peer) => Some(peer.clone()),
            Err(fault) => {
                self.report(fault);
                None
            }
        }
    }

    pub(super) fn send_to(&self, peer: &PeerRef, message: Message) {
        let name = message.type_name();
        if let Err(e) = peer.send(message) {
            tracing::debug!("{} -> {}: {} not delivered: {}", self.id, peer.id(), name, e);
        }
    }

    pub(super) fn broadcast(&self, message: Message) {
        for peer in self.registry.peers() {
            tracing::trace!("{} -> {}: {}", self.id, peer.id(), message.type_name());
            self.send_to(peer, message.clone());
        }
    }

    pub(super) fn emit(&self, event: NodeEvent) {
        if let Some(events) = &self.events {
            // No subscribers is fine
            let _ = events.send(event);
        }
    }

    pub(super) fn report(&self, fault: Fault) {
        tracing::warn!("{}: {} ({})", self.id, fault, fault.kind());
        self.emit(NodeEvent::Fault(fault));
    }
}

impl Node<ManualTimers> {
    /// Drive manual time forward, handling every timer that falls due
    pub fn advance(&mut self, by: Duration) {
        let until = self.timers.now() + by;
        while let Some(fired) = self.timers.pop_due(until) {
            self.handle_timer(fired);
        }
        self.timers.set_now(until);
    }

    /// Access the manual timer service
    pub fn timers(&self) -> &ManualTimers {
        &self.timers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::*;

    #[test]
    fn test_rejects_self_among_initial_peers() {
        let peers = vec![endpoint("04").0, endpoint("05").0];
        let result = Node::new(id("05"), peers, config(), ManualTimers::new());
        match result {
            Err(crate::Error::Fault(Fault::Config(_))) => {}
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("node accepted its own id as a peer"),
        }
    }

    #[test]
    fn test_first_election_after_startup_delay() {
        let mut cluster = TestNode::new("05", &["07"]);
        assert!(!cluster.node.election_in_progress());
        assert!(cluster.take("07").is_empty());

        cluster.node.advance(ms(500));
        assert!(cluster.node.election_in_progress());
        assert_eq!(cluster.take("07"), vec![inquiry("05")]);
        assert_eq!(cluster.node.timers().scheduled(TimerKind::Watchdog), 1);
    }

    #[test]
    fn test_zero_startup_delay_elects_immediately() {
        let node = Node::new(
            id("05"),
            Vec::new(),
            config().with_startup_delay(Duration::ZERO),
            ManualTimers::new(),
        )
        .unwrap();
        assert!(node.election_in_progress());
    }

    #[test]
    fn test_add_peer_triggers_election() {
        let mut cluster = TestNode::new("05", &[]);
        let (peer, mut mailbox) = endpoint("08");

        cluster.node.add_peer(peer).unwrap();
        assert!(cluster.node.election_in_progress());
        assert_eq!(mailbox.drain(), vec![inquiry("05")]);
    }

    #[test]
    fn test_add_peer_faults_are_reported() {
        let mut cluster = TestNode::new("05", &["07"]);
        let mut events = cluster.node.subscribe().unwrap();

        let err = cluster.node.add_peer(endpoint("07").0).unwrap_err();
        assert_eq!(err.fault(), Some(&Fault::DuplicatePeer(id("07"))));
        let err = cluster.node.add_peer(endpoint("05").0).unwrap_err();
        assert_eq!(err.fault(), Some(&Fault::SelfReference(id("05"))));

        assert_eq!(events.try_recv().unwrap(), NodeEvent::Fault(Fault::DuplicatePeer(id("07"))));
        assert_eq!(events.try_recv().unwrap(), NodeEvent::Fault(Fault::SelfReference(id("05"))));
        assert!(!cluster.node.election_in_progress());
    }

    #[test]
    fn test_get_peer_and_ids() {
        let cluster = TestNode::new("05", &["09", "01"]);
        let mut events = cluster.node.subscribe().unwrap();

        assert_eq!(cluster.node.get_peer(&id("09")).unwrap().id(), &id("09"));
        let err = cluster.node.get_peer(&id("42")).err().unwrap();
        assert_eq!(err.fault(), Some(&Fault::UnknownPeer { id: id("42") }));
        assert_eq!(
            events.try_recv().unwrap(),
            NodeEvent::Fault(Fault::UnknownPeer { id: id("42") })
        );

        let ids: Vec<NodeId> = cluster.node.peer_ids().into_iter().collect();
        assert_eq!(ids, vec![id("01"), id("05"), id("09")]);
    }

    #[test]
    fn test_remove_unknown_peer_is_noop() {
        let mut cluster = TestNode::new("05", &["07"]);
        cluster.node.remove_peer(&id("42"));
        assert!(!cluster.node.election_in_progress());

        cluster.node.remove_peer(&id("07"));
        assert!(cluster.node.election_in_progress());
        assert_eq!(cluster.node.peer_ids().len(), 1);
    }

    #[test]
    fn test_remove_tracked_master_cancels_liveness() {
        let mut cluster = TestNode::new("05", &["09"]);
        cluster.node.handle_message(victory("09"));
        assert_eq!(cluster.node.master(), MasterStatus::Following(id("09")));
        assert_eq!(cluster.node.timers().scheduled(TimerKind::MasterLiveness), 1);

        cluster.node.remove_peer(&id("09"));
        assert_eq!(cluster.node.master(), MasterStatus::Unknown);
        assert_eq!(cluster.node.timers().scheduled(TimerKind::MasterLiveness), 0);
        assert!(cluster.node.election_in_progress());
    }

    #[test]
    fn test_alive_outside_round_is_dropped() {
        let mut cluster = TestNode::new("05", &["07"]);
        cluster.node.handle_message(alive("07"));
        assert!(!cluster.node.election_in_progress());
        assert_eq!(cluster.node.master(), MasterStatus::Unknown);
    }

    #[test]
    fn test_teardown_stops_everything() {
        let mut cluster = TestNode::new("05", &["03"]);
        let mut events = cluster.node.subscribe().unwrap();

        // Become master so heartbeat, watchdog and election timers all exist
        cluster.node.advance(ms(1000));
        assert!(cluster.node.is_master());
        assert_eq!(events.try_recv().unwrap(), NodeEvent::BecameMaster);
        cluster.node.trigger_election();
        cluster.take("03");

        cluster.node.teardown();
        assert!(cluster.node.is_torn_down());
        assert_eq!(cluster.node.timers().outstanding(), 0);
        assert_eq!(events.try_recv().unwrap(), NodeEvent::SteppedDown);
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Closed)
        ));
        assert!(cluster.node.subscribe().is_none());

        cluster.node.handle_message(victory("09"));
        cluster.node.handle_message(inquiry("03"));
        cluster.node.trigger_election();
        cluster.node.advance(ms(10_000));
        assert_eq!(cluster.node.master(), MasterStatus::Unknown);
        assert!(cluster.take("03").is_empty());
    }

    #[test]
    fn test_status_snapshot() {
        let cluster = TestNode::new("05", &["07", "03"]);
        let status = cluster.node.status();
        assert_eq!(status.id, id("05"));
        assert_eq!(status.master, MasterStatus::Unknown);
        assert_eq!(status.peers, vec![id("03"), id("07")]);

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"master\":\"unknown\""));
    }
}
