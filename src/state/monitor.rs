//! Master Monitor
//!
//! Tracks which node is master, validates victory claims and detects a dead
//! master from missing heartbeats.

use std::time::Instant;

use super::node::{MasterStatus, Node};
use crate::id::NodeId;
use crate::peer::PeerRef;
use crate::timer::{TimerId, TimerKind, TimerService};

/// The believed master.
///
/// `Leader` and `Following` are mutually exclusive, and `Following` can only
/// hold a registered peer, never this node.
pub(crate) enum MasterState {
    Unknown,
    /// This node is master
    Leader {
        /// Ping broadcast timer
        heartbeat: TimerId,
    },
    /// A peer is master
    Following {
        master: PeerRef,
        last_seen: Instant,
        /// Liveness check timer
        liveness: TimerId,
    },
}

impl MasterState {
    pub(crate) fn status(&self) -> MasterStatus {
        match self {
            MasterState::Unknown => MasterStatus::Unknown,
            MasterState::Leader { .. } => MasterStatus::Master,
            MasterState::Following { master, .. } => MasterStatus::Following(master.id().clone()),
        }
    }

    /// Id of the tracked master peer
    pub(crate) fn following_id(&self) -> Option<&NodeId> {
        match self {
            MasterState::Following { master, .. } => Some(master.id()),
            _ => None,
        }
    }

    pub(crate) fn is_leader(&self) -> bool {
        matches!(self, MasterState::Leader { .. })
    }

    /// Check if any master is known
    pub(crate) fn is_known(&self) -> bool {
        !matches!(self, MasterState::Unknown)
    }
}

impl<T: TimerService> Node<T> {
    /// Validate a victory claim and follow the claimant if it holds up
    pub(super) fn handle_victory(&mut self, claimant: NodeId) {
        if claimant < self.id {
            tracing::debug!("{}: new master has smaller id {}", self.id, claimant);
            self.trigger_election();
            return;
        }

        match self.lookup(&claimant) {
            Some(peer) => self.follow_master(peer),
            None => {
                tracing::debug!("{}: rejected victory from unknown peer {}", self.id, claimant);
                self.trigger_election();
            }
        }
    }

    fn follow_master(&mut self, peer: PeerRef) {
        self.step_down();
        self.forget_master();

        let liveness = self
            .timers
            .schedule_repeating(TimerKind::MasterLiveness, self.config.heartbeat_interval);
        tracing::info!("{}: new master {}", self.id, peer.id());
        self.master = MasterState::Following {
            master: peer,
            last_seen: self.timers.now(),
            liveness,
        };
    }

    /// Record a heartbeat
    pub(super) fn handle_ping(&mut self, sender: &NodeId) {
        let now = self.timers.now();
        if let MasterState::Following { master, last_seen, .. } = &mut self.master {
            if master.id() == sender {
                *last_seen = now;
                return;
            }
        }
        tracing::debug!("{}: received ping from non master peer {}", self.id, sender);
        self.trigger_election();
    }

    /// Declare the tracked master dead if it has been silent too long
    pub(super) fn check_master_liveness(&mut self, timer: TimerId) {
        let MasterState::Following {
            master,
            last_seen,
            liveness,
        } = &self.master
        else {
            return;
        };
        if *liveness != timer {
            return;
        }

        let elapsed = self.timers.now().saturating_duration_since(*last_seen);
        if elapsed > self.config.liveness_deadline() {
            tracing::warn!(
                "{}: master ping timeout {}: {}ms",
                self.id,
                master.id(),
                elapsed.as_millis()
            );
            self.forget_master();
            self.trigger_election();
        }
    }

    /// Stop tracking a master peer
    pub(super) fn forget_master(&mut self) {
        if let MasterState::Following { liveness, .. } = &self.master {
            self.timers.cancel(*liveness);
            self.master = MasterState::Unknown;
        }
    }
}
