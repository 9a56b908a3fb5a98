//! Leadership
//!
//! This node's own master role: taking it, giving it up, and pinging every
//! peer while holding it.

use super::monitor::MasterState;
use super::node::{Node, NodeEvent};
use crate::protocol::Message;
use crate::timer::{TimerId, TimerKind, TimerService};

impl<T: TimerService> Node<T> {
    /// Become master and start broadcasting heartbeats. No-op if already
    /// master.
    pub(super) fn assume_master(&mut self) {
        if self.master.is_leader() {
            return;
        }
        self.forget_master();

        let heartbeat = self
            .timers
            .schedule_repeating(TimerKind::Heartbeat, self.config.heartbeat_interval);
        self.master = MasterState::Leader { heartbeat };

        tracing::info!("{}: became master", self.id);
        self.emit(NodeEvent::BecameMaster);
    }

    /// Give up the master role. Does nothing unless this node is master.
    pub fn step_down(&mut self) {
        let MasterState::Leader { heartbeat } = self.master else {
            return;
        };
        self.timers.cancel(heartbeat);
        self.master = MasterState::Unknown;

        tracing::info!("{}: stepped down", self.id);
        self.emit(NodeEvent::SteppedDown);
    }

    pub(super) fn broadcast_heartbeat(&mut self, timer: TimerId) {
        match self.master {
            MasterState::Leader { heartbeat } if heartbeat == timer => {
                self.broadcast(Message::Ping { id: self.id.clone() });
            }
            _ => tracing::trace!("{}: stale heartbeat timer", self.id),
        }
    }
}
