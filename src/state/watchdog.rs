//! Watchdog
//!
//! Every heartbeat interval, check that the node either knows a master or is
//! electing one. A node stuck with neither (a lost victory, a dropped round)
//! reports it and starts a new election.

use super::node::Node;
use crate::error::Fault;
use crate::timer::{TimerId, TimerKind, TimerService};

impl<T: TimerService> Node<T> {
    pub(super) fn start_watchdog(&mut self) {
        if self.watchdog.is_some() {
            return;
        }
        let period = self.config.heartbeat_interval;
        self.watchdog = Some(self.timers.schedule_repeating(TimerKind::Watchdog, period));
    }

    pub(super) fn watchdog_tick(&mut self, timer: TimerId) {
        if self.watchdog != Some(timer) {
            return;
        }
        if self.master.is_known() || self.election.in_progress() {
            return;
        }
        tracing::debug!("{}: no master and no election in progress", self.id);
        self.report(Fault::NoMaster);
        self.trigger_election();
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Fault;
    use crate::state::node::{MasterStatus, NodeEvent};
    use crate::state::testing::*;
    use crate::timer::TimerKind;

    #[test]
    fn test_watchdog_recovers_masterless_node() {
        let mut cluster = TestNode::new("05", &["03"]);
        let mut events = cluster.node.subscribe().unwrap();
        cluster.node.advance(ms(1000));
        assert!(cluster.node.is_master());
        assert_eq!(events.try_recv().unwrap(), NodeEvent::BecameMaster);

        cluster.node.step_down();
        assert_eq!(events.try_recv().unwrap(), NodeEvent::SteppedDown);
        assert_eq!(cluster.node.master(), MasterStatus::Unknown);

        // Watchdog started at 500ms ticks at 2000ms
        cluster.node.advance(ms(1000));
        assert_eq!(events.try_recv().unwrap(), NodeEvent::Fault(Fault::NoMaster));
        assert!(cluster.node.election_in_progress());
    }

    #[test]
    fn test_watchdog_quiet_while_master_known() {
        let mut cluster = TestNode::new("05", &["09"]);
        let mut events = cluster.node.subscribe().unwrap();
        cluster.node.handle_message(victory("09"));
        cluster.node.advance(ms(500));
        cluster.node.handle_message(alive("09"));

        for _ in 0..5 {
            cluster.node.advance(ms(1000));
            cluster.node.handle_message(ping("09"));
        }
        assert!(events.try_recv().is_err());
        assert_eq!(cluster.node.timers().scheduled(TimerKind::Watchdog), 1);
    }
}
