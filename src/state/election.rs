//! Bully Election
//!
//! A candidate asks every higher-id peer whether it is alive and waits one
//! election timeout:
//!
//! - nobody higher answered (or nobody higher exists): the candidate wins,
//!   broadcasts `victory` and becomes master;
//! - somebody higher answered: the candidate waits one more timeout for the
//!   highest answering peer to claim victory, and starts over if it did not.
//!
//! Only one round is open at a time; triggering an election while a round is
//! open does nothing.

use std::collections::BTreeMap;

use super::node::Node;
use crate::id::NodeId;
use crate::protocol::{Message, MessageKind};
use crate::timer::{TimerId, TimerKind, TimerService};

/// Open vote-solicitation round
#[derive(Debug)]
struct Round {
    /// Solicited peer -> answered alive
    votes: BTreeMap<NodeId, bool>,
    timer: TimerId,
}

/// Wait for an answering peer to claim victory
#[derive(Debug)]
struct FollowUp {
    /// Highest peer that answered alive
    expected: NodeId,
    timer: TimerId,
}

/// Election coordinator state
#[derive(Debug, Default)]
pub(crate) struct Election {
    round: Option<Round>,
    follow_up: Option<FollowUp>,
}

impl Election {
    /// Check if a round is open
    pub(crate) fn in_progress(&self) -> bool {
        self.round.is_some()
    }

    /// Votes of the open round
    #[cfg(test)]
    pub(crate) fn pending_votes(&self) -> Option<&BTreeMap<NodeId, bool>> {
        self.round.as_ref().map(|round| &round.votes)
    }
}

impl<T: TimerService> Node<T> {
    /// Start an election round unless one is already open
    pub fn trigger_election(&mut self) {
        if self.torn_down {
            return;
        }
        if self.election.in_progress() {
            tracing::trace!("{}: election already in progress", self.id);
            return;
        }
        tracing::debug!("{}: elect new master", self.id);

        // A new round supersedes any pending follow-up
        if let Some(follow_up) = self.election.follow_up.take() {
            self.timers.cancel(follow_up.timer);
        }

        self.subscriptions.insert(MessageKind::Alive);

        let mut votes = BTreeMap::new();
        for peer in self.registry.higher_than(&self.id) {
            tracing::debug!("{} -> {}: vote_inquiry", self.id, peer.id());
            votes.insert(peer.id().clone(), false);
            self.send_to(peer, Message::VoteInquiry { id: self.id.clone() });
        }

        let timer = self
            .timers
            .schedule_once(TimerKind::ElectionRound, self.config.election_timeout);
        self.election.round = Some(Round { votes, timer });
    }

    /// Reply to a candidate's vote inquiry
    pub(super) fn answer_vote_inquiry(&mut self, candidate: &NodeId) {
        let Some(peer) = self.lookup(candidate) else {
            return;
        };
        tracing::debug!("{} -> {}: alive", self.id, candidate);
        self.send_to(&peer, Message::Alive { id: self.id.clone() });

        // The candidate may have missed our victory broadcast
        if self.master.is_leader() {
            tracing::debug!("{} -> {}: victory (re-asserting)", self.id, candidate);
            self.send_to(&peer, Message::Victory { id: self.id.clone() });
        }
    }

    /// Record an `alive` reply for the open round
    pub(super) fn record_alive(&mut self, replier: &NodeId) {
        let Some(round) = self.election.round.as_mut() else {
            return;
        };
        match round.votes.get_mut(replier) {
            Some(answered) => {
                tracing::debug!("{} -> {}: alive received", replier, self.id);
                *answered = true;
            }
            None => {
                tracing::trace!("{}: ignoring alive from unsolicited {}", self.id, replier);
            }
        }
    }

    /// Evaluate the open round when its timer fires
    pub(super) fn close_round(&mut self, timer: TimerId) {
        let round = match self.election.round.take() {
            Some(round) if round.timer == timer => round,
            other => {
                self.election.round = other;
                tracing::trace!("{}: stale election timer", self.id);
                return;
            }
        };
        self.timers.cancel(timer);
        self.subscriptions.remove(&MessageKind::Alive);

        // Highest peer that answered, if any
        let answered = round
            .votes
            .iter()
            .filter(|(_, alive)| **alive)
            .map(|(id, _)| id)
            .max()
            .cloned();
        tracing::debug!("{}: evaluating poll results {:?}", self.id, round.votes);

        match answered {
            None => {
                tracing::info!("{}: won election", self.id);
                self.broadcast(Message::Victory { id: self.id.clone() });
                self.assume_master();
            }
            Some(expected) => {
                tracing::debug!("{}: waiting for {} to assume power", self.id, expected);
                let timer = self
                    .timers
                    .schedule_once(TimerKind::ElectionFollowUp, self.config.election_timeout);
                self.election.follow_up = Some(FollowUp { expected, timer });
            }
        }
    }

    /// Check that the peer which answered has since claimed victory
    pub(super) fn check_follow_up(&mut self, timer: TimerId) {
        let follow_up = match self.election.follow_up.take() {
            Some(follow_up) if follow_up.timer == timer => follow_up,
            other => {
                self.election.follow_up = other;
                return;
            }
        };
        self.timers.cancel(timer);

        if self.master.following_id() == Some(&follow_up.expected) {
            tracing::debug!("{}: election resolved, master is {}", self.id, follow_up.expected);
        } else {
            tracing::debug!(
                "{}: new master {} did not assume power",
                self.id,
                follow_up.expected
            );
            self.trigger_election();
        }
    }

    /// Cancel the open round and any follow-up
    pub(super) fn close_election(&mut self) {
        if let Some(round) = self.election.round.take() {
            self.timers.cancel(round.timer);
        }
        if let Some(follow_up) = self.election.follow_up.take() {
            self.timers.cancel(follow_up.timer);
        }
        self.subscriptions.remove(&MessageKind::Alive);
    }
}
