//! Election State Module
//!
//! The per-node Bully election state machine: the peer registry, vote
//! solicitation, master tracking, the node's own leadership and the
//! watchdog.

mod election;
mod leadership;
mod monitor;
mod node;
mod registry;
mod watchdog;

pub use node::{MasterStatus, Node, NodeEvent, NodeStatus};
pub use registry::PeerRegistry;
