//! WolfElect - Bully Leader Election
//!
//! Elects a single master among a set of cooperating nodes using the Bully
//! algorithm: the highest-id live node always wins a contested election,
//! and followers track the master's liveness through periodic heartbeats.
//!
//! # Architecture
//!
//! Each node is a synchronous state machine ([`state::Node`]) driven by
//! three kinds of input: peer messages, timer fires and API calls.
//! [`service::NodeHandle`] runs one on a tokio task. Nodes reach each other
//! through the [`peer::Peer`] capability, implemented in-process by
//! [`peer::LocalPeer`] and over TCP by [`network::TcpPeer`].
//!
//! # Features
//!
//! - Vote solicitation with a follow-up check on the expected winner
//! - Rejection of victory claims from lower or unregistered ids
//! - Heartbeat-based master failure detection
//! - Watchdog that re-elects a node left without a master
//! - Deterministic timers for tests, tokio timers for production
//! - In-process cluster for demos and multi-node tests

pub mod cluster;
pub mod config;
pub mod error;
pub mod id;
pub mod network;
pub mod peer;
pub mod protocol;
pub mod service;
pub mod state;
pub mod timer;

pub use config::WolfElectConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cluster::LocalCluster;
    pub use crate::config::{ElectionConfig, WolfElectConfig};
    pub use crate::error::{Error, Fault, Result};
    pub use crate::id::NodeId;
    pub use crate::peer::{local_channel, LocalPeer, Mailbox, Peer, PeerRef};
    pub use crate::protocol::Message;
    pub use crate::service::NodeHandle;
    pub use crate::state::{MasterStatus, Node, NodeEvent, NodeStatus};
    pub use crate::timer::{ManualTimers, TimerService, TokioTimers};
}
