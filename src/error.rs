//! WolfElect Error Types

use thiserror::Error;

use crate::id::NodeId;

/// Result type alias for WolfElect operations
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol faults reported to observers.
///
/// None of these stop a node: each one is emitted as an error signal and the
/// node runs its own corrective action (usually a new election).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Self id collides with a supplied initial peer, or initial peers repeat
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Duplicated peer id: {0}")]
    DuplicatePeer(NodeId),

    #[error("Can't add myself to peer list: {0}")]
    SelfReference(NodeId),

    /// Lookup failure, including spoofed `victory` or `vote_inquiry` senders
    #[error("Unknown peer: {id}")]
    UnknownPeer { id: NodeId },

    /// Watchdog found neither a master nor a running election
    #[error("No master exists")]
    NoMaster,
}

impl Fault {
    /// Stable kind name used in `error(kind, detail)` signals
    pub fn kind(&self) -> &'static str {
        match self {
            Fault::Config(_) => "config",
            Fault::DuplicatePeer(_) => "duplicate_peer",
            Fault::SelfReference(_) => "self_reference",
            Fault::UnknownPeer { .. } => "unknown_peer",
            Fault::NoMaster => "no_master",
        }
    }
}

/// WolfElect error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid node id {id:?}: {reason}")]
    InvalidNodeId { id: String, reason: &'static str },

    // Protocol faults
    #[error(transparent)]
    Fault(#[from] Fault),

    #[error("Peer unreachable: {0}")]
    PeerUnreachable(NodeId),

    // Network errors
    #[error("Message serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Node has been torn down")]
    ShuttingDown,
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout(_)
                | Error::ConnectionFailed { .. }
                | Error::Network(_)
        )
    }

    /// The protocol fault carried by this error, if any
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Error::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_kinds() {
        let id = NodeId::new("99").unwrap();
        let fault = Fault::UnknownPeer { id };
        assert_eq!(fault.kind(), "unknown_peer");
        assert_eq!(fault.to_string(), "Unknown peer: 99");
        assert_eq!(Fault::NoMaster.kind(), "no_master");
    }

    #[test]
    fn test_error_wraps_fault() {
        let err: Error = Fault::NoMaster.into();
        assert_eq!(err.fault(), Some(&Fault::NoMaster));
        assert!(!err.is_retryable());
        assert!(Error::ConnectionTimeout("localhost:7700".into()).is_retryable());
    }
}
