//! Node Identifiers
//!
//! Every participant carries a unique, totally-ordered id. The highest id
//! among reachable nodes wins an election, so the ordering has to mean the
//! same thing on every node.
//!
//! Ordering is shortlex: shorter ids sort first, ids of equal length sort
//! bytewise. For decimal ids this matches numeric order whether or not they
//! are zero-padded ("9" < "10", "09" < "10").

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Validated node identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Maximum id length in bytes
    pub const MAX_LEN: usize = 64;

    /// Create a node id, validating its format
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if let Some(reason) = Self::invalid_reason(&id) {
            return Err(Error::InvalidNodeId { id, reason });
        }
        Ok(Self(id))
    }

    fn invalid_reason(id: &str) -> Option<&'static str> {
        if id.is_empty() {
            return Some("id cannot be empty");
        }
        if id.len() > Self::MAX_LEN {
            return Some("id is longer than 64 characters");
        }
        let valid = id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
        if !valid {
            return Some("id may only contain ASCII letters, digits, '-', '_' and '.'");
        }
        None
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for NodeId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.as_bytes().cmp(other.0.as_bytes()))
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for NodeId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for NodeId {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}
