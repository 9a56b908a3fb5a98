//! Election Protocol
//!
//! Defines the four election messages exchanged between peers and the
//! frame format used when they travel over TCP.

use serde::{Deserialize, Serialize};

use crate::id::NodeId;

/// Largest frame body accepted from the network
pub const MAX_FRAME_LEN: u32 = 64 * 1024;

/// Protocol messages for node communication.
///
/// Every payload is the sender's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Candidate asks a higher-id peer whether it is alive
    VoteInquiry { id: NodeId },

    /// Affirmative reply to a vote inquiry
    Alive { id: NodeId },

    /// Winner announces it is now master
    Victory { id: NodeId },

    /// Periodic heartbeat from the master
    Ping { id: NodeId },
}

/// Message type, used for subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    VoteInquiry,
    Alive,
    Victory,
    Ping,
}

impl MessageKind {
    /// All message kinds
    pub const ALL: [MessageKind; 4] = [
        MessageKind::VoteInquiry,
        MessageKind::Alive,
        MessageKind::Victory,
        MessageKind::Ping,
    ];

    /// Wire name of the message type
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::VoteInquiry => "vote_inquiry",
            MessageKind::Alive => "alive",
            MessageKind::Victory => "victory",
            MessageKind::Ping => "ping",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Message {
    /// Serialize message to bytes
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize message from bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Get the message type
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::VoteInquiry { .. } => MessageKind::VoteInquiry,
            Message::Alive { .. } => MessageKind::Alive,
            Message::Victory { .. } => MessageKind::Victory,
            Message::Ping { .. } => MessageKind::Ping,
        }
    }

    /// Id claimed by the sender
    pub fn sender(&self) -> &NodeId {
        match self {
            Message::VoteInquiry { id }
            | Message::Alive { id }
            | Message::Victory { id }
            | Message::Ping { id } => id,
        }
    }

    /// Get the message type name (for logging)
    pub fn type_name(&self) -> &'static str {
        self.kind().as_str()
    }
}

/// Frame header for length-prefixed messages
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Message length
    pub length: u32,
    /// Message checksum
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Create a new frame header
    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let [l0, l1, l2, l3, c0, c1, c2, c3] = *bytes;
        Self {
            length: u32::from_le_bytes([l0, l1, l2, l3]),
            checksum: u32::from_le_bytes([c0, c1, c2, c3]),
        }
    }

    /// Check a received body against this header
    pub fn verify(&self, body: &[u8]) -> bool {
        body.len() == self.length as usize && crc32fast::hash(body) == self.checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialization() {
        let msg = Message::Victory {
            id: NodeId::new("09").unwrap(),
        };

        let bytes = msg.serialize().unwrap();
        let restored = Message::deserialize(&bytes).unwrap();

        assert_eq!(restored, msg);
        assert_eq!(restored.kind(), MessageKind::Victory);
        assert_eq!(restored.sender().as_str(), "09");
    }

    #[test]
    fn test_wire_names() {
        let names: Vec<&str> = MessageKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["vote_inquiry", "alive", "victory", "ping"]);

        let ping = Message::Ping { id: NodeId::new("01").unwrap() };
        assert_eq!(ping.type_name(), "ping");
    }

    #[test]
    fn test_frame_header() {
        let data = b"test message data";
        let header = FrameHeader::new(data);
        let restored = FrameHeader::from_bytes(&header.to_bytes());

        assert_eq!(header.length, restored.length);
        assert_eq!(header.checksum, restored.checksum);
        assert!(restored.verify(data));
        assert!(!restored.verify(b"tampered message!"));
    }
}
