//! Wire format.
//!
//! Every datagram carries a bincode-encoded list of messages: the first is
//! usually the primary request/response, the rest are piggybacked updates.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use gossiper_common::{GossiperError, Result};

use crate::state::MemberRecord;

/// Bytes a `User` message adds on top of its payload
/// (4-byte variant tag + 8-byte length prefix)
pub const USER_MESSAGE_OVERHEAD: usize = 12;

/// Bytes the packet framing adds (8-byte message count)
pub(crate) const PACKET_OVERHEAD: usize = 8;

/// Protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Liveness probe
    Ping { seq: u32, from: String },

    /// Probe response
    Ack { seq: u32, from: String },

    /// Full member table exchange
    PushPull(PushPull),

    /// Member is alive at `incarnation`
    Alive {
        name: String,
        addr: SocketAddr,
        incarnation: u64,
        meta: Vec<u8>,
    },

    /// `from` suspects `name`
    Suspect {
        name: String,
        incarnation: u64,
        from: String,
    },

    /// `from` declares `name` dead; a member announcing itself has left
    Dead {
        name: String,
        incarnation: u64,
        from: String,
    },

    /// Opaque application broadcast
    User { payload: Vec<u8> },
}

/// Push/pull request or reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPull {
    pub seq: u32,
    pub from: String,
    /// Exchange triggered by a join rather than anti-entropy
    pub join: bool,
    pub reply: bool,
    pub members: Vec<MemberRecord>,
    /// Delegate-provided application state
    pub state: Vec<u8>,
}

impl Message {
    /// Member a membership update is about
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::Alive { name, .. } | Self::Suspect { name, .. } | Self::Dead { name, .. } => {
                Some(name)
            }
            _ => None,
        }
    }

    /// Size of this message inside a packet
    pub fn encoded_len(&self) -> usize {
        bincode::serialized_size(self)
            .map(|n| n as usize)
            .unwrap_or(usize::MAX)
    }
}

/// Encode a packet
pub fn encode(messages: &[Message]) -> Result<Vec<u8>> {
    bincode::serialize(messages).map_err(|e| GossiperError::Codec(e.to_string()))
}

/// Decode a packet
pub fn decode(data: &[u8]) -> Result<Vec<Message>> {
    bincode::deserialize(data).map_err(|e| GossiperError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_overhead() {
        for len in [0usize, 1, 100, 1024] {
            let message = Message::User {
                payload: vec![0xAB; len],
            };
            assert_eq!(message.encoded_len(), len + USER_MESSAGE_OVERHEAD);
        }
    }

    #[test]
    fn test_packet_overhead() {
        let messages = vec![
            Message::Ping {
                seq: 7,
                from: "node-1".to_string(),
            },
            Message::User { payload: vec![1, 2, 3] },
        ];
        let encoded = encode(&messages).unwrap();
        let body: usize = messages.iter().map(Message::encoded_len).sum();
        assert_eq!(encoded.len(), body + PACKET_OVERHEAD);
    }

    #[test]
    fn test_compound_packet() {
        let messages = vec![
            Message::Ack {
                seq: 1,
                from: "node-2".to_string(),
            },
            Message::Dead {
                name: "node-3".to_string(),
                incarnation: 4,
                from: "node-3".to_string(),
            },
        ];
        let decoded = decode(&encode(&messages).unwrap()).unwrap();
        assert_eq!(decoded, messages);
    }

    #[test]
    fn test_decode_garbage_is_codec_error() {
        let err = decode(&[0xFF, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, GossiperError::Codec(_)));
    }

    #[test]
    fn test_subject() {
        let alive = Message::Alive {
            name: "node-1".to_string(),
            addr: "127.0.0.1:7000".parse().unwrap(),
            incarnation: 1,
            meta: vec![],
        };
        assert_eq!(alive.subject(), Some("node-1"));

        let user = Message::User { payload: vec![] };
        assert_eq!(user.subject(), None);
    }
}
