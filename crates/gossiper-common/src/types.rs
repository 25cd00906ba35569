//! Core types shared across Gossiper components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::constants::DEFAULT_BIND_PORT;
use crate::error::{GossiperError, Result};

/// Local endpoint the membership engine listens on, as `host[:port]`.
///
/// The host is kept verbatim (no DNS validation); resolution happens when
/// the engine binds. A missing port is left unset so the caller can apply
/// its own default.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindAddress {
    host: String,
    port: Option<u16>,
}

impl BindAddress {
    /// Parse a `host[:port]` string.
    ///
    /// Splits on the first `:`. The host must be non-empty; a port segment,
    /// if present, must be a valid non-negative port number.
    pub fn parse(input: &str) -> Result<Self> {
        let (host, port) = match input.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (input, None),
        };

        if host.is_empty() {
            return Err(GossiperError::InvalidAddress(format!(
                "missing host in {input:?}"
            )));
        }

        let port = match port {
            Some(raw) => Some(raw.parse::<u16>().map_err(|e| {
                GossiperError::InvalidAddress(format!("invalid port {raw:?} in {input:?}: {e}"))
            })?),
            None => None,
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Port, falling back to the engine's default gossip port
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_BIND_PORT)
    }
}

impl fmt::Display for BindAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => f.write_str(&self.host),
        }
    }
}

impl FromStr for BindAddress {
    type Err = GossiperError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Liveness state of a cluster member as seen by the local engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberState {
    /// Responding to probes
    Alive,
    /// Missed a probe, has a window to refute
    Suspect,
    /// Declared failed by the cluster
    Dead,
    /// Announced its own graceful departure
    Left,
}

impl MemberState {
    /// Returns true if the member is part of the live view
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Alive | Self::Suspect)
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Alive => "alive",
            Self::Suspect => "suspect",
            Self::Dead => "dead",
            Self::Left => "left",
        };
        f.write_str(s)
    }
}

/// Read-only projection of a cluster member, handed out by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Unique node name
    pub name: String,

    /// Gossip endpoint
    pub address: SocketAddr,

    /// Current liveness state
    pub state: MemberState,

    /// Metadata attached to the member's alive announcements
    pub meta: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_and_port() {
        let addr = BindAddress::parse("host:7000").unwrap();
        assert_eq!(addr.host(), "host");
        assert_eq!(addr.port(), Some(7000));
    }

    #[test]
    fn test_parse_host_only() {
        let addr = BindAddress::parse("host").unwrap();
        assert_eq!(addr.host(), "host");
        assert_eq!(addr.port(), None);
        assert_eq!(addr.port_or_default(), DEFAULT_BIND_PORT);
    }

    #[test]
    fn test_parse_rejects_non_numeric_port() {
        let err = BindAddress::parse("host:notanumber").unwrap_err();
        assert!(matches!(err, GossiperError::InvalidAddress(_)));
    }

    #[test]
    fn test_parse_rejects_bad_ports() {
        for input in ["host:", "host:-1", "host:70000", "host:7000:1"] {
            let result = BindAddress::parse(input);
            assert!(
                matches!(result, Err(GossiperError::InvalidAddress(_))),
                "{input} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_rejects_empty_host() {
        assert!(matches!(
            BindAddress::parse(""),
            Err(GossiperError::InvalidAddress(_))
        ));
        assert!(matches!(
            BindAddress::parse(":7000"),
            Err(GossiperError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_parse_accepts_port_zero_and_any_host() {
        let addr = BindAddress::parse("not a real host:0").unwrap();
        assert_eq!(addr.host(), "not a real host");
        assert_eq!(addr.port(), Some(0));
    }

    #[test]
    fn test_display_matches_input() {
        assert_eq!(BindAddress::parse("127.0.0.1:7000").unwrap().to_string(), "127.0.0.1:7000");
        assert_eq!(BindAddress::parse("localhost").unwrap().to_string(), "localhost");
    }

    #[test]
    fn test_from_str() {
        let addr: BindAddress = "10.0.0.1:9000".parse().unwrap();
        assert_eq!(addr.port(), Some(9000));
    }

    #[test]
    fn test_member_state_liveness() {
        assert!(MemberState::Alive.is_live());
        assert!(MemberState::Suspect.is_live());
        assert!(!MemberState::Dead.is_live());
        assert!(!MemberState::Left.is_live());
    }

    #[test]
    fn test_member_bincode_roundtrip() {
        let member = Member {
            name: "node-1".to_string(),
            address: "127.0.0.1:7000".parse().unwrap(),
            state: MemberState::Suspect,
            meta: vec![],
        };

        let encoded = bincode::serialize(&member).unwrap();
        let decoded: Member = bincode::deserialize(&encoded).unwrap();
        assert_eq!(decoded, member);
    }
}
