//! Common error types for Gossiper components.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias used across the workspace
pub type Result<T> = std::result::Result<T, GossiperError>;

/// Common errors across Gossiper components
#[derive(Debug, Error)]
pub enum GossiperError {
    /// Malformed `host[:port]` string
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Membership engine failed to bind or start
    #[error("Engine initialisation failed: {0}")]
    EngineInit(String),

    /// Peer unreachable or rejected the join
    #[error("Join failed: {0}")]
    Join(String),

    /// Departure announcement failed
    #[error("Leave failed: {0}")]
    Leave(String),

    /// Departure announcement did not complete in time
    #[error("Departure timed out after {0:?}")]
    DepartureTimeout(Duration),

    /// Socket-level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Wire encoding/decoding failure
    #[error("Codec error: {0}")]
    Codec(String),

    /// Operation attempted after the engine was shut down
    #[error("Membership engine is shut down")]
    Shutdown,
}
