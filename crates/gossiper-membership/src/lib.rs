//! # Gossiper Membership
//!
//! SWIM-style cluster membership over UDP.
//!
//! Implements:
//! - Failure detection (random probing, suspicion, dead declaration)
//! - Dissemination (piggybacked membership updates and user broadcasts)
//! - Anti-entropy (push/pull exchange of the member table)
//! - Graceful departure
//!
//! Applications plug into the engine through the [`Delegate`] callbacks and
//! drive it through the [`Membership`] trait.

mod broadcast;
mod config;
mod delegate;
mod engine;
mod message;
mod state;
mod udp;

pub use config::{EngineConfig, ProtocolTiming};
pub use delegate::{Delegate, NoopDelegate};
pub use engine::Membership;
pub use message::USER_MESSAGE_OVERHEAD;
pub use udp::UdpMembership;

pub use gossiper_common::{BindAddress, GossiperError, Member, MemberState, Result};
