//! The interface a node uses to drive a membership engine.

use std::future::Future;
use std::time::Duration;

use gossiper_common::{Member, Result};

use crate::config::EngineConfig;

/// A running membership engine.
///
/// `create` must not return until the engine is bound and processing
/// traffic on its bind address.
pub trait Membership: Send + Sync + Sized + 'static {
    /// Bind the transport and start the protocol
    fn create(config: EngineConfig) -> impl Future<Output = Result<Self>> + Send;

    /// Exchange state with each peer. Returns how many peers were reached;
    /// fails only if none were.
    fn join(&self, peers: &[String]) -> impl Future<Output = Result<usize>> + Send;

    /// Announce a graceful departure, bounded by `timeout`
    fn leave(&self, timeout: Duration) -> impl Future<Output = Result<()>> + Send;

    /// Stop all protocol tasks and release the transport. Idempotent.
    fn shutdown(&self) -> impl Future<Output = Result<()>> + Send;

    /// Snapshot of the live members, including the local node
    fn members(&self) -> Vec<Member>;
}
