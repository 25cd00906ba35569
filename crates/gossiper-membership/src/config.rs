//! Engine configuration.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use gossiper_common::constants::timing;
use gossiper_common::{BindAddress, GossiperError, Result};

use crate::delegate::Delegate;

/// Protocol timing knobs
#[derive(Clone, Debug, PartialEq)]
pub struct ProtocolTiming {
    /// Interval between failure-detection probes
    pub probe_interval: Duration,
    /// Time to wait for an ack before suspecting the probed peer
    pub probe_timeout: Duration,
    /// Interval between dissemination rounds
    pub gossip_interval: Duration,
    /// Peers contacted per dissemination round
    pub gossip_nodes: usize,
    /// Refutation window for suspect peers
    pub suspicion_timeout: Duration,
    /// Anti-entropy interval (zero disables periodic push/pull)
    pub push_pull_interval: Duration,
    /// Time to wait for a push/pull reply, including joins
    pub push_pull_timeout: Duration,
    /// How long dead or departed members are remembered
    pub dead_reclaim_time: Duration,
    /// Retransmission multiplier for membership updates
    pub retransmit_mult: u32,
}

impl Default for ProtocolTiming {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_millis(timing::PROBE_INTERVAL_MS),
            probe_timeout: Duration::from_millis(timing::PROBE_TIMEOUT_MS),
            gossip_interval: Duration::from_millis(timing::GOSSIP_INTERVAL_MS),
            gossip_nodes: timing::GOSSIP_NODES,
            suspicion_timeout: Duration::from_millis(timing::SUSPICION_TIMEOUT_MS),
            push_pull_interval: Duration::from_millis(timing::PUSH_PULL_INTERVAL_MS),
            push_pull_timeout: Duration::from_millis(timing::PUSH_PULL_TIMEOUT_MS),
            dead_reclaim_time: Duration::from_millis(timing::DEAD_RECLAIM_MS),
            retransmit_mult: timing::RETRANSMIT_MULT,
        }
    }
}

impl ProtocolTiming {
    /// Reject values the protocol loops cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.probe_interval.is_zero() || self.gossip_interval.is_zero() {
            return Err(GossiperError::Config(
                "probe and gossip intervals must be non-zero".to_string(),
            ));
        }
        if self.gossip_nodes == 0 || self.retransmit_mult == 0 {
            return Err(GossiperError::Config(
                "gossip_nodes and retransmit_mult must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything the engine needs to start
#[derive(Clone)]
pub struct EngineConfig {
    /// Unique node name
    pub name: String,
    /// Local gossip endpoint
    pub bind: BindAddress,
    /// Protocol timing
    pub timing: ProtocolTiming,
    /// Application callbacks (a no-op delegate is used when unset)
    pub delegate: Option<Arc<dyn Delegate>>,
}

impl EngineConfig {
    /// Configuration with timing tuned for a local network
    pub fn local(name: impl Into<String>, bind: BindAddress) -> Self {
        Self {
            name: name.into(),
            bind,
            timing: ProtocolTiming::default(),
            delegate: None,
        }
    }

    pub fn with_timing(mut self, timing: ProtocolTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Register the application's callbacks
    pub fn with_delegate(mut self, delegate: Arc<dyn Delegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("name", &self.name)
            .field("bind", &self.bind)
            .field("timing", &self.timing)
            .field("delegate", &self.delegate.is_some())
            .finish()
    }
}

/// Resolve a `host[:port]` address, applying the default port when absent
pub(crate) async fn resolve(addr: &BindAddress) -> io::Result<SocketAddr> {
    tokio::net::lookup_host((addr.host(), addr.port_or_default()))
        .await?
        .next()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{addr} resolved to no addresses"),
            )
        })
}
