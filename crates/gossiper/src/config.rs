//! Configuration management for the gossiper node.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use gossiper_common::constants::{DEFAULT_BIND_ADDR, DEFAULT_LEAVE_TIMEOUT_MS, timing};
use gossiper_common::BindAddress;
use gossiper_membership::ProtocolTiming;

use crate::node::NodeConfig;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Gossip bind address, `host[:port]`
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Node name (local hostname if not set)
    #[serde(default = "default_node_name")]
    pub name: String,

    /// Peer to join at startup
    #[serde(default)]
    pub join: Option<String>,

    /// Graceful departure budget in milliseconds
    #[serde(default = "default_leave_timeout")]
    pub leave_timeout_ms: u64,

    /// Protocol timing
    #[serde(default)]
    pub membership: MembershipConfig,
}

/// Membership protocol tuning
#[derive(Debug, Clone, Deserialize)]
pub struct MembershipConfig {
    #[serde(default = "default_probe_interval")]
    pub probe_interval_ms: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    #[serde(default = "default_gossip_interval")]
    pub gossip_interval_ms: u64,

    /// Peers contacted per gossip round
    #[serde(default = "default_gossip_nodes")]
    pub gossip_nodes: usize,

    #[serde(default = "default_suspicion_timeout")]
    pub suspicion_timeout_ms: u64,

    /// 0 disables periodic anti-entropy
    #[serde(default = "default_push_pull_interval")]
    pub push_pull_interval_ms: u64,

    #[serde(default = "default_push_pull_timeout")]
    pub push_pull_timeout_ms: u64,

    #[serde(default = "default_dead_reclaim")]
    pub dead_reclaim_ms: u64,

    #[serde(default = "default_retransmit_mult")]
    pub retransmit_mult: u32,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval(),
            probe_timeout_ms: default_probe_timeout(),
            gossip_interval_ms: default_gossip_interval(),
            gossip_nodes: default_gossip_nodes(),
            suspicion_timeout_ms: default_suspicion_timeout(),
            push_pull_interval_ms: default_push_pull_interval(),
            push_pull_timeout_ms: default_push_pull_timeout(),
            dead_reclaim_ms: default_dead_reclaim(),
            retransmit_mult: default_retransmit_mult(),
        }
    }
}

impl MembershipConfig {
    pub fn timing(&self) -> ProtocolTiming {
        ProtocolTiming {
            probe_interval: Duration::from_millis(self.probe_interval_ms),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            gossip_interval: Duration::from_millis(self.gossip_interval_ms),
            gossip_nodes: self.gossip_nodes,
            suspicion_timeout: Duration::from_millis(self.suspicion_timeout_ms),
            push_pull_interval: Duration::from_millis(self.push_pull_interval_ms),
            push_pull_timeout: Duration::from_millis(self.push_pull_timeout_ms),
            dead_reclaim_time: Duration::from_millis(self.dead_reclaim_ms),
            retransmit_mult: self.retransmit_mult,
        }
    }
}

// Default value functions
fn default_bind_addr() -> String { DEFAULT_BIND_ADDR.to_string() }
fn default_leave_timeout() -> u64 { DEFAULT_LEAVE_TIMEOUT_MS }
fn default_probe_interval() -> u64 { timing::PROBE_INTERVAL_MS }
fn default_probe_timeout() -> u64 { timing::PROBE_TIMEOUT_MS }
fn default_gossip_interval() -> u64 { timing::GOSSIP_INTERVAL_MS }
fn default_gossip_nodes() -> usize { timing::GOSSIP_NODES }
fn default_suspicion_timeout() -> u64 { timing::SUSPICION_TIMEOUT_MS }
fn default_push_pull_interval() -> u64 { timing::PUSH_PULL_INTERVAL_MS }
fn default_push_pull_timeout() -> u64 { timing::PUSH_PULL_TIMEOUT_MS }
fn default_dead_reclaim() -> u64 { timing::DEAD_RECLAIM_MS }
fn default_retransmit_mult() -> u32 { timing::RETRANSMIT_MULT }

fn default_node_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(generate_node_id)
}

fn generate_node_id() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    format!("node-{:08x}", rng.random::<u32>())
}

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let settings = ::config::Config::builder()
                .add_source(::config::File::with_name(config_path))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")?
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Self::default()
        };

        // Apply CLI overrides
        if let Some(ref bind) = args.bind {
            config.bind_addr = bind.clone();
        }
        if let Some(ref join) = args.join {
            config.join = Some(join.clone());
        }
        if let Some(ref name) = args.name {
            config.name = name.clone();
        }

        Ok(config)
    }

    /// Validate the bind address and build the node settings
    pub fn node_config(&self) -> gossiper_common::Result<NodeConfig> {
        let bind = BindAddress::parse(&self.bind_addr)?;
        Ok(NodeConfig {
            leave_timeout: Duration::from_millis(self.leave_timeout_ms),
            timing: self.membership.timing(),
            ..NodeConfig::new(self.name.clone(), bind)
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            name: default_node_name(),
            join: None,
            leave_timeout_ms: default_leave_timeout(),
            membership: MembershipConfig::default(),
        }
    }
}
