//! Shared constants for Gossiper components.

/// Default bind address for the node binary
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7000";

/// Port used when a bind or peer address carries no port segment
pub const DEFAULT_BIND_PORT: u16 = 7946;

/// Graceful departure budget (1 second)
pub const DEFAULT_LEAVE_TIMEOUT_MS: u64 = 1000;

/// Maximum size of the metadata a node attaches to its alive announcements
pub const META_MAX_SIZE: usize = 512;

/// Byte budget for a single gossip packet
pub const PACKET_BUDGET: usize = 1400;

/// Receive buffer size (largest possible UDP payload)
pub const UDP_BUFFER_SIZE: usize = 65_536;

/// Protocol timing defaults, tuned for a local/loopback cluster
pub mod timing {
    /// Failure-detection probe interval (milliseconds)
    pub const PROBE_INTERVAL_MS: u64 = 1000;

    /// Time to wait for an ack before suspecting a peer (milliseconds)
    pub const PROBE_TIMEOUT_MS: u64 = 200;

    /// Dissemination round interval (milliseconds)
    pub const GOSSIP_INTERVAL_MS: u64 = 100;

    /// Peers contacted per dissemination round
    pub const GOSSIP_NODES: usize = 3;

    /// Time a suspect peer has to refute before it is declared dead (milliseconds)
    pub const SUSPICION_TIMEOUT_MS: u64 = 5000;

    /// Anti-entropy full state exchange interval (milliseconds, 0 disables)
    pub const PUSH_PULL_INTERVAL_MS: u64 = 15_000;

    /// Time to wait for a push/pull reply (milliseconds)
    pub const PUSH_PULL_TIMEOUT_MS: u64 = 2000;

    /// How long dead or departed members stay in the table (milliseconds)
    pub const DEAD_RECLAIM_MS: u64 = 15_000;

    /// Multiplier for the number of retransmissions of each update
    pub const RETRANSMIT_MULT: u32 = 2;
}
