//! Node lifecycle.
//!
//! A [`Gossiper`] owns one membership engine and moves through
//! `Created → Running → Leaving → Shutdown`. Clones share the same node, so
//! the signal handler and `main` can drive it concurrently.

mod completion;
mod delegate;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use gossiper_common::constants::DEFAULT_LEAVE_TIMEOUT_MS;
use gossiper_common::{BindAddress, GossiperError, Member, Result};
use gossiper_membership::{Delegate, EngineConfig, Membership, ProtocolTiming};

use completion::Completion;
use delegate::NodeDelegate;

/// Lifecycle state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Created,
    Running,
    Leaving,
    Shutdown,
}

/// Validated settings for one node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub name: String,
    pub bind: BindAddress,
    /// Upper bound on the graceful departure announcement
    pub leave_timeout: Duration,
    pub timing: ProtocolTiming,
}

impl NodeConfig {
    pub fn new(name: impl Into<String>, bind: BindAddress) -> Self {
        Self {
            name: name.into(),
            bind,
            leave_timeout: Duration::from_millis(DEFAULT_LEAVE_TIMEOUT_MS),
            timing: ProtocolTiming::default(),
        }
    }
}

/// Identity and lifecycle of a node, shared with its delegate
struct NodeCore {
    name: String,
    bind: BindAddress,
    leave_timeout: Duration,
    state: Mutex<NodeState>,
    /// Latched by the first `leave`
    leaving: AtomicBool,
    done: Completion,
}

impl NodeCore {
    fn new(name: String, bind: BindAddress, leave_timeout: Duration) -> Self {
        Self {
            name,
            bind,
            leave_timeout,
            state: Mutex::new(NodeState::Created),
            leaving: AtomicBool::new(false),
            done: Completion::new(),
        }
    }

    fn state(&self) -> NodeState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, to: NodeState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(node = %self.name, from = ?*state, to = ?to, "Node state change");
        *state = to;
    }
}

/// A cluster member backed by a membership engine
pub struct Gossiper<M: Membership> {
    node: Arc<NodeCore>,
    engine: Arc<M>,
}

impl<M: Membership> Clone for Gossiper<M> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            engine: self.engine.clone(),
        }
    }
}

impl<M: Membership> Gossiper<M> {
    /// Start the engine on the configured address.
    ///
    /// Returns once the engine is bound and running; the local node is
    /// already in its own member list.
    pub async fn create(config: NodeConfig) -> Result<Self> {
        Self::create_with(config, M::create).await
    }

    /// Like [`create`](Self::create) with a caller-supplied engine
    /// constructor. The constructor receives the engine configuration with
    /// this node's delegate already registered.
    pub async fn create_with<F, Fut>(config: NodeConfig, start: F) -> Result<Self>
    where
        F: FnOnce(EngineConfig) -> Fut,
        Fut: Future<Output = Result<M>>,
    {
        let NodeConfig {
            name,
            bind,
            leave_timeout,
            timing,
        } = config;

        let node = Arc::new(NodeCore::new(name.clone(), bind.clone(), leave_timeout));
        let delegate: Arc<dyn Delegate> = Arc::new(NodeDelegate::new(Arc::downgrade(&node)));
        let engine_config = EngineConfig::local(name, bind)
            .with_timing(timing)
            .with_delegate(delegate);

        let engine = start(engine_config).await.map_err(|e| match e {
            GossiperError::EngineInit(_) => e,
            other => GossiperError::EngineInit(other.to_string()),
        })?;

        node.transition(NodeState::Running);
        tracing::info!(node = %node.name, bind = %node.bind, "Node created");

        Ok(Self {
            node,
            engine: Arc::new(engine),
        })
    }

    /// Join the cluster through `peer`. Failure is logged and the node
    /// keeps running as a standalone cluster.
    pub async fn join(&self, peer: &str) {
        tracing::info!(node = %self.node.name, peer = %peer, "Joining cluster");

        match self.engine.join(&[peer.to_string()]).await {
            Ok(contacted) => {
                tracing::info!(peer = %peer, contacted, "Joined cluster");
            }
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "Failed to join cluster, running standalone");
            }
        }
    }

    /// Announce departure, shut the engine down and release `wait`.
    ///
    /// Only the first call does anything; later and concurrent calls
    /// return immediately. Announcement failures are logged, never fatal.
    pub async fn leave(&self) {
        if self.node.leaving.swap(true, Ordering::AcqRel) {
            tracing::debug!(node = %self.node.name, "Leave already in progress");
            return;
        }
        self.node.transition(NodeState::Leaving);

        let timeout = self.node.leave_timeout;
        match tokio::time::timeout(timeout, self.engine.leave(timeout)).await {
            Ok(Ok(())) => tracing::info!(node = %self.node.name, "Left cluster"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Error leaving cluster"),
            Err(_) => {
                let e = GossiperError::DepartureTimeout(timeout);
                tracing::warn!(error = %e, "Error leaving cluster");
            }
        }

        if let Err(e) = self.engine.shutdown().await {
            tracing::error!(error = %e, "Error shutting down membership engine");
        }

        self.node.transition(NodeState::Shutdown);
        self.node.done.complete();
        tracing::info!(node = %self.node.name, "Node shut down");
    }

    /// Block until the node has shut down
    pub async fn wait(&self) {
        self.node.done.wait().await;
    }

    /// Current view of the cluster, including this node
    pub fn members(&self) -> Vec<Member> {
        self.engine.members()
    }

    /// Log one line per known member
    pub fn print_members(&self) {
        for member in self.members() {
            tracing::info!(
                member = %member.name,
                addr = %member.address,
                state = %member.state,
                "Member"
            );
        }
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn bind_address(&self) -> &BindAddress {
        &self.node.bind
    }

    pub fn state(&self) -> NodeState {
        self.node.state()
    }

    pub fn engine(&self) -> &M {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gossiper_common::MemberState;
    use std::net::SocketAddr;
    use std::sync::atomic::AtomicUsize;

    // ============================================================
    // Fake engine
    // ============================================================

    #[derive(Clone, Copy)]
    enum LeaveBehavior {
        Succeed,
        Fail,
        Hang,
    }

    #[derive(Default)]
    struct Calls {
        join: AtomicUsize,
        leave: AtomicUsize,
        shutdown: AtomicUsize,
    }

    struct FakeMembership {
        name: String,
        addr: SocketAddr,
        behavior: LeaveBehavior,
        delegate: Option<Arc<dyn Delegate>>,
        calls: Arc<Calls>,
    }

    impl FakeMembership {
        fn new(config: EngineConfig, behavior: LeaveBehavior, calls: Arc<Calls>) -> Self {
            Self {
                name: config.name,
                addr: "127.0.0.1:7000".parse().unwrap(),
                behavior,
                delegate: config.delegate,
                calls,
            }
        }
    }

    impl Membership for FakeMembership {
        async fn create(config: EngineConfig) -> Result<Self> {
            Ok(Self::new(config, LeaveBehavior::Succeed, Arc::default()))
        }

        async fn join(&self, _peers: &[String]) -> Result<usize> {
            self.calls.join.fetch_add(1, Ordering::SeqCst);
            Err(GossiperError::Join("connection refused".to_string()))
        }

        async fn leave(&self, _timeout: Duration) -> Result<()> {
            self.calls.leave.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                LeaveBehavior::Succeed => Ok(()),
                LeaveBehavior::Fail => Err(GossiperError::Leave("no peers acked".to_string())),
                LeaveBehavior::Hang => std::future::pending::<Result<()>>().await,
            }
        }

        async fn shutdown(&self) -> Result<()> {
            self.calls.shutdown.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn members(&self) -> Vec<Member> {
            vec![Member {
                name: self.name.clone(),
                address: self.addr,
                state: MemberState::Alive,
                meta: Vec::new(),
            }]
        }
    }

    fn node_config(name: &str) -> NodeConfig {
        NodeConfig {
            leave_timeout: Duration::from_millis(100),
            ..NodeConfig::new(name, BindAddress::parse("127.0.0.1:7000").unwrap())
        }
    }

    async fn fake_node(behavior: LeaveBehavior) -> (Gossiper<FakeMembership>, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let engine_calls = calls.clone();
        let gossiper = Gossiper::create_with(node_config("node-a"), move |config| async move {
            Ok(FakeMembership::new(config, behavior, engine_calls))
        })
        .await
        .unwrap();
        (gossiper, calls)
    }

    // ============================================================
    // Creation
    // ============================================================

    #[tokio::test]
    async fn test_create_runs_and_lists_local_node() {
        let (gossiper, _) = fake_node(LeaveBehavior::Succeed).await;

        assert_eq!(gossiper.state(), NodeState::Running);
        assert_eq!(gossiper.name(), "node-a");
        assert_eq!(gossiper.bind_address().port(), Some(7000));

        let members = gossiper.members();
        assert!(members.iter().any(|m| m.name == "node-a"));
        gossiper.print_members();
    }

    #[tokio::test]
    async fn test_create_failure_is_engine_init() {
        let result = Gossiper::<FakeMembership>::create_with(node_config("node-a"), |_| async {
            Err(GossiperError::Transport("address in use".to_string()))
        })
        .await;

        match result {
            Err(GossiperError::EngineInit(msg)) => assert!(msg.contains("address in use")),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("creation should fail"),
        }
    }

    #[tokio::test]
    async fn test_delegate_is_registered_without_owning_node() {
        let (gossiper, _) = fake_node(LeaveBehavior::Succeed).await;

        let delegate = gossiper.engine().delegate.clone().expect("delegate registered");
        assert!(delegate.node_meta(512).is_empty());
        assert!(delegate.get_broadcasts(12, 1400).is_empty());
        assert_eq!(Arc::strong_count(&gossiper.node), 1);
    }

    // ============================================================
    // Join
    // ============================================================

    #[tokio::test]
    async fn test_join_failure_keeps_node_running() {
        let (gossiper, calls) = fake_node(LeaveBehavior::Succeed).await;

        gossiper.join("127.0.0.1:1").await;

        assert_eq!(calls.join.load(Ordering::SeqCst), 1);
        assert_eq!(gossiper.state(), NodeState::Running);
        assert_eq!(gossiper.members().len(), 1);
    }

    // ============================================================
    // Leave and wait
    // ============================================================

    #[tokio::test]
    async fn test_leave_releases_wait_whatever_the_outcome() {
        for behavior in [LeaveBehavior::Succeed, LeaveBehavior::Fail, LeaveBehavior::Hang] {
            let (gossiper, calls) = fake_node(behavior).await;

            let waiter = {
                let gossiper = gossiper.clone();
                tokio::spawn(async move { gossiper.wait().await })
            };

            tokio::time::timeout(Duration::from_secs(2), gossiper.leave())
                .await
                .expect("leave is bounded by the leave timeout");
            tokio::time::timeout(Duration::from_secs(2), waiter)
                .await
                .expect("wait released")
                .unwrap();

            assert_eq!(gossiper.state(), NodeState::Shutdown);
            assert_eq!(calls.leave.load(Ordering::SeqCst), 1);
            assert_eq!(calls.shutdown.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_concurrent_leave_runs_once() {
        let (gossiper, calls) = fake_node(LeaveBehavior::Hang).await;

        let first = {
            let gossiper = gossiper.clone();
            tokio::spawn(async move { gossiper.leave().await })
        };
        let second = {
            let gossiper = gossiper.clone();
            tokio::spawn(async move { gossiper.leave().await })
        };

        for task in [first, second] {
            tokio::time::timeout(Duration::from_secs(2), task)
                .await
                .expect("no leave call deadlocks")
                .unwrap();
        }
        tokio::time::timeout(Duration::from_secs(2), gossiper.wait())
            .await
            .expect("wait released");

        assert_eq!(calls.leave.load(Ordering::SeqCst), 1);
        assert_eq!(calls.shutdown.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_leave_after_shutdown_is_noop() {
        let (gossiper, calls) = fake_node(LeaveBehavior::Succeed).await;

        gossiper.leave().await;
        gossiper.leave().await;

        assert_eq!(calls.leave.load(Ordering::SeqCst), 1);
        assert_eq!(calls.shutdown.load(Ordering::SeqCst), 1);
        assert_eq!(gossiper.state(), NodeState::Shutdown);
    }

    #[tokio::test]
    async fn test_wait_returns_for_late_callers() {
        let (gossiper, _) = fake_node(LeaveBehavior::Succeed).await;
        gossiper.leave().await;

        tokio::time::timeout(Duration::from_secs(1), gossiper.wait())
            .await
            .expect("wait after shutdown returns");
        tokio::time::timeout(Duration::from_secs(1), gossiper.wait())
            .await
            .expect("wait is repeatable");
    }

    #[tokio::test]
    async fn test_wait_blocks_while_running() {
        let (gossiper, _) = fake_node(LeaveBehavior::Succeed).await;

        let blocked = tokio::time::timeout(Duration::from_millis(100), gossiper.wait()).await;
        assert!(blocked.is_err());
        assert_eq!(gossiper.state(), NodeState::Running);
    }

    // ============================================================
    // Real engine
    // ============================================================

    fn udp_config(name: &str) -> NodeConfig {
        NodeConfig {
            leave_timeout: Duration::from_millis(500),
            timing: ProtocolTiming {
                probe_interval: Duration::from_millis(50),
                probe_timeout: Duration::from_millis(25),
                gossip_interval: Duration::from_millis(20),
                suspicion_timeout: Duration::from_millis(200),
                push_pull_interval: Duration::from_millis(500),
                push_pull_timeout: Duration::from_millis(300),
                ..ProtocolTiming::default()
            },
            ..NodeConfig::new(name, BindAddress::parse("127.0.0.1:0").unwrap())
        }
    }

    fn names<M: Membership>(gossiper: &Gossiper<M>) -> Vec<String> {
        gossiper.members().into_iter().map(|m| m.name).collect()
    }

    async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_udp_node_lists_itself_immediately() {
        use gossiper_membership::UdpMembership;

        let gossiper = Gossiper::<UdpMembership>::create(udp_config("solo")).await.unwrap();
        assert_eq!(names(&gossiper), vec!["solo".to_string()]);

        gossiper.leave().await;
        assert_eq!(gossiper.state(), NodeState::Shutdown);
    }

    #[tokio::test]
    async fn test_udp_nodes_converge_and_observe_leave() {
        use gossiper_membership::UdpMembership;

        let a = Gossiper::<UdpMembership>::create(udp_config("node-a")).await.unwrap();
        let b = Gossiper::<UdpMembership>::create(udp_config("node-b")).await.unwrap();

        b.join(&a.engine().local_addr().to_string()).await;

        let both = vec!["node-a".to_string(), "node-b".to_string()];
        assert!(eventually(|| names(&a) == both).await);
        assert!(eventually(|| names(&b) == both).await);

        a.leave().await;
        tokio::time::timeout(Duration::from_secs(1), a.wait())
            .await
            .expect("A shut down");

        assert!(eventually(|| names(&b) == vec!["node-b".to_string()]).await);
        b.leave().await;
    }

    #[tokio::test]
    async fn test_udp_join_unreachable_peer_is_not_fatal() {
        use gossiper_membership::UdpMembership;

        let gossiper = Gossiper::<UdpMembership>::create(udp_config("lonely")).await.unwrap();

        // Bound but never answers
        let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        gossiper.join(&silent.local_addr().unwrap().to_string()).await;

        assert_eq!(gossiper.state(), NodeState::Running);
        assert_eq!(names(&gossiper), vec!["lonely".to_string()]);
        gossiper.leave().await;
    }
}
