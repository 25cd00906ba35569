//! UDP membership engine.
//!
//! One socket carries everything. Background tasks:
//! - receiver: decodes packets and applies them
//! - prober: pings a random peer each `probe_interval`, suspects it on
//!   timeout, expires suspects and reaps departed members
//! - gossiper: pushes queued updates and user broadcasts to a few peers
//! - push/pull: periodic full-table exchange with a random peer

use futures::future::join_all;
use rand::seq::IndexedRandom;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use gossiper_common::constants::{META_MAX_SIZE, PACKET_BUDGET, UDP_BUFFER_SIZE};
use gossiper_common::{BindAddress, GossiperError, Member, Result};

use crate::broadcast::{BroadcastQueue, retransmit_limit};
use crate::config::{EngineConfig, ProtocolTiming, resolve};
use crate::delegate::{Delegate, NoopDelegate};
use crate::engine::Membership;
use crate::message::{self, Message, PACKET_OVERHEAD, PushPull, USER_MESSAGE_OVERHEAD};
use crate::state::{MemberRecord, MemberTable, Outcome};

/// Membership engine over a single UDP socket
pub struct UdpMembership {
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// State shared with the background tasks
struct Shared {
    name: String,
    timing: ProtocolTiming,
    /// Taken on shutdown so the port is released once the tasks stop
    socket: Mutex<Option<Arc<UdpSocket>>>,
    table: RwLock<MemberTable>,
    broadcasts: Mutex<BroadcastQueue>,
    /// Outstanding pings and push/pull requests, by sequence number
    pending: Mutex<HashMap<u32, oneshot::Sender<()>>>,
    delegate: Arc<dyn Delegate>,
    seq: AtomicU32,
    shut_down: AtomicBool,
}

impl UdpMembership {
    /// Address the engine is bound to and advertises
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.table().local().addr
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shared.shut_down.load(Ordering::Acquire) {
            return Err(GossiperError::Shutdown);
        }
        Ok(())
    }
}

impl Membership for UdpMembership {
    async fn create(config: EngineConfig) -> Result<Self> {
        if config.name.is_empty() {
            return Err(GossiperError::EngineInit("node name must not be empty".to_string()));
        }
        config
            .timing
            .validate()
            .map_err(|e| GossiperError::EngineInit(e.to_string()))?;

        let bind = resolve(&config.bind).await.map_err(|e| {
            GossiperError::EngineInit(format!("failed to resolve {}: {e}", config.bind))
        })?;
        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| GossiperError::EngineInit(format!("failed to bind {bind}: {e}")))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| GossiperError::EngineInit(e.to_string()))?;

        let delegate = config
            .delegate
            .unwrap_or_else(|| Arc::new(NoopDelegate) as Arc<dyn Delegate>);
        let meta = delegate.node_meta(META_MAX_SIZE);
        if meta.len() > META_MAX_SIZE {
            return Err(GossiperError::EngineInit(format!(
                "node metadata is {} bytes, limit is {META_MAX_SIZE}",
                meta.len()
            )));
        }

        let socket = Arc::new(socket);
        let local = MemberRecord::alive(config.name.clone(), local_addr, 1, meta);
        let shared = Arc::new(Shared {
            name: config.name,
            timing: config.timing,
            socket: Mutex::new(Some(socket.clone())),
            table: RwLock::new(MemberTable::new(local)),
            broadcasts: Mutex::new(BroadcastQueue::new()),
            pending: Mutex::new(HashMap::new()),
            delegate,
            seq: AtomicU32::new(0),
            shut_down: AtomicBool::new(false),
        });

        let (shutdown_tx, _) = broadcast::channel(1);
        let tasks = vec![
            tokio::spawn(shared.clone().run_receiver(socket, shutdown_tx.subscribe())),
            tokio::spawn(shared.clone().run_prober(shutdown_tx.subscribe())),
            tokio::spawn(shared.clone().run_gossip(shutdown_tx.subscribe())),
            tokio::spawn(shared.clone().run_push_pull(shutdown_tx.subscribe())),
        ];

        tracing::info!(
            node = %shared.name,
            addr = %local_addr,
            "Membership engine started"
        );

        Ok(Self {
            shared,
            shutdown_tx,
            tasks: Mutex::new(tasks),
        })
    }

    async fn join(&self, peers: &[String]) -> Result<usize> {
        self.ensure_running()?;

        let results = join_all(peers.iter().map(|peer| self.shared.join_peer(peer))).await;

        let mut joined = 0;
        let mut last_error = None;
        for (peer, result) in peers.iter().zip(results) {
            match result {
                Ok(()) => {
                    joined += 1;
                    tracing::debug!(peer = %peer, "Exchanged state with peer");
                }
                Err(e) => {
                    tracing::warn!(peer = %peer, error = %e, "Failed to join peer");
                    last_error = Some(e);
                }
            }
        }

        if joined == 0 {
            return Err(last_error
                .unwrap_or_else(|| GossiperError::Join("no peers to join".to_string())));
        }
        Ok(joined)
    }

    async fn leave(&self, timeout: Duration) -> Result<()> {
        self.ensure_running()?;

        let Some(announcement) = self.shared.table_mut().mark_left() else {
            tracing::debug!("Departure already announced");
            return Ok(());
        };
        self.shared.queue().enqueue(announcement.clone());

        let peers = self.shared.table().live_peers();
        tracing::info!(peers = peers.len(), "Announcing departure");
        if peers.is_empty() {
            return Ok(());
        }

        let sends = join_all(
            peers
                .iter()
                .map(|(_, addr)| self.shared.send(*addr, std::slice::from_ref(&announcement))),
        );
        let results = tokio::time::timeout(timeout, sends)
            .await
            .map_err(|_| GossiperError::DepartureTimeout(timeout))?;

        let failures = results.iter().filter(|r| r.is_err()).count();
        if failures == peers.len() {
            return Err(GossiperError::Leave(format!(
                "departure announcement reached none of {} peers",
                peers.len()
            )));
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            tracing::debug!("Membership engine already shut down");
            return Ok(());
        }

        let _ = self.shutdown_tx.send(());
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
        self.shared
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        tracing::info!(node = %self.shared.name, "Membership engine shut down");
        Ok(())
    }

    fn members(&self) -> Vec<Member> {
        self.shared.table().members()
    }
}

impl Drop for UdpMembership {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.iter() {
            task.abort();
        }
    }
}

impl Shared {
    fn table(&self) -> RwLockReadGuard<'_, MemberTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn table_mut(&self) -> RwLockWriteGuard<'_, MemberTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue(&self) -> MutexGuard<'_, BroadcastQueue> {
        self.broadcasts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u32, oneshot::Sender<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn socket(&self) -> Option<Arc<UdpSocket>> {
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn send(&self, addr: SocketAddr, messages: &[Message]) -> Result<()> {
        let socket = self.socket().ok_or(GossiperError::Shutdown)?;
        let bytes = message::encode(messages)?;
        socket
            .send_to(&bytes, addr)
            .await
            .map_err(|e| GossiperError::Transport(format!("send to {addr} failed: {e}")))?;
        Ok(())
    }

    /// Register a request awaiting a reply
    fn register(&self) -> (u32, oneshot::Receiver<()>) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending().insert(seq, tx);
        (seq, rx)
    }

    fn complete(&self, seq: u32) {
        if let Some(tx) = self.pending().remove(&seq) {
            let _ = tx.send(());
        }
    }

    async fn await_reply(&self, seq: u32, rx: oneshot::Receiver<()>, timeout: Duration) -> bool {
        let replied = matches!(tokio::time::timeout(timeout, rx).await, Ok(Ok(())));
        if !replied {
            self.pending().remove(&seq);
        }
        replied
    }

    fn random_peers(&self, count: usize) -> Vec<(String, SocketAddr)> {
        let peers = self.table().live_peers();
        let mut rng = rand::rng();
        peers.choose_multiple(&mut rng, count).cloned().collect()
    }

    // === Receive path ===

    async fn run_receiver(
        self: Arc<Self>,
        socket: Arc<UdpSocket>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut buf = vec![0u8; UDP_BUFFER_SIZE];

        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, addr)) => {
                            self.handle_packet(&buf[..len], addr).await;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Gossip receive error");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Gossip receiver shutting down");
                    break;
                }
            }
        }
    }

    async fn handle_packet(&self, data: &[u8], addr: SocketAddr) {
        let messages = match message::decode(data) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(addr = %addr, error = %e, "Invalid gossip packet");
                return;
            }
        };

        for message in messages {
            self.handle_message(message, addr).await;
        }
    }

    async fn handle_message(&self, message: Message, addr: SocketAddr) {
        match message {
            Message::Ping { seq, from } => {
                tracing::trace!(from = %from, seq, "Received ping");
                let ack = Message::Ack {
                    seq,
                    from: self.name.clone(),
                };
                if let Err(e) = self.send(addr, &[ack]).await {
                    tracing::debug!(addr = %addr, error = %e, "Failed to send ack");
                }
            }
            Message::Ack { seq, .. } => self.complete(seq),
            Message::PushPull(push_pull) => self.handle_push_pull(push_pull, addr).await,
            Message::User { payload } => self.delegate.notify_msg(&payload),
            Message::Alive {
                name,
                addr: mut advertised,
                incarnation,
                meta,
            } => {
                // Relays rewrite on first receipt, so an unspecified address
                // only ever arrives straight from the member it describes
                if advertised.ip().is_unspecified() {
                    advertised.set_ip(addr.ip());
                }
                self.apply_update(Message::Alive {
                    name,
                    addr: advertised,
                    incarnation,
                    meta,
                });
            }
            update => self.apply_update(update),
        }
    }

    async fn handle_push_pull(&self, push_pull: PushPull, addr: SocketAddr) {
        let PushPull {
            seq,
            from,
            join,
            reply,
            members,
            state,
        } = push_pull;

        tracing::debug!(
            from = %from,
            join,
            reply,
            members = members.len(),
            "Received push/pull"
        );

        for mut record in members {
            // A sender bound to 0.0.0.0 is reachable at the packet source
            if record.name == from && record.addr.ip().is_unspecified() {
                record.addr.set_ip(addr.ip());
            }
            if record.name == self.name {
                self.learn_local_addr(record.addr);
            }
            self.apply_update(record.to_update());
        }
        self.delegate.merge_remote_state(&state, join);

        if reply {
            self.complete(seq);
            return;
        }

        let response = Message::PushPull(PushPull {
            seq,
            from: self.name.clone(),
            join,
            reply: true,
            members: self.table().snapshot(),
            state: self.delegate.local_state(join),
        });
        if let Err(e) = self.send(addr, &[response]).await {
            tracing::warn!(addr = %addr, error = %e, "Failed to answer push/pull");
        }
    }

    /// Adopt the address a peer reached us at while bound to an unspecified IP
    fn learn_local_addr(&self, observed: SocketAddr) {
        if self.table_mut().learn_local_addr(observed) {
            tracing::info!(node = %self.name, addr = %observed, "Learned advertise address");
        }
    }

    fn apply_update(&self, update: Message) {
        let outcome = self.table_mut().apply(&update, Instant::now());
        match outcome {
            Outcome::Ignored => {}
            Outcome::Changed => {
                log_transition(&update);
                self.queue().enqueue(update);
            }
            Outcome::Refuted(alive) => {
                tracing::warn!(rumour = ?update, "Refuting rumour about local node");
                self.queue().enqueue(alive);
            }
        }
    }

    // === Failure detection ===

    async fn run_prober(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.timing.probe_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => self.probe_round().await,
                _ = shutdown.recv() => {
                    tracing::debug!("Prober shutting down");
                    break;
                }
            }
        }
    }

    async fn probe_round(&self) {
        self.expire_members();

        let Some((name, addr)) = self.random_peers(1).pop() else {
            return;
        };

        let (seq, rx) = self.register();
        let ping = Message::Ping {
            seq,
            from: self.name.clone(),
        };
        if let Err(e) = self.send(addr, &[ping]).await {
            tracing::debug!(member = %name, error = %e, "Failed to send ping");
        }
        if self.await_reply(seq, rx, self.timing.probe_timeout).await {
            return;
        }

        let suspicion = self.table_mut().suspect(&name, Instant::now());
        if let Some(update) = suspicion {
            tracing::warn!(member = %name, addr = %addr, "Probe timed out, suspecting member");
            self.queue().enqueue(update);
        }
    }

    fn expire_members(&self) {
        let now = Instant::now();
        let (declared_dead, reaped) = {
            let mut table = self.table_mut();
            (
                table.expire_suspects(now, self.timing.suspicion_timeout),
                table.reap(now, self.timing.dead_reclaim_time),
            )
        };

        for update in declared_dead {
            log_transition(&update);
            self.queue().enqueue(update);
        }
        for name in reaped {
            tracing::debug!(member = %name, "Forgot departed member");
        }
    }

    // === Dissemination ===

    async fn run_gossip(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.timing.gossip_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => self.gossip_round().await,
                _ = shutdown.recv() => {
                    tracing::debug!("Gossip broadcaster shutting down");
                    break;
                }
            }
        }
    }

    async fn gossip_round(&self) {
        let targets = self.random_peers(self.timing.gossip_nodes);
        if targets.is_empty() {
            return;
        }

        let messages = self.collect_broadcasts();
        if messages.is_empty() {
            return;
        }

        for (name, addr) in &targets {
            if let Err(e) = self.send(*addr, &messages).await {
                tracing::debug!(member = %name, error = %e, "Failed to send gossip");
            }
        }
    }

    /// Queued updates plus delegate broadcasts, within one packet's budget
    fn collect_broadcasts(&self) -> Vec<Message> {
        let budget = PACKET_BUDGET - PACKET_OVERHEAD;
        let limit = retransmit_limit(self.timing.retransmit_mult, self.table().live_count());

        let mut messages = {
            let mut queue = self.queue();
            if queue.is_empty() {
                Vec::new()
            } else {
                queue.take(budget, limit)
            }
        };

        let used: usize = messages.iter().map(Message::encoded_len).sum();
        let mut remaining = budget.saturating_sub(used);
        if remaining <= USER_MESSAGE_OVERHEAD {
            return messages;
        }

        for payload in self.delegate.get_broadcasts(USER_MESSAGE_OVERHEAD, remaining) {
            let size = payload.len() + USER_MESSAGE_OVERHEAD;
            if size > remaining {
                tracing::warn!(
                    bytes = payload.len(),
                    limit = remaining.saturating_sub(USER_MESSAGE_OVERHEAD),
                    "Dropping oversized user broadcast"
                );
                continue;
            }
            remaining -= size;
            messages.push(Message::User { payload });
        }

        messages
    }

    // === Anti-entropy ===

    async fn run_push_pull(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = self.timing.push_pull_interval;
        if period.is_zero() {
            return;
        }
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Some((name, addr)) = self.random_peers(1).pop() {
                        if let Err(e) = self.push_pull(addr, false).await {
                            tracing::debug!(member = %name, error = %e, "Push/pull failed");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Push/pull shutting down");
                    break;
                }
            }
        }
    }

    async fn join_peer(&self, peer: &str) -> Result<()> {
        let target = BindAddress::parse(peer).map_err(|e| GossiperError::Join(e.to_string()))?;
        let addr = resolve(&target)
            .await
            .map_err(|e| GossiperError::Join(format!("failed to resolve {peer}: {e}")))?;
        self.push_pull(addr, true).await
    }

    /// Send our table and state to `addr` and wait for its reply
    async fn push_pull(&self, addr: SocketAddr, join: bool) -> Result<()> {
        let (seq, rx) = self.register();
        let request = Message::PushPull(PushPull {
            seq,
            from: self.name.clone(),
            join,
            reply: false,
            members: self.table().snapshot(),
            state: self.delegate.local_state(join),
        });

        if let Err(e) = self.send(addr, &[request]).await {
            self.pending().remove(&seq);
            return Err(e);
        }

        let timeout = self.timing.push_pull_timeout;
        if self.await_reply(seq, rx, timeout).await {
            return Ok(());
        }

        let reason = format!("no push/pull reply from {addr} within {timeout:?}");
        Err(if join {
            GossiperError::Join(reason)
        } else {
            GossiperError::Transport(reason)
        })
    }
}

fn log_transition(update: &Message) {
    match update {
        Message::Alive { name, addr, incarnation, .. } => {
            tracing::info!(member = %name, addr = %addr, incarnation, "Member alive");
        }
        Message::Suspect { name, from, .. } => {
            tracing::warn!(member = %name, from = %from, "Member suspected");
        }
        Message::Dead { name, from, .. } if name == from => {
            tracing::info!(member = %name, "Member left the cluster");
        }
        Message::Dead { name, from, .. } => {
            tracing::warn!(member = %name, from = %from, "Member declared dead");
        }
        _ => {}
    }
}
