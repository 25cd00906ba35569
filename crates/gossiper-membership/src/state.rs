//! Local member table and the incarnation rules that order updates.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use gossiper_common::{Member, MemberState};

use crate::message::Message;

/// A member as tracked by the engine.
///
/// `incarnation` is a logical clock owned by the member itself; only the
/// member may bump it, which is how it refutes false suspicion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub name: String,
    pub addr: SocketAddr,
    pub incarnation: u64,
    pub state: MemberState,
    pub meta: Vec<u8>,

    #[serde(skip)]
    pub changed_at: Option<Instant>,
}

impl MemberRecord {
    pub fn alive(name: String, addr: SocketAddr, incarnation: u64, meta: Vec<u8>) -> Self {
        Self {
            name,
            addr,
            incarnation,
            state: MemberState::Alive,
            meta,
            changed_at: Some(Instant::now()),
        }
    }

    /// The update that reproduces this record on a peer
    pub fn to_update(&self) -> Message {
        match self.state {
            MemberState::Alive => Message::Alive {
                name: self.name.clone(),
                addr: self.addr,
                incarnation: self.incarnation,
                meta: self.meta.clone(),
            },
            MemberState::Suspect => Message::Suspect {
                name: self.name.clone(),
                incarnation: self.incarnation,
                from: String::new(),
            },
            MemberState::Dead => Message::Dead {
                name: self.name.clone(),
                incarnation: self.incarnation,
                from: String::new(),
            },
            MemberState::Left => Message::Dead {
                name: self.name.clone(),
                incarnation: self.incarnation,
                from: self.name.clone(),
            },
        }
    }

    fn to_member(&self) -> Member {
        Member {
            name: self.name.clone(),
            address: self.addr,
            state: self.state,
            meta: self.meta.clone(),
        }
    }

    fn elapsed_since_change(&self, now: Instant) -> Duration {
        self.changed_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default()
    }
}

/// Result of applying an update to the table
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Stale or redundant
    Ignored,
    /// Table changed; the update should be re-gossiped
    Changed,
    /// Rumour about the local node; carries the refuting Alive to gossip
    Refuted(Message),
}

/// The engine's view of the cluster
#[derive(Debug)]
pub struct MemberTable {
    local: MemberRecord,
    peers: HashMap<String, MemberRecord>,
}

impl MemberTable {
    pub fn new(local: MemberRecord) -> Self {
        Self {
            local,
            peers: HashMap::new(),
        }
    }

    pub fn local(&self) -> &MemberRecord {
        &self.local
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&MemberRecord> {
        if name == self.local.name {
            Some(&self.local)
        } else {
            self.peers.get(name)
        }
    }

    /// Local node has announced its departure
    pub fn is_leaving(&self) -> bool {
        self.local.state == MemberState::Left
    }

    /// Number of live members, including the local node
    pub fn live_count(&self) -> usize {
        1 + self.peers.values().filter(|m| m.state.is_live()).count()
    }

    /// Live remote members, as probe/gossip targets
    pub fn live_peers(&self) -> Vec<(String, SocketAddr)> {
        self.peers
            .values()
            .filter(|m| m.state.is_live())
            .map(|m| (m.name.clone(), m.addr))
            .collect()
    }

    /// Live view, sorted by name
    pub fn members(&self) -> Vec<Member> {
        let mut members: Vec<Member> = std::iter::once(&self.local)
            .chain(self.peers.values())
            .filter(|m| m.state.is_live())
            .map(MemberRecord::to_member)
            .collect();
        members.sort_by(|a, b| a.name.cmp(&b.name));
        members
    }

    /// Every known record, for push/pull
    pub fn snapshot(&self) -> Vec<MemberRecord> {
        std::iter::once(&self.local)
            .chain(self.peers.values())
            .cloned()
            .collect()
    }

    /// Apply a membership update (Alive, Suspect or Dead)
    pub fn apply(&mut self, update: &Message, now: Instant) -> Outcome {
        match update {
            Message::Alive {
                name,
                addr,
                incarnation,
                meta,
            } => self.apply_alive(name, *addr, *incarnation, meta, now),
            Message::Suspect {
                name, incarnation, ..
            } => self.apply_suspect(name, *incarnation, now),
            Message::Dead {
                name,
                incarnation,
                from,
            } => self.apply_dead(name, *incarnation, from, now),
            _ => Outcome::Ignored,
        }
    }

    fn apply_alive(
        &mut self,
        name: &str,
        addr: SocketAddr,
        incarnation: u64,
        meta: &[u8],
        now: Instant,
    ) -> Outcome {
        if name == self.local.name {
            // Someone claims a newer incarnation of us (e.g. a previous run)
            if incarnation > self.local.incarnation && !self.is_leaving() {
                return Outcome::Refuted(self.refute(incarnation));
            }
            return Outcome::Ignored;
        }

        match self.peers.get_mut(name) {
            None => {
                let mut record = MemberRecord::alive(name.to_string(), addr, incarnation, meta.to_vec());
                record.changed_at = Some(now);
                self.peers.insert(name.to_string(), record);
                Outcome::Changed
            }
            Some(existing) if incarnation > existing.incarnation => {
                existing.addr = addr;
                existing.meta = meta.to_vec();
                existing.incarnation = incarnation;
                existing.state = MemberState::Alive;
                existing.changed_at = Some(now);
                Outcome::Changed
            }
            Some(_) => Outcome::Ignored,
        }
    }

    fn apply_suspect(&mut self, name: &str, incarnation: u64, now: Instant) -> Outcome {
        if name == self.local.name {
            return self.rumour_about_local(incarnation);
        }

        match self.peers.get_mut(name) {
            Some(existing)
                if existing.state == MemberState::Alive && incarnation >= existing.incarnation =>
            {
                existing.state = MemberState::Suspect;
                existing.incarnation = incarnation;
                existing.changed_at = Some(now);
                Outcome::Changed
            }
            _ => Outcome::Ignored,
        }
    }

    fn apply_dead(&mut self, name: &str, incarnation: u64, from: &str, now: Instant) -> Outcome {
        if name == self.local.name {
            return self.rumour_about_local(incarnation);
        }

        match self.peers.get_mut(name) {
            Some(existing) if existing.state.is_live() && incarnation >= existing.incarnation => {
                existing.state = if from == name {
                    MemberState::Left
                } else {
                    MemberState::Dead
                };
                existing.incarnation = incarnation;
                existing.changed_at = Some(now);
                Outcome::Changed
            }
            _ => Outcome::Ignored,
        }
    }

    fn rumour_about_local(&mut self, incarnation: u64) -> Outcome {
        if self.is_leaving() || incarnation < self.local.incarnation {
            return Outcome::Ignored;
        }
        Outcome::Refuted(self.refute(incarnation))
    }

    /// Bump the local incarnation past `observed` and return the Alive to gossip
    fn refute(&mut self, observed: u64) -> Message {
        self.local.incarnation = observed.max(self.local.incarnation) + 1;
        self.local.state = MemberState::Alive;
        self.local.changed_at = Some(Instant::now());
        self.local.to_update()
    }

    /// Replace an unspecified local IP with one a peer observed for us.
    /// Returns true if the local address changed.
    pub fn learn_local_addr(&mut self, observed: SocketAddr) -> bool {
        let local = self.local.addr;
        if !local.ip().is_unspecified()
            || observed.ip().is_unspecified()
            || observed.port() != local.port()
        {
            return false;
        }
        self.local.addr = observed;
        true
    }

    /// Mark the local node as departed; `None` if already leaving
    pub fn mark_left(&mut self) -> Option<Message> {
        if self.is_leaving() {
            return None;
        }
        self.local.state = MemberState::Left;
        self.local.changed_at = Some(Instant::now());
        Some(self.local.to_update())
    }

    /// A probe to `name` went unanswered
    pub fn suspect(&mut self, name: &str, now: Instant) -> Option<Message> {
        let existing = self.peers.get_mut(name)?;
        if existing.state != MemberState::Alive {
            return None;
        }
        existing.state = MemberState::Suspect;
        existing.changed_at = Some(now);
        Some(Message::Suspect {
            name: existing.name.clone(),
            incarnation: existing.incarnation,
            from: self.local.name.clone(),
        })
    }

    /// Declare dead every suspect that failed to refute within `timeout`
    pub fn expire_suspects(&mut self, now: Instant, timeout: Duration) -> Vec<Message> {
        let local = self.local.name.clone();
        self.peers
            .values_mut()
            .filter(|m| m.state == MemberState::Suspect && m.elapsed_since_change(now) >= timeout)
            .map(|m| {
                m.state = MemberState::Dead;
                m.changed_at = Some(now);
                Message::Dead {
                    name: m.name.clone(),
                    incarnation: m.incarnation,
                    from: local.clone(),
                }
            })
            .collect()
    }

    /// Forget dead and departed members older than `reclaim`
    pub fn reap(&mut self, now: Instant, reclaim: Duration) -> Vec<String> {
        let expired: Vec<String> = self
            .peers
            .values()
            .filter(|m| !m.state.is_live() && m.elapsed_since_change(now) >= reclaim)
            .map(|m| m.name.clone())
            .collect();
        for name in &expired {
            self.peers.remove(name);
        }
        expired
    }
}
