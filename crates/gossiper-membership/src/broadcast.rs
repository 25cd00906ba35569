//! Queue of membership updates awaiting dissemination.

use std::collections::VecDeque;

use crate::message::Message;

/// Times each update is retransmitted in a cluster of `cluster_size` nodes:
/// `mult * ceil(log10(cluster_size + 1))`.
pub fn retransmit_limit(mult: u32, cluster_size: usize) -> u32 {
    let scale = ((cluster_size + 1) as f64).log10().ceil() as u32;
    mult * scale
}

#[derive(Debug)]
struct Queued {
    message: Message,
    size: usize,
    transmits: u32,
}

/// Updates are sent least-transmitted first and dropped once they reach
/// the retransmit limit. Queueing an update about a member supersedes any
/// older queued update about the same member.
#[derive(Debug, Default)]
pub struct BroadcastQueue {
    items: VecDeque<Queued>,
}

impl BroadcastQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn enqueue(&mut self, message: Message) {
        if let Some(subject) = message.subject() {
            self.items.retain(|q| q.message.subject() != Some(subject));
        }
        let size = message.encoded_len();
        self.items.push_back(Queued {
            message,
            size,
            transmits: 0,
        });
    }

    /// Take as many updates as fit in `budget` bytes for one packet
    pub fn take(&mut self, budget: usize, limit: u32) -> Vec<Message> {
        self.items.make_contiguous().sort_by_key(|q| q.transmits);

        let mut used = 0usize;
        let mut taken = Vec::new();
        for queued in self.items.iter_mut() {
            let next = used.saturating_add(queued.size);
            if next > budget {
                continue;
            }
            used = next;
            queued.transmits += 1;
            taken.push(queued.message.clone());
        }

        self.items.retain(|q| q.transmits < limit);
        taken
    }
}
