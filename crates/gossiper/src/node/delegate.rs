//! Engine callbacks for this node.
//!
//! The node exchanges no application data: broadcasts, state and metadata
//! are all empty. Callbacks only log, so they stay non-blocking and
//! bounded-time as the engine requires.

use std::sync::Weak;

use gossiper_membership::Delegate;

use super::NodeCore;

/// Delegate handed to the engine at creation.
///
/// Holds a weak link back to the node so the engine never keeps the node
/// alive; after the node is gone callbacks keep answering as "detached".
pub struct NodeDelegate {
    node: Weak<NodeCore>,
}

impl NodeDelegate {
    pub(super) fn new(node: Weak<NodeCore>) -> Self {
        Self { node }
    }

    fn with_name<R>(&self, f: impl FnOnce(&str) -> R) -> R {
        match self.node.upgrade() {
            Some(node) => f(&node.name),
            None => f("<detached>"),
        }
    }
}

impl Delegate for NodeDelegate {
    fn node_meta(&self, limit: usize) -> Vec<u8> {
        self.with_name(|node| tracing::trace!(node = %node, limit, "Node meta requested"));
        Vec::new()
    }

    fn notify_msg(&self, msg: &[u8]) {
        self.with_name(|node| {
            tracing::debug!(node = %node, bytes = msg.len(), "Received user message")
        });
    }

    fn get_broadcasts(&self, overhead: usize, limit: usize) -> Vec<Vec<u8>> {
        self.with_name(|node| {
            tracing::trace!(node = %node, overhead, limit, "Broadcasts requested")
        });
        Vec::new()
    }

    fn local_state(&self, join: bool) -> Vec<u8> {
        self.with_name(|node| tracing::trace!(node = %node, join, "Local state requested"));
        Vec::new()
    }

    fn merge_remote_state(&self, buf: &[u8], join: bool) {
        self.with_name(|node| {
            tracing::debug!(node = %node, bytes = buf.len(), join, "Discarding remote state")
        });
    }
}
