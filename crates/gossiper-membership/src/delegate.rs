//! Callback surface the engine invokes on behalf of the application.

/// Application hooks driven by the membership engine.
///
/// Every method is called synchronously from the engine's own network
/// tasks. Implementations must return in bounded time and must never block
/// or call back into blocking node operations: a slow delegate stalls
/// protocol processing for the whole node.
pub trait Delegate: Send + Sync + 'static {
    /// Metadata attached to this node's alive announcements.
    /// Must not exceed `limit` bytes.
    fn node_meta(&self, limit: usize) -> Vec<u8>;

    /// A user message arrived. The buffer belongs to the engine and is
    /// reused after this call returns; copy anything that must outlive it.
    fn notify_msg(&self, msg: &[u8]);

    /// User broadcasts to piggyback on the next gossip round. Each buffer
    /// must fit within `limit - overhead` bytes; oversized ones are dropped.
    fn get_broadcasts(&self, overhead: usize, limit: usize) -> Vec<Vec<u8>>;

    /// Application state sent during a push/pull exchange.
    fn local_state(&self, join: bool) -> Vec<u8>;

    /// Application state received during a push/pull exchange.
    fn merge_remote_state(&self, buf: &[u8], join: bool);
}

/// Delegate used when the engine is created without one
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDelegate;

impl Delegate for NoopDelegate {
    fn node_meta(&self, _limit: usize) -> Vec<u8> {
        Vec::new()
    }

    fn notify_msg(&self, _msg: &[u8]) {}

    fn get_broadcasts(&self, _overhead: usize, _limit: usize) -> Vec<Vec<u8>> {
        Vec::new()
    }

    fn local_state(&self, _join: bool) -> Vec<u8> {
        Vec::new()
    }

    fn merge_remote_state(&self, _buf: &[u8], _join: bool) {}
}
