//! Interrupt handling.
//!
//! Every interrupt triggers a graceful leave. The first one does the work;
//! later ones find the leave latch already set and return at once.

use std::future::Future;
use std::io;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use gossiper_membership::Membership;

use crate::node::Gossiper;

/// A stream of interrupt notifications
pub trait InterruptSource: Send + 'static {
    /// Resolves on the next interrupt, or `None` once no more can arrive
    fn next_interrupt(&mut self) -> impl Future<Output = Option<()>> + Send;
}

/// Interrupts from Ctrl+C / SIGINT.
///
/// The OS handler is installed by [`CtrlC::register`], so a failure to
/// listen surfaces at startup instead of inside the handler task.
pub struct CtrlC {
    #[cfg(unix)]
    inner: tokio::signal::unix::Signal,
    #[cfg(windows)]
    inner: tokio::signal::windows::CtrlC,
}

impl CtrlC {
    /// Install the interrupt handler. Must be called inside the runtime.
    pub fn register() -> io::Result<Self> {
        #[cfg(unix)]
        let inner = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
        #[cfg(windows)]
        let inner = tokio::signal::windows::ctrl_c()?;

        Ok(Self { inner })
    }
}

impl InterruptSource for CtrlC {
    async fn next_interrupt(&mut self) -> Option<()> {
        self.inner.recv().await
    }
}

impl InterruptSource for mpsc::Receiver<()> {
    async fn next_interrupt(&mut self) -> Option<()> {
        self.recv().await
    }
}

/// Spawn a task that leaves the cluster on every interrupt from `source`.
///
/// The task runs until the source closes.
pub fn attach_shutdown_handler<M, S>(gossiper: Gossiper<M>, mut source: S) -> JoinHandle<()>
where
    M: Membership,
    S: InterruptSource,
{
    tokio::spawn(async move {
        while source.next_interrupt().await.is_some() {
            tracing::info!(node = %gossiper.name(), "Received interrupt, leaving cluster");
            gossiper.leave().await;
        }
    })
}
