//! One-shot completion signal.

use tokio::sync::watch;

/// Single-assignment completion flag.
///
/// Only the first `complete` has an effect, and no call ever blocks. Every
/// `wait` resolves once the flag is set, including waits that start later.
#[derive(Debug)]
pub struct Completion {
    tx: watch::Sender<bool>,
}

impl Completion {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Set the flag. Returns true for the call that actually set it.
    pub fn complete(&self) -> bool {
        self.tx.send_if_modified(|done| {
            if *done {
                false
            } else {
                *done = true;
                true
            }
        })
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this only returns once set
        let _ = rx.wait_for(|done| *done).await;
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_complete_fires_once() {
        let done = Completion::new();
        assert!(done.complete());
        assert!(!done.complete());
        assert!(!done.complete());
    }

    #[tokio::test]
    async fn test_wait_after_complete_returns() {
        let done = Completion::new();
        done.complete();
        tokio::time::timeout(Duration::from_secs(1), done.wait())
            .await
            .expect("wait should not block once complete");
    }

    #[tokio::test]
    async fn test_all_waiters_released() {
        let done = Arc::new(Completion::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let done = done.clone();
                tokio::spawn(async move { done.wait().await })
            })
            .collect();

        tokio::task::yield_now().await;
        done.complete();

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter released")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_concurrent_completes_never_block() {
        let done = Arc::new(Completion::new());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let done = done.clone();
                tokio::spawn(async move { done.complete() })
            })
            .collect();

        let mut fired = 0;
        for task in tasks {
            if tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap() {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }
}
