use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::Notify;

struct Inner {
    signaled: AtomicBool,
    notify: Notify,
}

/// Process-wide, one-way cancellation flag.
///
/// Readable from blocking threads through [`CancelFlag::is_signaled`] and
/// awaitable from tasks through [`CancelFlag::signaled`]. Once set it stays
/// set.
#[derive(Clone)]
pub struct CancelFlag {
    inner: Arc<Inner>,
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelFlag {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                signaled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Sets the flag. Returns `true` only for the call that actually set it,
    /// so repeated triggers collapse into one.
    pub fn trigger(&self) -> bool {
        let first = !self.inner.signaled.swap(true, Ordering::SeqCst);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    pub fn is_signaled(&self) -> bool {
        self.inner.signaled.load(Ordering::SeqCst)
    }

    pub async fn signaled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_signaled() {
            return;
        }

        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn only_first_trigger_wins() {
        let flag = CancelFlag::new();
        let other = flag.clone();

        assert!(!flag.is_signaled());
        assert!(other.trigger());
        assert!(!flag.trigger());
        assert!(flag.is_signaled());
    }

    #[test]
    fn concurrent_triggers_collapse() {
        let flag = CancelFlag::new();

        let winners: usize = (0..8)
            .map(|_| {
                let flag = flag.clone();
                std::thread::spawn(move || flag.trigger())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap() as usize)
            .sum();

        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn waiters_wake_on_trigger() {
        let flag = CancelFlag::new();
        let waiter = tokio::spawn({
            let flag = flag.clone();
            async move { flag.signaled().await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        flag.trigger();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .unwrap();
    }

    #[tokio::test]
    async fn already_signaled_returns_immediately() {
        let flag = CancelFlag::new();
        flag.trigger();

        tokio::time::timeout(Duration::from_millis(100), flag.signaled())
            .await
            .expect("returned immediately");
    }
}
