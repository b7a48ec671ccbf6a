use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A cooperative cancellation flag polled at the suspension points named in
/// §5 (before each network call, between per-entry sync/validate steps,
/// during backoff waits). A small hand-rolled `Arc<AtomicBool>` +
/// `tokio::sync::Notify` pair rather than a `tokio-util::CancellationToken`
/// dependency -- nothing else in the workspace needs `tokio-util`, and this
/// is the entire surface a job requires.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves immediately if already cancelled, otherwise waits for the
    /// next [`CancellationToken::cancel`] call. Useful inside a job that
    /// wants to race a suspension (e.g. a backoff sleep) against
    /// cancellation instead of polling.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.inner.notify.notified().await;
    }
}
