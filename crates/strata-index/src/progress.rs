use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Observer of a long-running index build.
///
/// Cancellation is cooperative: the build polls [`is_cancelled`] between
/// batches and at every diff callback and stops at the next such point.
///
/// [`is_cancelled`]: ProgressListener::is_cancelled
pub trait ProgressListener: Send + Sync {
    fn started(&self) {}

    /// Total number of feature changes applied so far.
    fn progress(&self, _count: u64) {}

    fn is_cancelled(&self) -> bool {
        false
    }

    fn complete(&self) {}
}

/// Listener recording progress in atomics, cancellable from any thread.
#[derive(Debug, Default)]
pub struct DefaultProgressListener {
    started: AtomicBool,
    completed: AtomicBool,
    cancelled: AtomicBool,
    count: AtomicU64,
}

impl DefaultProgressListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Relaxed)
    }
}

impl ProgressListener for DefaultProgressListener {
    fn started(&self) {
        self.started.store(true, Ordering::Relaxed);
    }

    fn progress(&self, count: u64) {
        self.count.store(count, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn complete(&self) {
        self.completed.store(true, Ordering::Relaxed);
    }
}
