use std::sync::atomic::{AtomicBool, Ordering};

/// Lock-free handshake between the directory watcher and the frame loop.
///
/// Two independent flags, each with a single writer:
///
/// ```text
///   watcher thread ──raise()──▶ pending ──take()──▶ frame loop
///   frame loop     ──cancel()─▶ cancel  ──is_cancelled()──▶ watcher thread
/// ```
///
/// `take` is a compare-and-swap from `true` to `false`, so every raised signal
/// is consumed at most once and any number of raises between two polls
/// collapse into a single reload attempt.
#[derive(Debug, Default)]
pub struct ChangeSignal {
    pending: AtomicBool,
    cancel: AtomicBool,
}

impl ChangeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the watched directory as changed. Called by the watcher only.
    pub fn raise(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    /// Consumes a pending change. Returns `true` at most once per raise.
    pub fn take(&self) -> bool {
        self.pending
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Peeks at the pending flag without consuming it.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Requests watcher shutdown. Never reset.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}
