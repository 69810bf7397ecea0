//! Background directory watcher feeding the [`ChangeSignal`].
//!
//! The watcher thread runs a small state machine:
//!
//! ```text
//!   INITIALIZING ─▶ WAITING ─┬─ event ───▶ SIGNALED ─▶ WAITING
//!                      ▲     ├─ timeout ─▶ (cancelled?) ─no─┘
//!                      │     │                 │yes
//!                      └─────┘                 ▼
//!                                          CANCELLED ─▶ TERMINATED
//! ```
//!
//! Waits are bounded by a timeout so the cancel flag is observed within one
//! period; there is no forced interrupt. Errors the watcher cannot recover
//! from are sent over a channel to the owner of the [`WatchHandle`] and end
//! the thread.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, trace};

use crate::signal::ChangeSignal;

/// Bounded wait between cancellation checks.
pub const DEFAULT_WATCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("failed to watch {}: {source}", path.display())]
    Setup {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
    #[error("failed to re-arm watch on {}: {reason}", path.display())]
    Rearm { path: PathBuf, reason: String },
    #[error("directory watch on {} failed: {reason}", path.display())]
    Wait { path: PathBuf, reason: String },
    #[error("failed to spawn watcher thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("watcher thread panicked")]
    Panicked,
}

/// Result of one bounded wait on the change source.
#[derive(Debug)]
pub enum WaitOutcome {
    Event,
    Timeout,
    Error(WatchError),
}

/// OS-level change notification primitive.
pub trait ChangeSource: Send {
    /// Blocks for at most `timeout` waiting for a modification event.
    fn wait(&mut self, timeout: Duration) -> WaitOutcome;

    /// Prepares the source for the next event.
    fn rearm(&mut self) -> Result<(), WatchError>;
}

/// `notify`-backed change source for a single, non-recursive directory.
pub struct NotifySource {
    directory: PathBuf,
    _watcher: RecommendedWatcher,
    events: Receiver<notify::Result<Event>>,
}

impl std::fmt::Debug for NotifySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifySource")
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

impl NotifySource {
    /// Subscribes to modifications inside `directory`.
    pub fn open(directory: &Path) -> Result<Self, WatchError> {
        let setup_error = |source: notify::Error| WatchError::Setup {
            path: directory.to_path_buf(),
            source,
        };
        let (tx, events) = unbounded::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let _ = tx.send(result);
        })
        .map_err(setup_error)?;
        watcher
            .watch(directory, RecursiveMode::NonRecursive)
            .map_err(setup_error)?;

        Ok(Self {
            directory: directory.to_path_buf(),
            _watcher: watcher,
            events,
        })
    }
}

fn is_modification(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Modify(_) | EventKind::Create(_))
}

impl ChangeSource for NotifySource {
    fn wait(&mut self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(Ok(event)) if is_modification(&event.kind) => {
                    trace!(kind = ?event.kind, paths = ?event.paths, "directory modified");
                    return WaitOutcome::Event;
                }
                Ok(Ok(event)) => {
                    trace!(kind = ?event.kind, "ignoring directory event");
                }
                Ok(Err(err)) => {
                    return WaitOutcome::Error(WatchError::Wait {
                        path: self.directory.clone(),
                        reason: err.to_string(),
                    });
                }
                Err(RecvTimeoutError::Timeout) => return WaitOutcome::Timeout,
                Err(RecvTimeoutError::Disconnected) => {
                    return WaitOutcome::Error(WatchError::Wait {
                        path: self.directory.clone(),
                        reason: "notification backend stopped".to_owned(),
                    });
                }
            }
        }
    }

    fn rearm(&mut self) -> Result<(), WatchError> {
        // The backend stays subscribed on its own; a vanished directory can
        // never produce another event.
        if self.directory.is_dir() {
            Ok(())
        } else {
            Err(WatchError::Rearm {
                path: self.directory.clone(),
                reason: "directory no longer exists".to_owned(),
            })
        }
    }
}

/// Watcher thread states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Initializing,
    Waiting,
    Signaled,
    TimedOut,
    Cancelled,
    Terminated,
}

/// Owner side of a running watcher thread.
#[derive(Debug)]
pub struct WatchHandle {
    signal: Arc<ChangeSignal>,
    fatal: Receiver<WatchError>,
    thread: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// Starts a `notify` watch on `directory` and spawns the watcher thread.
    ///
    /// Failing to acquire the watch is returned here; it is fatal at startup.
    pub fn watch_directory(
        directory: &Path,
        signal: Arc<ChangeSignal>,
        timeout: Duration,
    ) -> Result<Self, WatchError> {
        let source = NotifySource::open(directory)?;
        info!(dir = %directory.display(), ?timeout, "watching for shader changes");
        Self::spawn(source, signal, timeout)
    }

    /// Spawns the watcher thread over an already acquired change source.
    pub fn spawn<S>(
        source: S,
        signal: Arc<ChangeSignal>,
        timeout: Duration,
    ) -> Result<Self, WatchError>
    where
        S: ChangeSource + 'static,
    {
        let (fatal_tx, fatal) = bounded(1);
        let thread_signal = Arc::clone(&signal);
        let thread = thread::Builder::new()
            .name("shader-watch".to_owned())
            .spawn(move || run(source, &thread_signal, &fatal_tx, timeout))
            .map_err(WatchError::Spawn)?;

        Ok(Self {
            signal,
            fatal,
            thread: Some(thread),
        })
    }

    /// Non-blocking check for an error that ended the watcher thread.
    pub fn poll_fatal(&self) -> Option<WatchError> {
        self.fatal.try_recv().ok()
    }

    /// Sets the cancel flag and joins the thread.
    ///
    /// Returns within one wait timeout. A fatal error the thread reported but
    /// nobody polled is returned here.
    pub fn shutdown(mut self) -> Result<(), WatchError> {
        self.signal.cancel();
        if let Some(thread) = self.thread.take() {
            thread.join().map_err(|_| WatchError::Panicked)?;
        }
        match self.fatal.try_recv() {
            Ok(err) => Err(err),
            Err(_) => Ok(()),
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.signal.cancel();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run<S: ChangeSource>(
    mut source: S,
    signal: &ChangeSignal,
    fatal: &Sender<WatchError>,
    timeout: Duration,
) {
    let mut state = WatchState::Initializing;
    loop {
        trace!(?state, "watcher state");
        state = match state {
            WatchState::Initializing | WatchState::TimedOut => {
                if signal.is_cancelled() {
                    WatchState::Cancelled
                } else {
                    WatchState::Waiting
                }
            }
            WatchState::Waiting => match source.wait(timeout) {
                WaitOutcome::Event => WatchState::Signaled,
                WaitOutcome::Timeout => WatchState::TimedOut,
                WaitOutcome::Error(err) => {
                    error!(error = %err, "directory watch failed");
                    let _ = fatal.try_send(err);
                    WatchState::Terminated
                }
            },
            WatchState::Signaled => {
                signal.raise();
                debug!("shader directory changed");
                match source.rearm() {
                    Ok(()) if signal.is_cancelled() => WatchState::Cancelled,
                    Ok(()) => WatchState::Waiting,
                    Err(err) => {
                        error!(error = %err, "directory watch cannot continue");
                        let _ = fatal.try_send(err);
                        WatchState::Terminated
                    }
                }
            }
            WatchState::Cancelled => {
                debug!("watcher cancelled");
                WatchState::Terminated
            }
            WatchState::Terminated => break,
        };
    }
}
