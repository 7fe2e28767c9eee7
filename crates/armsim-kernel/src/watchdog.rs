//! [`Watchdog`] – per-arm liveness supervisor.
//!
//! Every arm owns one watchdog.  The arm calls [`Watchdog::refresh`] whenever
//! it makes progress; the watchdog runs its own periodic check on a
//! dedicated Tokio task, decoupled from the workspace tick, and invokes a
//! callback when no refresh has arrived within the trigger delta.
//!
//! The callback fires once per *expiry window*: a window is identified by
//! the refresh timestamp it started from, so a watchdog that keeps being
//! ignored does not fire again until somebody refreshes (or resets) it.
//!
//! States:
//!
//! | State | Checks | Leaves via |
//! |---|---|---|
//! | [`WatchdogState::Active`] | yes | `pause`, `stop` |
//! | [`WatchdogState::Paused`] | suspended | `resume`, `stop` |
//! | [`WatchdogState::Stopped`] | never again | terminal |
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use armsim_kernel::watchdog::{Watchdog, WatchdogConfig, WatchdogState};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = WatchdogConfig {
//!     check_interval: Duration::from_millis(10),
//!     trigger_delta: Duration::from_secs(1),
//! };
//! let wd = Watchdog::spawn("arm-1", config, |_handle| {
//!     // recovery logic goes here
//! });
//! wd.refresh();
//! wd.stop().await;
//! assert_eq!(wd.state(), WatchdogState::Stopped);
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a [`Watchdog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    /// Expiry is evaluated on every check.
    Active,
    /// Expiry evaluation is suspended; the schedule keeps running.
    Paused,
    /// The checking task has been told to exit.  Terminal.
    Stopped,
}

/// Timing parameters of a [`Watchdog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// Period of the expiry check.
    pub check_interval: Duration,
    /// Maximum silence tolerated between refreshes.
    pub trigger_delta: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(10),
            trigger_delta: Duration::from_secs(1),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Shared state
// ────────────────────────────────────────────────────────────────────────────

struct Shared {
    id: String,
    /// Anchor for the monotonic microsecond clock below.
    origin: Instant,
    /// Microseconds since `origin` of the most recent refresh.
    last_refresh: AtomicU64,
    expiries: AtomicU64,
    state_tx: watch::Sender<WatchdogState>,
}

impl Shared {
    fn now_micros(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// Cheap, cloneable control surface of a [`Watchdog`].
///
/// Handed to the expiry callback so it can refresh or pause the watchdog
/// that invoked it, and usable from any thread.
#[derive(Clone)]
pub struct WatchdogHandle {
    shared: Arc<Shared>,
}

impl WatchdogHandle {
    /// Identifier given at spawn time (used in log fields).
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Record liveness.  The refresh timestamp never moves backwards.
    pub fn refresh(&self) {
        let now = self.shared.now_micros();
        self.shared.last_refresh.fetch_max(now, Ordering::AcqRel);
    }

    /// Set the refresh timestamp to now unconditionally.
    pub fn reset(&self) {
        let now = self.shared.now_micros();
        self.shared.last_refresh.store(now, Ordering::Release);
    }

    /// Suspend expiry checks.  No-op unless active.
    pub fn pause(&self) {
        let paused = self.shared.state_tx.send_if_modified(|state| {
            if *state == WatchdogState::Active {
                *state = WatchdogState::Paused;
                true
            } else {
                false
            }
        });
        if paused {
            debug!(watchdog = %self.shared.id, "watchdog paused");
        }
    }

    /// Resume expiry checks.  Does not touch the refresh timestamp.  No-op
    /// unless paused.
    pub fn resume(&self) {
        let resumed = self.shared.state_tx.send_if_modified(|state| {
            if *state == WatchdogState::Paused {
                *state = WatchdogState::Active;
                true
            } else {
                false
            }
        });
        if resumed {
            debug!(watchdog = %self.shared.id, "watchdog resumed");
        }
    }

    pub fn state(&self) -> WatchdogState {
        *self.shared.state_tx.borrow()
    }

    /// Time elapsed since the last refresh.
    pub fn since_refresh(&self) -> Duration {
        let last = self.shared.last_refresh.load(Ordering::Acquire);
        Duration::from_micros(self.shared.now_micros().saturating_sub(last))
    }

    /// Refresh timestamp, measured from the watchdog's creation.
    pub fn last_refresh(&self) -> Duration {
        Duration::from_micros(self.shared.last_refresh.load(Ordering::Acquire))
    }

    /// Number of times the expiry callback has been invoked.
    pub fn expiries(&self) -> u64 {
        self.shared.expiries.load(Ordering::Acquire)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Watchdog
// ────────────────────────────────────────────────────────────────────────────

/// Owned liveness timer backed by a dedicated Tokio task.
///
/// Call [`stop`][Self::stop] to shut it down deterministically.  Dropping a
/// watchdog that was never stopped signals the task and aborts it, so no
/// check outlives its owner either way.
pub struct Watchdog {
    handle: WatchdogHandle,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Watchdog {
    /// Start a watchdog in the [`WatchdogState::Active`] state with a fresh
    /// refresh timestamp.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F>(id: impl Into<String>, config: WatchdogConfig, callback: F) -> Self
    where
        F: Fn(&WatchdogHandle) + Send + Sync + 'static,
    {
        let (state_tx, state_rx) = watch::channel(WatchdogState::Active);
        let shared = Arc::new(Shared {
            id: id.into(),
            origin: Instant::now(),
            last_refresh: AtomicU64::new(0),
            expiries: AtomicU64::new(0),
            state_tx,
        });
        let handle = WatchdogHandle { shared };

        let task = tokio::spawn(supervise(handle.clone(), config, callback, state_rx));
        info!(
            watchdog = %handle.id(),
            check_interval_ms = config.check_interval.as_millis() as u64,
            trigger_delta_ms = config.trigger_delta.as_millis() as u64,
            "watchdog started"
        );

        Self {
            handle,
            task: Mutex::new(Some(task)),
        }
    }

    /// A cloneable handle to this watchdog.
    pub fn handle(&self) -> WatchdogHandle {
        self.handle.clone()
    }

    pub fn id(&self) -> &str {
        self.handle.id()
    }

    /// See [`WatchdogHandle::refresh`].
    pub fn refresh(&self) {
        self.handle.refresh();
    }

    /// See [`WatchdogHandle::reset`].
    pub fn reset(&self) {
        self.handle.reset();
    }

    /// See [`WatchdogHandle::pause`].
    pub fn pause(&self) {
        self.handle.pause();
    }

    /// See [`WatchdogHandle::resume`].
    pub fn resume(&self) {
        self.handle.resume();
    }

    pub fn state(&self) -> WatchdogState {
        self.handle.state()
    }

    pub fn expiries(&self) -> u64 {
        self.handle.expiries()
    }

    /// Stop the watchdog and wait for its checking task to exit.
    ///
    /// Once this returns no further expiry check or callback will run.
    /// Calling it again is a no-op.
    pub async fn stop(&self) {
        self.handle.shared.state_tx.send_replace(WatchdogState::Stopped);
        let task = self.task.lock().take();
        let Some(task) = task else {
            return;
        };
        if let Err(e) = task.await {
            warn!(watchdog = %self.handle.id(), error = %e, "watchdog task ended abnormally");
        }
        info!(watchdog = %self.handle.id(), "watchdog stopped");
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            self.handle.shared.state_tx.send_replace(WatchdogState::Stopped);
            task.abort();
            debug!(watchdog = %self.handle.id(), "watchdog dropped without stop; task aborted");
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Checking task
// ────────────────────────────────────────────────────────────────────────────

async fn supervise<F>(
    handle: WatchdogHandle,
    config: WatchdogConfig,
    callback: F,
    mut state_rx: watch::Receiver<WatchdogState>,
) where
    F: Fn(&WatchdogHandle) + Send + Sync + 'static,
{
    let trigger_micros = config.trigger_delta.as_micros() as u64;
    let mut ticker = tokio::time::interval(config.check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Refresh timestamp of the window the callback last fired for.
    let mut fired_window: Option<u64> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        match *state_rx.borrow_and_update() {
            WatchdogState::Stopped => break,
            WatchdogState::Paused => continue,
            WatchdogState::Active => {}
        }

        let window = handle.shared.last_refresh.load(Ordering::Acquire);
        if fired_window == Some(window) {
            continue;
        }
        let silence = handle.shared.now_micros().saturating_sub(window);
        if silence > trigger_micros {
            fired_window = Some(window);
            handle.shared.expiries.fetch_add(1, Ordering::AcqRel);
            info!(
                watchdog = %handle.id(),
                silent_ms = silence / 1_000,
                "watchdog expired"
            );
            callback(&handle);
        }
    }

    debug!(watchdog = %handle.id(), "watchdog checker exited");
}
