//! Fixed-interval heartbeat for Mudgate.
//!
//! A [`Heartbeat`] holds a set of [`Updatable`] participants and, once
//! started, calls every participant's `update` on each tick. The
//! connection registry uses it to poll client sockets for liveness.
//!
//! # Fault isolation
//!
//! Each tick iterates a snapshot of the participant set, so registering or
//! unregistering never waits for a sweep. Updates in a tick run
//! concurrently; an error or panic in one participant is logged and
//! counted but never stops the others.
//!
//! ```ignore
//! let heartbeat = Heartbeat::new(HeartbeatConfig::with_interval_ms(500));
//! heartbeat.register(connection.clone());
//! heartbeat.start();
//! // ...
//! heartbeat.stop().await;
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::join_all;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant as TokioInstant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

// ---------------------------------------------------------------------------
// Participants
// ---------------------------------------------------------------------------

/// Error returned by a failed participant update.
pub type UpdateError = Box<dyn std::error::Error + Send + Sync>;

/// Something the heartbeat updates on every tick.
#[async_trait]
pub trait Updatable: Send + Sync + 'static {
    /// Short label for log lines.
    fn label(&self) -> String;

    /// Performs one round of upkeep.
    async fn update(&self) -> Result<(), UpdateError>;
}

/// Identity of a participant: the address of its shared allocation.
fn key_of<T: ?Sized>(participant: &Arc<T>) -> usize {
    Arc::as_ptr(participant) as *const () as usize
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Heartbeat configuration.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Time between ticks.
    pub interval: Duration,
    /// Fraction of `interval` (0.0–1.0) a sweep may take before a warning
    /// is logged. Default: 0.80.
    pub budget_warn_threshold: f64,
    /// Random jitter (0..max) added to the first tick so heartbeats
    /// started together do not fire in lockstep.
    pub initial_jitter: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            budget_warn_threshold: 0.80,
            initial_jitter: Duration::from_millis(2),
        }
    }
}

impl HeartbeatConfig {
    /// Shortest interval the heartbeat will run at.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

    /// Config with the given interval in milliseconds and default settings.
    pub fn with_interval_ms(ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(ms),
            ..Default::default()
        }
    }

    /// Clamps out-of-range values so the config is safe to use.
    ///
    /// - `interval` is raised to [`Self::MIN_INTERVAL`].
    /// - `budget_warn_threshold` is clamped to `0.0..=1.0`.
    pub fn validated(mut self) -> Self {
        if self.interval < Self::MIN_INTERVAL {
            warn!(
                interval_ms = self.interval.as_millis() as u64,
                "heartbeat interval below minimum, clamping"
            );
            self.interval = Self::MIN_INTERVAL;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self
    }
}

// ---------------------------------------------------------------------------
// Reports and metrics
// ---------------------------------------------------------------------------

/// Outcome of one sweep over the participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Tick number (starts at 1).
    pub tick: u64,
    /// Participants whose update succeeded.
    pub updated: usize,
    /// Participants whose update returned an error or panicked.
    pub failed: usize,
    /// Wall-clock time the sweep took.
    pub elapsed: Duration,
}

/// Runtime metrics, updated after every sweep.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatMetrics {
    pub total_ticks: u64,
    /// Sweeps that took longer than the interval.
    pub total_overruns: u64,
    /// Failed participant updates, summed over all ticks.
    pub total_failures: u64,
    pub last_sweep: Duration,
    pub max_sweep: Duration,
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

struct Shared {
    participants: DashMap<usize, Arc<dyn Updatable>>,
    tick: AtomicU64,
    metrics: Mutex<HeartbeatMetrics>,
}

impl Shared {
    fn metrics(&self) -> MutexGuard<'_, HeartbeatMetrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn sweep(&self, budget: Duration, warn_threshold: f64) -> SweepReport {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed) + 1;
        let started = Instant::now();

        // Snapshot first: no map lock is held while participants run.
        let snapshot: Vec<Arc<dyn Updatable>> = self
            .participants
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let outcomes = join_all(snapshot.iter().map(|participant| async move {
            match AssertUnwindSafe(participant.update()).catch_unwind().await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    error!(
                        tick,
                        participant = %participant.label(),
                        error = %e,
                        "heartbeat update failed"
                    );
                    false
                }
                Err(_) => {
                    error!(
                        tick,
                        participant = %participant.label(),
                        "heartbeat update panicked"
                    );
                    false
                }
            }
        }))
        .await;

        let failed = outcomes.iter().filter(|ok| !**ok).count();
        let elapsed = started.elapsed();

        let utilization = elapsed.as_secs_f64() / budget.as_secs_f64();
        if utilization >= 1.0 {
            warn!(
                tick,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = budget.as_secs_f64() * 1000.0,
                "heartbeat sweep overran its interval"
            );
        } else if utilization >= warn_threshold {
            warn!(
                tick,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = budget.as_secs_f64() * 1000.0,
                "heartbeat sweep approaching its interval"
            );
        }

        {
            let mut metrics = self.metrics();
            metrics.total_ticks += 1;
            metrics.total_failures += failed as u64;
            if utilization >= 1.0 {
                metrics.total_overruns += 1;
            }
            metrics.last_sweep = elapsed;
            if elapsed > metrics.max_sweep {
                metrics.max_sweep = elapsed;
            }
        }

        trace!(tick, participants = snapshot.len(), failed, "heartbeat tick");

        SweepReport {
            tick,
            updated: outcomes.len() - failed,
            failed,
            elapsed,
        }
    }
}

struct Runner {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// A periodic scheduler that updates every registered participant.
pub struct Heartbeat {
    config: HeartbeatConfig,
    shared: Arc<Shared>,
    runner: Mutex<Option<Runner>>,
}

impl Heartbeat {
    /// Creates a stopped heartbeat with no participants.
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config: config.validated(),
            shared: Arc::new(Shared {
                participants: DashMap::new(),
                tick: AtomicU64::new(0),
                metrics: Mutex::new(HeartbeatMetrics::default()),
            }),
            runner: Mutex::new(None),
        }
    }

    /// Adds a participant. Returns `false` (and changes nothing) if it is
    /// already registered.
    pub fn register(&self, participant: Arc<dyn Updatable>) -> bool {
        match self.shared.participants.entry(key_of(&participant)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                debug!(participant = %participant.label(), "heartbeat participant registered");
                slot.insert(participant);
                true
            }
        }
    }

    /// Removes a participant. Returns `false` if it was not registered.
    pub fn unregister<T: ?Sized>(&self, participant: &Arc<T>) -> bool {
        self.shared
            .participants
            .remove(&key_of(participant))
            .is_some()
    }

    /// Whether `participant` is currently registered.
    pub fn contains<T: ?Sized>(&self, participant: &Arc<T>) -> bool {
        self.shared.participants.contains_key(&key_of(participant))
    }

    /// Number of registered participants.
    pub fn participant_count(&self) -> usize {
        self.shared.participants.len()
    }

    /// Removes every participant.
    pub fn clear(&self) {
        self.shared.participants.clear();
    }

    /// The configured interval.
    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Starts ticking at the configured interval.
    ///
    /// Returns `false` and logs a warning if already running.
    pub fn start(&self) -> bool {
        self.start_with_interval(self.config.interval)
    }

    /// Starts ticking at `interval`, overriding the configured one.
    ///
    /// Returns `false` and logs a warning if already running.
    pub fn start_with_interval(&self, interval: Duration) -> bool {
        let interval = interval.max(HeartbeatConfig::MIN_INTERVAL);
        let mut runner = self.runner();
        if runner.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            warn!("heartbeat already running, start ignored");
            return false;
        }

        let jitter = if self.config.initial_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max = self.config.initial_jitter.as_micros() as u64;
            Duration::from_micros(rand::rng().random_range(0..max.max(1)))
        };

        let cancel = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let warn_threshold = self.config.budget_warn_threshold;
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let first = TokioInstant::now() + interval + jitter;
            let mut ticker = time::interval_at(first, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        // A sweep in progress always runs to completion.
                        shared.sweep(interval, warn_threshold).await;
                    }
                }
            }
            debug!("heartbeat loop exited");
        });

        debug!(interval_ms = interval.as_millis() as u64, "heartbeat started");
        *runner = Some(Runner { cancel, handle });
        true
    }

    /// Stops ticking and waits for the tick task to finish.
    ///
    /// No tick fires after this returns. Stopping a stopped heartbeat is
    /// a no-op.
    pub async fn stop(&self) {
        let runner = self.runner().take();
        let Some(Runner { cancel, handle }) = runner else {
            return;
        };
        cancel.cancel();
        if let Err(e) = handle.await {
            error!(error = %e, "heartbeat task ended abnormally");
        }
        debug!("heartbeat stopped");
    }

    /// Whether the tick task is running.
    pub fn is_running(&self) -> bool {
        self.runner()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Runs one sweep immediately, outside the timer.
    pub async fn tick_now(&self) -> SweepReport {
        self.shared
            .sweep(self.config.interval, self.config.budget_warn_threshold)
            .await
    }

    /// Number of ticks so far.
    pub fn tick_count(&self) -> u64 {
        self.shared.tick.load(Ordering::Relaxed)
    }

    /// Snapshot of current metrics.
    pub fn metrics(&self) -> HeartbeatMetrics {
        self.shared.metrics().clone()
    }

    fn runner(&self) -> MutexGuard<'_, Option<Runner>> {
        self.runner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new(HeartbeatConfig::default())
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        if let Some(runner) = self.runner().take() {
            runner.cancel.cancel();
        }
    }
}
