//! The subsystem supervisor.
//!
//! Owns the named set of [`Subsystem`]s, starts and stops them as a group,
//! and re-publishes every subsystem event on one stream.
//!
//! Subsystems start in registration order and stop in reverse, so anything
//! registered later may depend on what was registered before it. A failure
//! (error or panic) in one subsystem is logged and reported but never keeps
//! the others from starting or stopping.
//!
//! Event forwarding needs a Tokio runtime. A subsystem registered outside
//! one is subscribed right away, and its forwarder starts on the next
//! [`start_all`](SubsystemSupervisor::start_all) or
//! [`stop_all`](SubsystemSupervisor::stop_all), so no event is lost.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures_util::FutureExt;
use mudgate_core::{Subsystem, SubsystemError, SubsystemState, SystemEvent};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::MudgateError;
use crate::logging::LogSink;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Builds the well-known subsystem set on first use.
pub type SubsystemFactory = Box<dyn Fn() -> Vec<Arc<dyn Subsystem>> + Send + Sync>;

/// What a group start or stop did.
#[derive(Debug, Default)]
pub struct LifecycleReport {
    /// Subsystems whose state changed as requested.
    pub changed: Vec<String>,
    /// Subsystems left alone because they were already in the target state.
    pub skipped: Vec<String>,
    pub failed: Vec<(String, SubsystemError)>,
}

impl LifecycleReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Starts, stops, and observes a group of subsystems.
pub struct SubsystemSupervisor {
    subsystems: RwLock<Vec<Arc<dyn Subsystem>>>,
    defaults: Option<SubsystemFactory>,
    events: broadcast::Sender<SystemEvent>,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
    /// Event sources registered without a runtime, awaiting a forwarder.
    unforwarded: Mutex<Vec<(String, broadcast::Receiver<SystemEvent>)>>,
    log_sink: Option<LogSink>,
    /// Serializes group operations.
    lifecycle: tokio::sync::Mutex<()>,
}

impl SubsystemSupervisor {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            subsystems: RwLock::new(Vec::new()),
            defaults: None,
            events,
            forwarders: Mutex::new(Vec::new()),
            unforwarded: Mutex::new(Vec::new()),
            log_sink: None,
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Sets the factory [`start_all`](Self::start_all) uses when nothing
    /// has been registered.
    pub fn with_defaults(mut self, factory: SubsystemFactory) -> Self {
        self.defaults = Some(factory);
        self
    }

    /// Sets the log sink released during [`shutdown`](Self::shutdown).
    pub fn with_log_sink(mut self, sink: LogSink) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Adds a subsystem and starts forwarding its events.
    ///
    /// May be called outside a Tokio runtime. The subsystem's events are
    /// then buffered and forwarded once [`start_all`](Self::start_all) or
    /// [`stop_all`](Self::stop_all) runs.
    ///
    /// # Errors
    /// [`MudgateError::DuplicateSubsystem`] if the name is taken; the
    /// registry is left unchanged.
    pub fn register_subsystem(&self, subsystem: Arc<dyn Subsystem>) -> Result<(), MudgateError> {
        let name = subsystem.name().to_string();
        {
            let mut subsystems = self.write();
            if subsystems.iter().any(|s| s.name() == name) {
                warn!(subsystem = %name, "duplicate subsystem registration ignored");
                return Err(MudgateError::DuplicateSubsystem(name));
            }
            subsystems.push(subsystem.clone());
        }
        self.forward_events(&subsystem);
        debug!(subsystem = %name, "subsystem registered");
        Ok(())
    }

    fn forward_events(&self, subsystem: &Arc<dyn Subsystem>) {
        let name = subsystem.name().to_string();
        let source = subsystem.subscribe();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => self.spawn_forwarder(&runtime, name, source),
            Err(_) => {
                debug!(subsystem = %name, "no runtime yet, forwarding deferred");
                lock(&self.unforwarded).push((name, source));
            }
        }
    }

    /// Starts forwarders for sources registered outside a runtime.
    fn forward_deferred(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let deferred: Vec<_> = lock(&self.unforwarded).drain(..).collect();
        for (name, source) in deferred {
            self.spawn_forwarder(&runtime, name, source);
        }
    }

    fn spawn_forwarder(
        &self,
        runtime: &tokio::runtime::Handle,
        name: String,
        mut source: broadcast::Receiver<SystemEvent>,
    ) {
        let sink = self.events.clone();
        let task = runtime.spawn(async move {
            loop {
                match source.recv().await {
                    Ok(event) => {
                        // No subscribers is fine.
                        let _ = sink.send(event);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(subsystem = %name, missed, "event forwarder lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        lock(&self.forwarders).push(task);
    }

    /// Starts every subsystem that is not already running.
    ///
    /// If nothing is registered, the default set is registered first.
    pub async fn start_all(&self) -> LifecycleReport {
        let _lifecycle = self.lifecycle.lock().await;
        self.populate_defaults();
        self.forward_deferred();

        let mut report = LifecycleReport::default();
        for subsystem in self.snapshot() {
            let name = subsystem.name().to_string();
            if subsystem.state() == SubsystemState::Running {
                debug!(subsystem = %name, "already running");
                report.skipped.push(name);
                continue;
            }
            match guarded(&name, subsystem.start()).await {
                Ok(()) if subsystem.state() == SubsystemState::Running => {
                    report.changed.push(name);
                }
                Ok(()) => {
                    warn!(subsystem = %name, state = %subsystem.state(), "subsystem did not start");
                    report.skipped.push(name);
                }
                Err(e) => {
                    error!(subsystem = %name, error = %e, "subsystem failed to start");
                    report.failed.push((name, e));
                }
            }
        }
        info!(
            started = report.changed.len(),
            failed = report.failed.len(),
            "start_all finished"
        );
        report
    }

    /// Stops every running subsystem, last registered first.
    pub async fn stop_all(&self) -> LifecycleReport {
        let _lifecycle = self.lifecycle.lock().await;
        self.forward_deferred();

        let mut report = LifecycleReport::default();
        for subsystem in self.snapshot().into_iter().rev() {
            let name = subsystem.name().to_string();
            if subsystem.state() != SubsystemState::Running {
                report.skipped.push(name);
                continue;
            }
            match guarded(&name, subsystem.stop()).await {
                Ok(()) => report.changed.push(name),
                Err(e) => {
                    error!(subsystem = %name, error = %e, "subsystem failed to stop");
                    report.failed.push((name, e));
                }
            }
        }
        info!(
            stopped = report.changed.len(),
            failed = report.failed.len(),
            "stop_all finished"
        );
        report
    }

    /// Stops everything, then releases the log sink. Never fails.
    pub async fn shutdown(&self) {
        info!("shutting down");
        let report = self.stop_all().await;
        for (name, e) in &report.failed {
            warn!(subsystem = %name, error = %e, "ignored during shutdown");
        }
        if let Some(sink) = &self.log_sink {
            sink.begin_shutdown();
            sink.close();
        }
    }

    /// `(name, state)` of every subsystem, in registration order.
    pub fn list_subsystems(&self) -> Vec<(String, SubsystemState)> {
        self.read()
            .iter()
            .map(|s| (s.name().to_string(), s.state()))
            .collect()
    }

    /// # Errors
    /// [`MudgateError::UnknownSubsystem`] if no subsystem has that name.
    pub fn subsystem(&self, name: &str) -> Result<Arc<dyn Subsystem>, MudgateError> {
        self.read()
            .iter()
            .find(|s| s.name() == name)
            .cloned()
            .ok_or_else(|| MudgateError::UnknownSubsystem(name.to_string()))
    }

    /// # Errors
    /// [`MudgateError::UnknownSubsystem`] if no subsystem has that name.
    pub fn subsystem_state(&self, name: &str) -> Result<SubsystemState, MudgateError> {
        self.subsystem(name).map(|s| s.state())
    }

    /// Receives every event from every registered subsystem.
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.events.subscribe()
    }

    fn populate_defaults(&self) {
        if !self.read().is_empty() {
            return;
        }
        let Some(factory) = &self.defaults else {
            return;
        };
        for subsystem in factory() {
            if let Err(e) = self.register_subsystem(subsystem) {
                warn!(error = %e, "default subsystem not registered");
            }
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn Subsystem>> {
        self.read().clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<dyn Subsystem>>> {
        self.subsystems.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<dyn Subsystem>>> {
        self.subsystems.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SubsystemSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SubsystemSupervisor {
    fn drop(&mut self) {
        for task in self
            .forwarders
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
    }
}

impl std::fmt::Debug for SubsystemSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubsystemSupervisor")
            .field("subsystems", &self.list_subsystems())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs one start/stop, turning a panic into an error.
async fn guarded(
    name: &str,
    operation: impl std::future::Future<Output = Result<(), SubsystemError>>,
) -> Result<(), SubsystemError> {
    match AssertUnwindSafe(operation).catch_unwind().await {
        Ok(result) => result,
        Err(_) => Err(SubsystemError::Failed {
            name: name.to_string(),
            reason: "panicked".to_string(),
        }),
    }
}
