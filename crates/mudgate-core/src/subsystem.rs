//! The subsystem contract and its state machine.
//!
//! Every long-lived service (listener, connection registry, gatekeeper)
//! implements [`Subsystem`]. The supervisor only ever talks to services
//! through this trait, so it can start, stop, and observe them as a group
//! without knowing what they do.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::SubsystemError;

/// Capacity of each subsystem's event channel. Slow observers lag and
/// skip events rather than blocking the subsystem.
const EVENT_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// SubsystemState
// ---------------------------------------------------------------------------

/// Lifecycle state of a subsystem.
///
/// ```text
/// Stopped ──(start)──→ Running ──(stop)──→ Stopping ──→ Stopped
///                         │
///                         └──(unrecoverable fault)──→ Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubsystemState {
    Stopped,
    Running,
    Stopping,
    Error,
}

impl fmt::Display for SubsystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "Stopped",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Error => "Error",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// SystemEvent
// ---------------------------------------------------------------------------

/// What kind of thing a [`SystemEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The source subsystem moved between two states.
    StateChange {
        from: SubsystemState,
        to: SubsystemState,
    },
    /// Informational notice that did not change state (a client joined,
    /// a handshake finished, ...).
    Notice,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StateChange { .. } => f.write_str("StateChange"),
            Self::Notice => f.write_str("Notice"),
        }
    }
}

/// An immutable record of something a subsystem did.
///
/// Purely observational: receiving one never changes any state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemEvent {
    pub kind: EventKind,
    /// Name of the subsystem that produced the event.
    pub source: String,
    pub message: String,
}

impl fmt::Display for SystemEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} - {}", self.kind, self.source, self.message)
    }
}

// ---------------------------------------------------------------------------
// Subsystem
// ---------------------------------------------------------------------------

/// A named, independently startable and stoppable service.
///
/// Implementations must treat a `start` while not `Stopped` and a `stop`
/// while not `Running` as logged no-ops. Transitions of one subsystem are
/// strictly ordered; implementations serialize their own `start`/`stop`.
#[async_trait]
pub trait Subsystem: Send + Sync + 'static {
    /// Unique name, used as the supervisor's registry key.
    fn name(&self) -> &str;

    /// Current lifecycle state.
    fn state(&self) -> SubsystemState;

    /// Starts the subsystem.
    async fn start(&self) -> Result<(), SubsystemError>;

    /// Stops the subsystem.
    async fn stop(&self) -> Result<(), SubsystemError>;

    /// Subscribes to this subsystem's events.
    fn subscribe(&self) -> broadcast::Receiver<SystemEvent>;
}

// ---------------------------------------------------------------------------
// StateCell
// ---------------------------------------------------------------------------

/// State holder and event publisher shared by subsystem implementations.
///
/// Publishing never blocks: events go onto a broadcast channel, and having
/// no subscribers is not an error.
pub struct StateCell {
    name: String,
    state: Mutex<SubsystemState>,
    events: broadcast::Sender<SystemEvent>,
}

impl StateCell {
    /// Creates a cell in the `Stopped` state.
    pub fn new(name: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            name: name.into(),
            state: Mutex::new(SubsystemState::Stopped),
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub fn get(&self) -> SubsystemState {
        *self.lock()
    }

    /// Moves to `to` and publishes a `StateChange` event if the state
    /// actually changed. Returns the previous state.
    pub fn transition(
        &self,
        to: SubsystemState,
        message: impl Into<String>,
    ) -> SubsystemState {
        let from = {
            let mut state = self.lock();
            std::mem::replace(&mut *state, to)
        };
        if from != to {
            let message = message.into();
            tracing::info!(
                subsystem = %self.name,
                %from,
                %to,
                "{message}"
            );
            self.publish(EventKind::StateChange { from, to }, message);
        }
        from
    }

    /// Moves to `to` only if the current state is `expected`.
    ///
    /// Returns the actual state on mismatch, leaving it untouched.
    pub fn transition_from(
        &self,
        expected: SubsystemState,
        to: SubsystemState,
        message: impl Into<String>,
    ) -> Result<(), SubsystemState> {
        {
            let mut state = self.lock();
            if *state != expected {
                return Err(*state);
            }
            *state = to;
        }
        if expected != to {
            let message = message.into();
            tracing::info!(
                subsystem = %self.name,
                from = %expected,
                %to,
                "{message}"
            );
            self.publish(
                EventKind::StateChange { from: expected, to },
                message,
            );
        }
        Ok(())
    }

    /// Publishes a `Notice` event without touching the state.
    pub fn notify(&self, message: impl Into<String>) {
        self.publish(EventKind::Notice, message.into());
    }

    /// Subscribes to this cell's events.
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.events.subscribe()
    }

    fn publish(&self, kind: EventKind, message: String) {
        let event = SystemEvent {
            kind,
            source: self.name.clone(),
            message,
        };
        // No receivers is fine: events are best-effort.
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, SubsystemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for StateCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCell")
            .field("name", &self.name)
            .field("state", &self.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_cell_is_stopped() {
        let cell = StateCell::new("Sentinel");
        assert_eq!(cell.name(), "Sentinel");
        assert_eq!(cell.get(), SubsystemState::Stopped);
    }

    #[test]
    fn test_transition_publishes_state_change() {
        let cell = StateCell::new("Sentinel");
        let mut rx = cell.subscribe();

        let prev = cell.transition(SubsystemState::Running, "started");
        assert_eq!(prev, SubsystemState::Stopped);

        let event = rx.try_recv().expect("event should be published");
        assert_eq!(event.source, "Sentinel");
        assert_eq!(event.message, "started");
        assert_eq!(
            event.kind,
            EventKind::StateChange {
                from: SubsystemState::Stopped,
                to: SubsystemState::Running,
            }
        );
    }

    #[test]
    fn test_same_state_transition_is_silent() {
        let cell = StateCell::new("Sentinel");
        let mut rx = cell.subscribe();
        cell.transition(SubsystemState::Stopped, "noop");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_transition_from_rejects_wrong_state() {
        let cell = StateCell::new("Sentinel");
        cell.transition(SubsystemState::Running, "started");

        let result = cell.transition_from(
            SubsystemState::Stopped,
            SubsystemState::Running,
            "again",
        );
        assert_eq!(result, Err(SubsystemState::Running));
        assert_eq!(cell.get(), SubsystemState::Running);
    }

    #[test]
    fn test_publish_without_subscribers_does_not_fail() {
        let cell = StateCell::new("Lonely");
        cell.notify("nobody listening");
        cell.transition(SubsystemState::Error, "broken");
        assert_eq!(cell.get(), SubsystemState::Error);
    }

    #[test]
    fn test_event_display() {
        let event = SystemEvent {
            kind: EventKind::Notice,
            source: "GateKeeper".into(),
            message: "hello".into(),
        };
        assert_eq!(event.to_string(), "Notice - GateKeeper - hello");
    }
}
