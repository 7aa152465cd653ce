//! The live set of client connections.
//!
//! [`ConnectionRegistry`] knows every connection that is logged in or
//! logging in. It announces arrivals and departures, broadcasts to all
//! members, and registers each member with the [`Heartbeat`] so dead
//! sockets are noticed even when nobody is talking to them.
//!
//! # Concurrency
//!
//! Members live in a `DashMap`. Subscribe and unsubscribe come from the
//! accept path, handshake tasks, and heartbeat-triggered disconnects all at
//! once; the map serializes them per shard. Anything that does I/O first
//! collects a snapshot of the members and then sends with no map lock held.
//!
//! # Eviction
//!
//! The registry hooks itself into each member's disconnect. However a
//! connection dies (explicit unsubscribe, failed probe, peer close,
//! gatekeeper giving up), the hook removes it from the map and from the
//! heartbeat.
//!
//! # Slow members
//!
//! Each send of a broadcast is bounded by the registry's send timeout. A
//! member whose send does not finish in time is disconnected, so a peer
//! that stops reading cannot hold up announcements or new subscriptions.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::join_all;
use mudgate_core::{StateCell, Subsystem, SubsystemError, SubsystemState, SystemEvent};
use mudgate_heartbeat::Heartbeat;
use mudgate_transport::{ClientConnection, ConnectionId, DisconnectHook, Transport, TransportError};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

/// Default subsystem name.
pub const REGISTRY_NAME: &str = "ConnectionRegistry";

/// Default limit on one member's share of a broadcast.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Subsystem name.
    pub name: String,
    /// How long a single member's send may take before it is disconnected.
    pub send_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            name: REGISTRY_NAME.to_string(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

/// Outcome of a broadcast to every member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastResult {
    /// Members the message was attempted on.
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// One entry per failed member.
    pub errors: Vec<(ConnectionId, String)>,
}

impl BroadcastResult {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// The directory of live connections.
pub struct ConnectionRegistry<S: Transport> {
    members: DashMap<ConnectionId, Arc<ClientConnection<S>>>,
    heartbeat: Arc<Heartbeat>,
    send_timeout: Duration,
    state: StateCell,
    /// Serializes start/stop.
    lifecycle: Mutex<()>,
    this: Weak<Self>,
}

impl<S: Transport> ConnectionRegistry<S> {
    /// Creates a stopped registry that polls members with `heartbeat`.
    pub fn new(heartbeat: Arc<Heartbeat>) -> Arc<Self> {
        Self::with_config(RegistryConfig::default(), heartbeat)
    }

    /// Like [`new`](Self::new) with a custom subsystem name.
    pub fn with_name(name: impl Into<String>, heartbeat: Arc<Heartbeat>) -> Arc<Self> {
        Self::with_config(
            RegistryConfig {
                name: name.into(),
                ..RegistryConfig::default()
            },
            heartbeat,
        )
    }

    pub fn with_config(config: RegistryConfig, heartbeat: Arc<Heartbeat>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            members: DashMap::new(),
            heartbeat,
            send_timeout: config.send_timeout,
            state: StateCell::new(config.name),
            lifecycle: Mutex::new(()),
            this: this.clone(),
        })
    }

    pub fn heartbeat(&self) -> &Arc<Heartbeat> {
        &self.heartbeat
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Adds `connection` if it is not already a member.
    ///
    /// On add, every existing member hears about the newcomer and the
    /// connection is registered with the heartbeat. Returns `false` for a
    /// duplicate, which is logged and otherwise ignored.
    pub async fn subscribe(&self, connection: Arc<ClientConnection<S>>) -> bool {
        let id = connection.id();
        match self.members.entry(id) {
            Entry::Occupied(_) => {
                warn!(conn_id = %id, "connection already subscribed");
                return false;
            }
            Entry::Vacant(slot) => {
                slot.insert(connection.clone());
            }
        }
        self.heartbeat.register(connection.clone());

        // Fires at once if the connection died in the meantime.
        if let Some(this) = self.this.upgrade() {
            let hook: Arc<dyn DisconnectHook> = this;
            connection.add_disconnect_hook(Arc::downgrade(&hook));
        }
        if !self.members.contains_key(&id) {
            debug!(conn_id = %id, "connection closed while subscribing");
            return false;
        }

        info!(
            conn_id = %id,
            name = %connection.name(),
            members = self.members.len(),
            "client subscribed"
        );
        let notice = format!("New Client Subscribed: {}", connection.name());
        self.state.notify(notice.clone());
        self.broadcast_line(&notice).await;
        true
    }

    /// Removes the member with `id`, announces the departure, and
    /// disconnects it.
    ///
    /// Returns `false` if there was no such member.
    pub async fn unsubscribe(&self, id: ConnectionId) -> bool {
        let Some((_, member)) = self.members.remove(&id) else {
            return false;
        };
        self.heartbeat.unregister(&member);

        info!(conn_id = %id, "client unsubscribed");
        let notice = format!("Client {} unsubscribed.", member.name());
        self.state.notify(notice.clone());
        self.broadcast_line(&notice).await;
        member.disconnect().await;
        true
    }

    /// Disconnects every member.
    pub async fn unsubscribe_all(&self) {
        let members = self.snapshot();
        if !members.is_empty() {
            info!(count = members.len(), "disconnecting all clients");
        }
        self.members.clear();
        for member in &members {
            self.heartbeat.unregister(member);
        }
        join_all(members.iter().map(|member| member.disconnect())).await;
    }

    /// Sends `message` to every member.
    ///
    /// Sends run concurrently; one member failing does not affect the rest.
    /// A member that does not take the message within the send timeout is
    /// disconnected.
    pub async fn broadcast(&self, message: &str) -> BroadcastResult {
        let members = self.snapshot();
        let outcomes = join_all(members.iter().map(|member| async move {
            let sent = tokio::time::timeout(self.send_timeout, member.try_send(message)).await;
            let outcome = match sent {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        conn_id = %member.id(),
                        timeout_ms = self.send_timeout.as_millis() as u64,
                        "member stalled on send, disconnecting"
                    );
                    member.disconnect().await;
                    Err(TransportError::SendTimedOut(member.id()))
                }
            };
            (member.id(), outcome)
        }))
        .await;

        let mut result = BroadcastResult {
            total: outcomes.len(),
            ..BroadcastResult::default()
        };
        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => result.succeeded += 1,
                Err(e) => {
                    debug!(conn_id = %id, error = %e, "broadcast to member failed");
                    result.failed += 1;
                    result.errors.push((id, e.to_string()));
                }
            }
        }
        result
    }

    /// Like [`broadcast`](Self::broadcast) with `\r\n` appended.
    pub async fn broadcast_line(&self, message: &str) -> BroadcastResult {
        self.broadcast(&format!("{message}\r\n")).await
    }

    /// Point-in-time copy of the members.
    pub fn snapshot(&self) -> Vec<Arc<ClientConnection<S>>> {
        self.members
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<ClientConnection<S>>> {
        self.members.get(&id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn evict(&self, id: ConnectionId) {
        if let Some((_, connection)) = self.members.remove(&id) {
            self.heartbeat.unregister(&connection);
            debug!(conn_id = %id, members = self.members.len(), "disconnected client evicted");
        }
    }
}

impl<S: Transport> DisconnectHook for ConnectionRegistry<S> {
    fn on_disconnect(&self, id: ConnectionId) {
        self.evict(id);
    }
}

#[async_trait]
impl<S: Transport> Subsystem for ConnectionRegistry<S> {
    fn name(&self) -> &str {
        self.state.name()
    }

    fn state(&self) -> SubsystemState {
        self.state.get()
    }

    /// Clears anything left from a previous run and starts the heartbeat.
    async fn start(&self) -> Result<(), SubsystemError> {
        let _lifecycle = self.lifecycle.lock().await;
        let current = self.state.get();
        if current != SubsystemState::Stopped {
            warn!(subsystem = %self.name(), state = %current, "start ignored: not stopped");
            return Ok(());
        }

        self.members.clear();
        self.heartbeat.clear();
        self.heartbeat.start();
        self.state
            .transition(SubsystemState::Running, "connection registry started");
        Ok(())
    }

    /// Stops the heartbeat and disconnects every member.
    async fn stop(&self) -> Result<(), SubsystemError> {
        let _lifecycle = self.lifecycle.lock().await;
        let current = self.state.get();
        if current != SubsystemState::Running {
            warn!(subsystem = %self.name(), state = %current, "stop ignored: not running");
            return Ok(());
        }

        self.state
            .transition(SubsystemState::Stopping, "connection registry stopping");
        self.heartbeat.stop().await;
        self.unsubscribe_all().await;
        self.state
            .transition(SubsystemState::Stopped, "connection registry stopped");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.state.subscribe()
    }
}

impl<S: Transport> std::fmt::Debug for ConnectionRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("name", &self.state.name())
            .field("state", &self.state.get())
            .field("members", &self.members.len())
            .field("send_timeout", &self.send_timeout)
            .finish()
    }
}
