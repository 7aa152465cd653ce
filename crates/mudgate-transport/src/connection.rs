//! A single accepted client.
//!
//! [`ClientConnection`] owns one [`Transport`] and turns it into the
//! text-in, text-out interface the rest of the server talks to. Outbound
//! text is run through the connection's [`Markup`]; inbound bytes are
//! cleaned and wrapped via [`mudgate_core::text::clean_input`].
//!
//! # Disconnect
//!
//! A connection moves from connected to disconnected exactly once. The
//! first call to [`ClientConnection::disconnect`], whether it comes from a
//! caller, a failed probe, or a zero-length read, first aborts any send or
//! receive still in flight, then shuts the transport down, fires every
//! registered [`DisconnectHook`], wakes anyone waiting on
//! [`ClientConnection::closed`], and releases the transport. Later calls
//! return immediately.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use mudgate_core::Markup;
use mudgate_core::text::clean_input;
use mudgate_heartbeat::{Updatable, UpdateError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{ConnectionId, Liveness, Transport, TransportError};

/// How long a disconnect waits for the outbound side to shut down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Per-connection settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Column count inbound text is wrapped to.
    pub terminal_width: usize,
    /// Size of the buffer a single receive reads into.
    pub read_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            terminal_width: 80,
            read_buffer_size: 1024,
        }
    }
}

/// Notified synchronously, once, when a connection disconnects.
pub trait DisconnectHook: Send + Sync + 'static {
    fn on_disconnect(&self, id: ConnectionId);
}

enum Received {
    Data(usize),
    Eof,
    Failed(TransportError),
    TimedOut,
    Cancelled,
}

/// One connected client.
pub struct ClientConnection<S: Transport> {
    id: ConnectionId,
    name: String,
    peer: Option<SocketAddr>,
    terminal_width: AtomicUsize,
    read_buffer_size: usize,
    markup: Arc<dyn Markup>,
    /// `None` once released.
    transport: Mutex<Option<Arc<S>>>,
    /// `None` once the hooks have fired.
    hooks: Mutex<Option<Vec<Weak<dyn DisconnectHook>>>>,
    /// Cancelled as disconnect begins; in-flight I/O gives up on it.
    closing: CancellationToken,
    /// Cancelled once disconnect has finished.
    closed: CancellationToken,
}

impl<S: Transport> ClientConnection<S> {
    /// Wraps `transport` under a freshly allocated ID.
    pub fn new(transport: S, config: ConnectionConfig, markup: Arc<dyn Markup>) -> Self {
        let id = ConnectionId::next();
        let peer = transport.peer_addr();
        debug!(conn_id = %id, ?peer, "client connection created");
        Self {
            id,
            name: format!("Client_{}", id.into_inner()),
            peer,
            terminal_width: AtomicUsize::new(config.terminal_width),
            read_buffer_size: config.read_buffer_size.max(1),
            markup,
            transport: Mutex::new(Some(Arc::new(transport))),
            hooks: Mutex::new(Some(Vec::new())),
            closing: CancellationToken::new(),
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Display name, `Client_<id>`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn terminal_width(&self) -> usize {
        self.terminal_width.load(Ordering::Relaxed)
    }

    /// Changes the wrap width for subsequent receives.
    pub fn set_terminal_width(&self, width: usize) {
        self.terminal_width.store(width, Ordering::Relaxed);
    }

    /// Whether [`disconnect`](Self::disconnect) has run.
    pub fn is_disconnected(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection has disconnected.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Registers `hook` to run on disconnect.
    ///
    /// If the connection is already disconnected the hook runs now.
    pub fn add_disconnect_hook(&self, hook: Weak<dyn DisconnectHook>) {
        if let Some(hooks) = self.lock_hooks().as_mut() {
            hooks.push(hook);
            return;
        }
        if let Some(hook) = hook.upgrade() {
            hook.on_disconnect(self.id);
        }
    }

    /// Sends `text` after markup translation, reporting failures.
    ///
    /// Empty text is a no-op. If translation fails the raw text is sent.
    /// A write still pending when the connection disconnects is abandoned
    /// with [`TransportError::Disconnected`].
    pub async fn try_send(&self, text: &str) -> Result<(), TransportError> {
        if text.is_empty() {
            return Ok(());
        }
        if !self.is_connected().await {
            return Err(TransportError::Disconnected(self.id));
        }
        let transport = self
            .transport()
            .ok_or(TransportError::Disconnected(self.id))?;

        let translated = match self.markup.translate(text) {
            Ok(translated) => translated,
            Err(e) => {
                warn!(conn_id = %self.id, error = %e, "markup translation failed, sending raw text");
                text.to_string()
            }
        };
        tokio::select! {
            _ = self.closing.cancelled() => Err(TransportError::Disconnected(self.id)),
            written = transport.write_all(translated.as_bytes()) => written,
        }
    }

    /// Like [`try_send`](Self::try_send) with `\r\n` appended.
    pub async fn try_send_line(&self, text: &str) -> Result<(), TransportError> {
        self.try_send(&format!("{text}\r\n")).await
    }

    /// Sends `text`, logging instead of returning failures.
    pub async fn send(&self, text: &str) {
        if let Err(e) = self.try_send(text).await {
            debug!(conn_id = %self.id, error = %e, "send failed");
        }
    }

    /// Sends `text` followed by `\r\n`.
    pub async fn send_line(&self, text: &str) {
        self.send(&format!("{text}\r\n")).await;
    }

    /// Waits for the next chunk of input and returns it cleaned.
    ///
    /// Returns an empty string if the connection is or becomes
    /// disconnected. A zero-length read or a read error disconnects.
    pub async fn receive(&self) -> String {
        self.receive_inner(None).await
    }

    /// Like [`receive`](Self::receive), giving up after `timeout`.
    ///
    /// A timeout returns an empty string and leaves the connection open.
    pub async fn receive_timeout(&self, timeout: Duration) -> String {
        self.receive_inner(Some(timeout)).await
    }

    async fn receive_inner(&self, timeout: Option<Duration>) -> String {
        if !self.is_connected().await {
            return String::new();
        }
        let Some(transport) = self.transport() else {
            return String::new();
        };

        let mut buf = vec![0u8; self.read_buffer_size];
        let outcome = {
            let read = async {
                let result = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, transport.read(&mut buf)).await {
                        Ok(result) => result,
                        Err(_) => return Received::TimedOut,
                    },
                    None => transport.read(&mut buf).await,
                };
                match result {
                    Ok(0) => Received::Eof,
                    Ok(n) => Received::Data(n),
                    Err(e) => Received::Failed(e),
                }
            };
            tokio::select! {
                _ = self.closing.cancelled() => Received::Cancelled,
                outcome = read => outcome,
            }
        };
        drop(transport);

        match outcome {
            Received::Data(n) => clean_input(&buf[..n], self.terminal_width()),
            Received::Eof => {
                info!(conn_id = %self.id, "peer closed the connection");
                self.disconnect().await;
                String::new()
            }
            Received::Failed(e) => {
                warn!(conn_id = %self.id, error = %e, "receive failed");
                self.disconnect().await;
                String::new()
            }
            Received::TimedOut => {
                debug!(conn_id = %self.id, "receive timed out");
                String::new()
            }
            Received::Cancelled => String::new(),
        }
    }

    /// Probes the transport without blocking.
    ///
    /// A probe that finds the peer gone disconnects the connection.
    pub async fn is_connected(&self) -> bool {
        let Some(transport) = self.transport() else {
            return false;
        };
        let liveness = transport.probe();
        drop(transport);

        match liveness {
            Liveness::Alive => true,
            Liveness::Closed => {
                debug!(conn_id = %self.id, "probe found peer closed");
                self.disconnect().await;
                false
            }
            Liveness::Failed(e) => {
                warn!(conn_id = %self.id, error = %e, "probe failed");
                self.disconnect().await;
                false
            }
        }
    }

    /// Disconnects the client. Idempotent.
    pub async fn disconnect(&self) {
        let Some(transport) = self.take_transport() else {
            return;
        };
        self.closing.cancel();

        match tokio::time::timeout(SHUTDOWN_GRACE, transport.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(conn_id = %self.id, error = %e, "transport shutdown failed"),
            Err(_) => debug!(conn_id = %self.id, "transport shutdown timed out"),
        }

        let hooks = self.lock_hooks().take().unwrap_or_default();
        for hook in hooks.iter().filter_map(Weak::upgrade) {
            hook.on_disconnect(self.id);
        }

        self.closed.cancel();
        info!(conn_id = %self.id, name = %self.name, "client disconnected");
        drop(transport);
    }

    fn transport(&self) -> Option<Arc<S>> {
        self.lock_transport().clone()
    }

    fn take_transport(&self) -> Option<Arc<S>> {
        self.lock_transport().take()
    }

    fn lock_transport(&self) -> MutexGuard<'_, Option<Arc<S>>> {
        self.transport
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_hooks(&self) -> MutexGuard<'_, Option<Vec<Weak<dyn DisconnectHook>>>> {
        self.hooks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<S: Transport> std::fmt::Debug for ClientConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("peer", &self.peer)
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

impl<S: Transport> Drop for ClientConnection<S> {
    fn drop(&mut self) {
        self.closing.cancel();
        self.closed.cancel();
    }
}

#[async_trait]
impl<S: Transport> Updatable for ClientConnection<S> {
    fn label(&self) -> String {
        self.name.clone()
    }

    async fn update(&self) -> Result<(), UpdateError> {
        if !self.is_disconnected() {
            self.is_connected().await;
        }
        Ok(())
    }
}
