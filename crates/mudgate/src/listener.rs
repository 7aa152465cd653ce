//! The TCP listener subsystem.
//!
//! Binds the configured address, accepts connections in a background task,
//! wraps each accepted socket in a [`ClientConnection`], and hands it to a
//! [`ConnectionHandler`] (normally the gatekeeper).
//!
//! # Lifecycle
//!
//! ```text
//! Stopped ──start()──→ Running ──stop()──→ Stopping ──→ Stopped
//!    ↑                    │
//!    │                    │ bind failure / too many accept errors
//!    └──── start() ──── Error
//! ```
//!
//! `start` while Running and `stop` while not Running are logged no-ops,
//! so a second `start` never rebinds the port. Cancellation is observed by
//! the accept loop itself; the socket is closed when the loop returns.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use mudgate_core::{Markup, StateCell, Subsystem, SubsystemError, SubsystemState, SystemEvent};
use mudgate_transport::{ClientConnection, ConnectionConfig, TcpTransport, Transport};
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default subsystem name.
pub const LISTENER_NAME: &str = "Sentinel";

/// Pause after a failed accept, so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Receives every accepted connection.
///
/// Called from the accept loop: implementations should hand the
/// connection off (spawn) rather than run a conversation inline.
#[async_trait]
pub trait ConnectionHandler<S: Transport>: Send + Sync + 'static {
    async fn admit(&self, connection: Arc<ClientConnection<S>>);
}

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// `host:port` to bind.
    pub bind_addr: String,
    pub backlog: u32,
    pub max_consecutive_accept_failures: u32,
    pub connection: ConnectionConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9998".to_string(),
            backlog: 10,
            max_consecutive_accept_failures: 16,
            connection: ConnectionConfig::default(),
        }
    }
}

struct AcceptLoop {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Accepts TCP connections while running.
pub struct Listener {
    config: ListenerConfig,
    markup: Arc<dyn Markup>,
    handler: Arc<dyn ConnectionHandler<TcpTransport>>,
    state: Arc<StateCell>,
    local_addr: Mutex<Option<SocketAddr>>,
    /// Serializes start/stop and owns the running loop.
    running: tokio::sync::Mutex<Option<AcceptLoop>>,
}

impl Listener {
    pub fn new(
        config: ListenerConfig,
        markup: Arc<dyn Markup>,
        handler: Arc<dyn ConnectionHandler<TcpTransport>>,
    ) -> Self {
        Self {
            config,
            markup,
            handler,
            state: Arc::new(StateCell::new(LISTENER_NAME)),
            local_addr: Mutex::new(None),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// The bound address while running. Useful when binding port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_local_addr(&self, addr: Option<SocketAddr>) {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = addr;
    }

    async fn bind(&self) -> Result<TcpListener, SubsystemError> {
        let addr = &self.config.bind_addr;
        let fail = |source: io::Error| SubsystemError::Bind {
            addr: addr.clone(),
            source,
        };

        let resolved = tokio::net::lookup_host(addr.as_str())
            .await
            .map_err(fail)?
            .next()
            .ok_or_else(|| {
                fail(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "address resolved to nothing",
                ))
            })?;

        let socket = if resolved.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(fail)?;
        socket.set_reuseaddr(true).map_err(fail)?;
        socket.bind(resolved).map_err(fail)?;
        socket.listen(self.config.backlog.max(1)).map_err(fail)
    }
}

async fn accept_loop(
    listener: TcpListener,
    cancel: CancellationToken,
    state: Arc<StateCell>,
    handler: Arc<dyn ConnectionHandler<TcpTransport>>,
    markup: Arc<dyn Markup>,
    connection: ConnectionConfig,
    max_failures: u32,
) {
    let mut failures = 0u32;
    loop {
        let accepted = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                failures = 0;
                let client = ClientConnection::new(
                    TcpTransport::new(stream),
                    connection,
                    markup.clone(),
                );
                info!(conn_id = %client.id(), %peer, "accepted connection");
                handler.admit(Arc::new(client)).await;
            }
            Err(e) => {
                failures += 1;
                warn!(error = %e, failures, "accept failed");
                if failures >= max_failures.max(1) {
                    error!(error = %e, "too many consecutive accept failures, listener giving up");
                    state.transition(
                        SubsystemState::Error,
                        format!("accept loop failed: {e}"),
                    );
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                }
            }
        }
    }
    debug!("accept loop exited");
}

#[async_trait]
impl Subsystem for Listener {
    fn name(&self) -> &str {
        self.state.name()
    }

    fn state(&self) -> SubsystemState {
        self.state.get()
    }

    async fn start(&self) -> Result<(), SubsystemError> {
        let mut running = self.running.lock().await;
        let current = self.state.get();
        if !matches!(current, SubsystemState::Stopped | SubsystemState::Error) {
            warn!(subsystem = %self.name(), state = %current, "start ignored: not stopped");
            return Ok(());
        }

        // A loop that died on its own is still parked here.
        if let Some(stale) = running.take() {
            stale.cancel.cancel();
            let _ = stale.task.await;
        }

        let listener = match self.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                error!(subsystem = %self.name(), error = %e, "bind failed");
                self.state
                    .transition(SubsystemState::Error, format!("bind failed: {e}"));
                return Err(e);
            }
        };
        let local = listener.local_addr().ok();
        self.set_local_addr(local);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(accept_loop(
            listener,
            cancel.clone(),
            self.state.clone(),
            self.handler.clone(),
            self.markup.clone(),
            self.config.connection,
            self.config.max_consecutive_accept_failures,
        ));
        *running = Some(AcceptLoop { cancel, task });

        let shown = local.map_or_else(|| self.config.bind_addr.clone(), |a| a.to_string());
        self.state.transition(
            SubsystemState::Running,
            format!("Sentinel listening on {shown}"),
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), SubsystemError> {
        let mut running = self.running.lock().await;
        let current = self.state.get();
        if current != SubsystemState::Running {
            warn!(subsystem = %self.name(), state = %current, "stop ignored: not running");
            return Ok(());
        }

        self.state
            .transition(SubsystemState::Stopping, "Sentinel stopping");
        if let Some(accept) = running.take() {
            accept.cancel.cancel();
            if let Err(e) = accept.task.await {
                error!(subsystem = %self.name(), error = %e, "accept loop ended abnormally");
            }
        }
        self.set_local_addr(None);
        self.state
            .transition(SubsystemState::Stopped, "Sentinel stopped");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.state.subscribe()
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("bind_addr", &self.config.bind_addr)
            .field("state", &self.state.get())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}
