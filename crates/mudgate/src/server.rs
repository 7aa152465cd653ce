//! `MudServer` builder and wiring.
//!
//! This is the entry point for running a Mudgate server. It ties the
//! layers together: listener → gatekeeper → registry → handoff, all under
//! one [`SubsystemSupervisor`].

use std::net::SocketAddr;
use std::sync::Arc;

use mudgate_core::{AnsiMarkup, Markup, Subsystem};
use mudgate_heartbeat::Heartbeat;
use mudgate_session::{
    AccountStore, BannedNames, ConnectionRegistry, Credentials, DirectoryAccountStore,
    LobbyHandoff, MemoryAccountStore, SessionHandoff, StandardCredentials,
};
use mudgate_transport::TcpTransport;

use crate::MudgateError;
use crate::config::ServerConfig;
use crate::handshake::{Gatekeeper, GatekeeperSettings};
use crate::listener::{Listener, ListenerConfig};
use crate::logging::LogSink;
use crate::supervisor::{LifecycleReport, SubsystemSupervisor};

/// Builder for configuring a Mudgate server.
///
/// Every collaborator has a default: standard credentials (with the banned
/// names file, if configured), an account store chosen by
/// `accounts.storage_dir`, ANSI markup, and the lobby handoff.
///
/// # Example
///
/// ```rust,ignore
/// let server = MudServer::builder()
///     .config(config)
///     .handoff(Arc::new(MyGame::new()))
///     .build()
///     .await?;
/// server.start().await;
/// ```
pub struct MudServerBuilder {
    config: ServerConfig,
    credentials: Option<Arc<dyn Credentials>>,
    accounts: Option<Arc<dyn AccountStore>>,
    handoff: Option<Arc<dyn SessionHandoff<TcpTransport>>>,
    markup: Arc<dyn Markup>,
    log_sink: Option<LogSink>,
}

impl MudServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            credentials: None,
            accounts: None,
            handoff: None,
            markup: Arc::new(AnsiMarkup),
            log_sink: None,
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind, overriding the config.
    pub fn bind(mut self, address: &str, port: u16) -> Self {
        self.config.network.bind_address = address.to_string();
        self.config.network.port = port;
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn Credentials>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn accounts(mut self, accounts: Arc<dyn AccountStore>) -> Self {
        self.accounts = Some(accounts);
        self
    }

    pub fn handoff(mut self, handoff: Arc<dyn SessionHandoff<TcpTransport>>) -> Self {
        self.handoff = Some(handoff);
        self
    }

    pub fn markup(mut self, markup: Arc<dyn Markup>) -> Self {
        self.markup = markup;
        self
    }

    /// Sets the log sink the server releases on shutdown.
    pub fn log_sink(mut self, sink: LogSink) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Validates the config and wires every component. Nothing is started.
    pub async fn build(self) -> Result<MudServer, MudgateError> {
        let config = self.config;
        config.validate()?;

        let credentials = match self.credentials {
            Some(credentials) => credentials,
            None => {
                let banned = match &config.accounts.banned_names_file {
                    Some(path) => BannedNames::load(path).await?,
                    None => BannedNames::new(),
                };
                Arc::new(StandardCredentials::new(config.credential_limits(), banned))
            }
        };
        let accounts: Arc<dyn AccountStore> = match (self.accounts, &config.accounts.storage_dir) {
            (Some(accounts), _) => accounts,
            (None, Some(dir)) => Arc::new(DirectoryAccountStore::open(dir).await?),
            (None, None) => Arc::new(MemoryAccountStore::new()),
        };
        let handoff = self.handoff.unwrap_or_else(|| Arc::new(LobbyHandoff));

        let heartbeat = Arc::new(Heartbeat::new(config.heartbeat_config()));
        let registry = ConnectionRegistry::with_config(config.registry_config(), heartbeat);
        let gatekeeper = Gatekeeper::new(
            GatekeeperSettings::from(&config.handshake),
            registry.clone(),
            credentials,
            accounts.clone(),
            handoff,
        );
        let listener = Arc::new(Listener::new(
            ListenerConfig {
                bind_addr: config.bind_addr(),
                backlog: config.network.backlog,
                max_consecutive_accept_failures: config.network.max_consecutive_accept_failures,
                connection: config.connection_config(),
            },
            self.markup,
            gatekeeper.clone(),
        ));

        let defaults = {
            let registry = registry.clone();
            let gatekeeper = gatekeeper.clone();
            let listener = listener.clone();
            move || -> Vec<Arc<dyn Subsystem>> {
                let registry: Arc<dyn Subsystem> = registry.clone();
                let gatekeeper: Arc<dyn Subsystem> = gatekeeper.clone();
                let listener: Arc<dyn Subsystem> = listener.clone();
                vec![registry, gatekeeper, listener]
            }
        };
        let mut supervisor = SubsystemSupervisor::new().with_defaults(Box::new(defaults));
        if let Some(sink) = self.log_sink {
            supervisor = supervisor.with_log_sink(sink);
        }

        Ok(MudServer {
            config,
            supervisor,
            registry,
            gatekeeper,
            listener,
            accounts,
        })
    }
}

impl Default for MudServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A wired Mudgate server.
pub struct MudServer {
    config: ServerConfig,
    supervisor: SubsystemSupervisor,
    registry: Arc<ConnectionRegistry<TcpTransport>>,
    gatekeeper: Arc<Gatekeeper<TcpTransport>>,
    listener: Arc<Listener>,
    accounts: Arc<dyn AccountStore>,
}

impl MudServer {
    /// Creates a new builder.
    pub fn builder() -> MudServerBuilder {
        MudServerBuilder::new()
    }

    /// Starts every subsystem: registry, gatekeeper, then listener.
    pub async fn start(&self) -> LifecycleReport {
        self.supervisor.start_all().await
    }

    /// Stops every subsystem in reverse order and releases the log sink.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }

    /// The bound address while the listener is running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &SubsystemSupervisor {
        &self.supervisor
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry<TcpTransport>> {
        &self.registry
    }

    pub fn gatekeeper(&self) -> &Arc<Gatekeeper<TcpTransport>> {
        &self.gatekeeper
    }

    pub fn listener(&self) -> &Arc<Listener> {
        &self.listener
    }

    pub fn accounts(&self) -> &Arc<dyn AccountStore> {
        &self.accounts
    }
}
