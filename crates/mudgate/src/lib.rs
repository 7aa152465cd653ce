//! # Mudgate
//!
//! Connection and session core for text-protocol MUD servers.
//!
//! Mudgate accepts telnet-style TCP connections, walks each one through a
//! login or registration conversation, keeps a registry of everyone
//! connected, polls them for liveness on a heartbeat, and starts and stops
//! all of it as one supervised group. The game itself plugs in through
//! [`SessionHandoff`](mudgate_session::SessionHandoff).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mudgate::prelude::*;
//!
//! # async fn run() -> Result<(), MudgateError> {
//! let server = MudServer::builder()
//!     .config(ServerConfig::load("mudgate.toml").await?)
//!     .build()
//!     .await?;
//! server.start().await;
//! tokio::signal::ctrl_c().await?;
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod error;
pub mod handshake;
pub mod listener;
pub mod logging;
mod server;
pub mod supervisor;

pub use error::MudgateError;
pub use server::{MudServer, MudServerBuilder};

/// Everything needed to run a server and plug a game into it.
pub mod prelude {
    pub use crate::MudgateError;
    pub use crate::config::{ConfigError, ServerConfig};
    pub use crate::handshake::{Gatekeeper, GatekeeperSettings, HandshakeOutcome, Refusal};
    pub use crate::listener::{ConnectionHandler, Listener, ListenerConfig};
    pub use crate::logging::LogSink;
    pub use crate::server::{MudServer, MudServerBuilder};
    pub use crate::supervisor::{LifecycleReport, SubsystemSupervisor};

    pub use mudgate_core::{
        AnsiMarkup, Markup, PlainMarkup, Subsystem, SubsystemError, SubsystemState, SystemEvent,
    };
    pub use mudgate_heartbeat::{Heartbeat, HeartbeatConfig, Updatable};
    pub use mudgate_session::{
        Account, AccountStore, BannedNames, BroadcastResult, ConnectionRegistry, CredentialLimits,
        Credentials, DirectoryAccountStore, LobbyHandoff, MemoryAccountStore, RegistryConfig,
        SessionError, SessionHandoff, StandardCredentials,
    };
    pub use mudgate_transport::{
        ClientConnection, ConnectionConfig, ConnectionId, TcpTransport, Transport, TransportError,
    };
}
