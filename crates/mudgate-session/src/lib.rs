//! Connection registry and account collaborators for Mudgate.
//!
//! This crate holds everything that knows *who* is connected:
//!
//! 1. **Registry**: the live set of connections ([`ConnectionRegistry`]),
//!    with join/leave notices, broadcast, and heartbeat polling
//! 2. **Credentials**: what makes a valid username or password, and how
//!    passwords are hashed ([`Credentials`], [`StandardCredentials`],
//!    [`BannedNames`])
//! 3. **Accounts**: where player accounts live ([`AccountStore`])
//! 4. **Handoff**: who takes a player once they have logged in
//!    ([`SessionHandoff`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Gatekeeper (above)  ← drives logins through these collaborators
//!     ↕
//! Session Layer (this crate)  ← tracks connections and accounts
//!     ↕
//! Transport + Heartbeat (below)  ← client connections, liveness polling
//! ```

mod banned;
mod credentials;
mod error;
mod handoff;
mod registry;
mod store;

pub use banned::BannedNames;
pub use credentials::{CredentialLimits, Credentials, StandardCredentials};
pub use error::SessionError;
pub use handoff::{LobbyHandoff, SessionHandoff};
pub use registry::{
    BroadcastResult, ConnectionRegistry, DEFAULT_SEND_TIMEOUT, REGISTRY_NAME, RegistryConfig,
};
pub use store::{Account, AccountStore, DirectoryAccountStore, MemoryAccountStore};
