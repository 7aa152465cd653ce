//! Shared vocabulary for Mudgate.
//!
//! This crate defines the pieces every other layer agrees on:
//!
//! - **Subsystems** ([`Subsystem`], [`SubsystemState`], [`StateCell`]):
//!   the start/stop contract the supervisor drives, and the helper that
//!   implementations use to track state and publish transitions.
//! - **Events** ([`SystemEvent`], [`EventKind`]): observational records
//!   of what a subsystem did.
//! - **Text** ([`text`]): inbound telnet cleanup and word wrapping.
//! - **Markup** ([`Markup`], [`AnsiMarkup`], [`PlainMarkup`]): color tag
//!   translation applied at the connection boundary.
//!
//! ```text
//! Facade (supervisor, listener, gatekeeper)
//!     ↕
//! Session (registry, accounts)  /  Transport (client connections)
//!     ↕
//! Core (this crate)
//! ```

mod error;
mod markup;
mod subsystem;
pub mod text;

pub use error::{MarkupError, SubsystemError};
pub use markup::{AnsiMarkup, Markup, PlainMarkup};
pub use subsystem::{EventKind, StateCell, Subsystem, SubsystemState, SystemEvent};
