//! Unified error type for Mudgate.

use mudgate_core::SubsystemError;
use mudgate_session::SessionError;
use mudgate_transport::TransportError;

use crate::config::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attributes generate `From` impls, so `?` converts
/// sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum MudgateError {
    #[error(transparent)]
    Subsystem(#[from] SubsystemError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Setting up logging or other process-level I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A subsystem with this name is already registered.
    #[error("subsystem `{0}` is already registered")]
    DuplicateSubsystem(String),

    /// No subsystem with this name is registered.
    #[error("no subsystem named `{0}`")]
    UnknownSubsystem(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use mudgate_transport::ConnectionId;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::Disconnected(ConnectionId::new(3));
        let mudgate_err: MudgateError = err.into();
        assert!(matches!(mudgate_err, MudgateError::Transport(_)));
        assert!(mudgate_err.to_string().contains("conn-3"));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::AccountExists("alice".into());
        let mudgate_err: MudgateError = err.into();
        assert!(matches!(mudgate_err, MudgateError::Session(_)));
    }

    #[test]
    fn test_from_config_error() {
        let err = ConfigError::Invalid("zero".into());
        let mudgate_err: MudgateError = err.into();
        assert!(matches!(mudgate_err, MudgateError::Config(_)));
    }

    #[test]
    fn test_registry_errors_name_the_subsystem() {
        let err = MudgateError::UnknownSubsystem("Sentinel".into());
        assert_eq!(err.to_string(), "no subsystem named `Sentinel`");
    }
}
