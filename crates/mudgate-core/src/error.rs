//! Error types for the core layer.

/// Errors a subsystem can report from `start` or `stop`.
///
/// Wrong-state calls are not errors: they are logged and ignored by the
/// implementation. These variants are reserved for real faults, which the
/// supervisor logs per subsystem without aborting the others.
#[derive(Debug, thiserror::Error)]
pub enum SubsystemError {
    /// The listening socket could not be created, bound, or put into
    /// listen mode.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Accepting connections failed in a way the subsystem cannot recover
    /// from.
    #[error("accept loop failed: {0}")]
    Accept(#[source] std::io::Error),

    /// Any other start/stop fault, with a human-readable reason.
    #[error("subsystem {name} failed: {reason}")]
    Failed { name: String, reason: String },
}

/// Errors produced while translating color markup.
///
/// Callers on the connection boundary never drop a message because of
/// these; they fall back to sending the raw text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarkupError {
    /// A `%^NAME%^` tag whose name is not in the color table.
    #[error("unknown markup tag `{0}`")]
    UnknownTag(String),
}
