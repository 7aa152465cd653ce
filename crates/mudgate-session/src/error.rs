//! Error types for the session layer.

/// Errors raised by the account collaborators.
///
/// Validation failures during login are not errors: they consume a retry
/// and the player is asked again. These variants cover storage faults and
/// misuse that the gatekeeper reports as "try again later".
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// `create_account` was called for a name that already has an account.
    #[error("account `{0}` already exists")]
    AccountExists(String),

    /// The username cannot be used as a storage key.
    #[error("username `{0}` is not a valid account key")]
    InvalidUsername(String),

    /// Reading or writing account storage failed.
    #[error("account storage failed: {0}")]
    Storage(#[from] std::io::Error),

    /// A stored account record could not be decoded.
    #[error("account record for `{username}` is corrupt: {source}")]
    Corrupt {
        username: String,
        #[source]
        source: serde_json::Error,
    },

    /// An account record could not be encoded.
    #[error("failed to encode account record: {0}")]
    Encode(#[source] serde_json::Error),
}
