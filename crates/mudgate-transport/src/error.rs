/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection has already been disconnected and its transport
    /// released.
    #[error("connection {0} is disconnected")]
    Disconnected(crate::ConnectionId),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// A send did not complete in time.
    #[error("send to connection {0} timed out")]
    SendTimedOut(crate::ConnectionId),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Shutting the transport down failed.
    #[error("shutdown failed: {0}")]
    ShutdownFailed(#[source] std::io::Error),
}
