//! Transport abstraction and client connections for Mudgate.
//!
//! Provides the [`Transport`] trait, which abstracts one peer's byte
//! stream, the TCP implementation [`TcpTransport`], and
//! [`ClientConnection`], which layers line-oriented text, liveness
//! probing, and idempotent disconnect on top of any transport.

mod connection;
mod error;
mod tcp;

pub use connection::{ClientConnection, ConnectionConfig, DisconnectHook};
pub use error::TransportError;
pub use tcp::TcpTransport;

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-unique ID.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Result of a non-blocking liveness probe.
#[derive(Debug)]
pub enum Liveness {
    /// Nothing indicates the peer is gone (idle, or data is waiting).
    Alive,
    /// The peer closed its side of the stream.
    Closed,
    /// Probing the socket failed.
    Failed(std::io::Error),
}

/// One peer's byte stream.
///
/// Reads and writes may run concurrently with each other, so
/// implementations keep the two directions independently lockable.
pub trait Transport: Send + Sync + 'static {
    /// Writes all of `data` to the peer.
    fn write_all(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Reads the next chunk into `buf`. `Ok(0)` means the peer closed.
    fn read(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<usize, TransportError>> + Send;

    /// Checks, without waiting, whether the peer is still there.
    ///
    /// Must not block and must not consume input.
    fn probe(&self) -> Liveness;

    /// Gracefully shuts down the outbound direction.
    fn shutdown(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// The peer's address, when known.
    fn peer_addr(&self) -> Option<SocketAddr>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_next_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_connection_id_hash_works_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ConnectionId::new(1), "alice");
        map.insert(ConnectionId::new(2), "bob");
        assert_eq!(map[&ConnectionId::new(1)], "alice");
    }
}
