//! TCP transport implementation.

use std::io;
use std::net::SocketAddr;

use futures_util::FutureExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

use crate::{Liveness, Transport, TransportError};

/// A [`Transport`] over one accepted TCP stream.
///
/// The stream is split so a pending read never blocks a write. Dropping
/// the transport closes the socket.
pub struct TcpTransport {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    peer: Option<SocketAddr>,
}

impl TcpTransport {
    /// Wraps an accepted stream.
    pub fn new(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "failed to set TCP_NODELAY");
        }
        let (reader, writer) = stream.into_split();
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            peer,
        }
    }

    /// Connects to `addr` and wraps the resulting stream.
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self::new(TcpStream::connect(addr).await?))
    }
}

impl Transport for TcpTransport {
    async fn write_all(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(data)
            .await
            .map_err(TransportError::SendFailed)?;
        writer.flush().await.map_err(TransportError::SendFailed)
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.reader
            .lock()
            .await
            .read(buf)
            .await
            .map_err(TransportError::ReceiveFailed)
    }

    fn probe(&self) -> Liveness {
        // A read in flight owns the reader; it will see EOF on its own.
        let Ok(mut reader) = self.reader.try_lock() else {
            return Liveness::Alive;
        };
        let mut byte = [0u8; 1];
        match reader.peek(&mut byte).now_or_never() {
            None => Liveness::Alive,
            Some(Ok(0)) => Liveness::Closed,
            Some(Ok(_)) => Liveness::Alive,
            Some(Err(e)) => Liveness::Failed(e),
        }
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        match self.writer.lock().await.shutdown().await {
            Ok(()) => Ok(()),
            // Already gone is as good as shut down.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(TransportError::ShutdownFailed(e)),
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}
