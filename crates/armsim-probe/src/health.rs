//! [`HealthServer`] – TCP liveness responder.
//!
//! Binds `0.0.0.0:<port>` and, for every accepted connection, writes
//! [`RESPONSE`] and closes.  Requests are never read.  Each connection is
//! handled on its own task so a stalled client cannot hold up the others.

use std::net::SocketAddr;

use armsim_types::ArmError;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default TCP port of the liveness probe.
pub const DEFAULT_PORT: u16 = 9999;

/// Bytes written to every client.
pub const RESPONSE: &[u8] = b"OK\n";

// ---------------------------------------------------------------------------
// HealthServer
// ---------------------------------------------------------------------------

/// A bound liveness listener.
///
/// # Example
///
/// ```rust,no_run
/// use armsim_probe::HealthServer;
///
/// #[tokio::main]
/// async fn main() {
///     let server = HealthServer::bind(9999).await.expect("bind probe port");
///     server.serve().await;
/// }
/// ```
pub struct HealthServer {
    listener: TcpListener,
}

impl HealthServer {
    /// Bind on all interfaces at `port`.
    pub async fn bind(port: u16) -> Result<Self, ArmError> {
        Self::bind_addr(SocketAddr::from(([0, 0, 0, 0], port))).await
    }

    /// Bind on an explicit address (`127.0.0.1:0` in tests).
    pub async fn bind_addr(addr: impl ToSocketAddrs) -> Result<Self, ArmError> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "health server listening");
        Ok(Self { listener })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr, ArmError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever.
    pub async fn serve(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    tokio::spawn(respond(stream, peer));
                }
                Err(e) => {
                    warn!(error = %e, "health server accept failed");
                }
            }
        }
    }

    /// Run [`serve`][Self::serve] on its own task.  Abort the handle to stop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.serve())
    }
}

async fn respond(mut stream: TcpStream, peer: SocketAddr) {
    if let Err(e) = stream.write_all(RESPONSE).await {
        debug!(%peer, error = %e, "health probe client went away");
        return;
    }
    if let Err(e) = stream.shutdown().await {
        debug!(%peer, error = %e, "health probe shutdown failed");
    }
}
