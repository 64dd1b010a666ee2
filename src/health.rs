//! Passive TCP liveness endpoint.
//!
//! External monitors confirm the process is scheduling at all by completing
//! a TCP handshake against the health port. Accepted connections are closed
//! immediately, with no payload in either direction. The listener shares no
//! state with the collector.

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Bind the health listener on all interfaces.
pub async fn bind(port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind(("0.0.0.0", port)).await
}

/// Accept connections for the life of the process.
///
/// Each accepted connection is dropped without reading or writing; accept
/// failures are logged and the loop continues.
pub async fn serve(listener: TcpListener) {
    match listener.local_addr() {
        Ok(addr) => info!(%addr, "health listener ready"),
        Err(e) => warn!(error = %e, "health listener address unavailable"),
    }

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "liveness probe accepted");
                drop(stream);
            }
            Err(e) => warn!(error = %e, "health accept failed"),
        }
    }
}
