#![forbid(unsafe_code)]

mod bandwidth;
mod contention;
mod control;
mod metrics;
mod relay;
mod server;

pub use metrics::{ConnectionCount, ConnectionSnapshot};
pub use server::Server;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::error::Result;

/// Binds the Shadowsocks AEAD listener at `listen` and runs `server`'s
/// accept loop over it until `shutdown` fires. `server` is shared with the
/// gRPC transport ([`crate::transport::serve`]) when that's also enabled,
/// so a `SyncPassages` update reaches both at once.
pub async fn run(server: Arc<Server>, listen: SocketAddr, shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = TcpListener::bind(listen).await?;
    info!(addr = ?listen, "tcp listener bound");
    server.run(listener, shutdown).await
}
