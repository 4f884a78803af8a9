//! Accept loop and per-connection handling (C9): authenticate, guard
//! against contention and private targets, then either dispatch a
//! manager's control message or relay to the target/upstream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::Config;
use crate::metadata::{Metadata, Target};
use crate::passage::{Passage, PassageRegistry, UserContextStore};
use crate::security::{guarded_connect, resolve_public, ReplayFilter};
use crate::shadowsocks::{self, ShadowsocksStream};
use crate::error::{JohnError, Result};

use super::bandwidth::Bandwidth;
use super::contention::ContentionTracker;
use super::control;
use super::metrics::ConnectionCount;
use super::relay;

/// Shared state for every accepted connection.
pub struct Server {
    config: Arc<Config>,
    registry: Arc<PassageRegistry>,
    users: Arc<UserContextStore>,
    replay: Arc<ReplayFilter>,
    contention: Arc<ContentionTracker>,
    bandwidth: Arc<Bandwidth>,
    connections: Arc<ConnectionCount>,
}

impl Server {
    pub fn new(config: Arc<Config>) -> Self {
        let registry = Arc::new(PassageRegistry::new(
            config.passages.iter().map(|p| Passage::from_config(p, config.default_method)).collect(),
            config.default_method,
        ));
        let users = Arc::new(UserContextStore::new(registry.clone(), &config.cache));
        let replay = Arc::new(ReplayFilter::new(config.replay.capacity_per_half, config.replay.max_age()));
        let contention = Arc::new(ContentionTracker::new(&config.contention));
        Self {
            config,
            registry,
            users,
            replay,
            contention,
            bandwidth: Arc::new(Bandwidth::default()),
            connections: Arc::new(ConnectionCount::default()),
        }
    }

    pub fn registry(&self) -> &Arc<PassageRegistry> {
        &self.registry
    }

    /// Runs the Shadowsocks AEAD accept loop until `shutdown` fires.
    pub async fn run(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            let result = tokio::select! {
                res = listener.accept() => res,
                res = shutdown.changed() => {
                    if res.is_ok() {
                        info!("shutdown signal received, stopping accept loop");
                        break;
                    }
                    continue;
                }
            };

            let (stream, addr) = match result {
                Ok(pair) => pair,
                Err(e) => {
                    self.connections.increment_errors();
                    warn!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            self.connections.increment();
            let snapshot = self.connections.snapshot();
            info!(%addr, current = snapshot.current, total = snapshot.total, "accepted connection");

            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.handle_conn(stream, addr).await {
                    this.connections.increment_errors();
                    warn!(%addr, error = %e, "connection ended with an error");
                }
                this.connections.decrement();
            });
        }
        Ok(())
    }

    /// Authenticates and serves one accepted connection. Generic over the
    /// inbound transport so both the raw TCP listener and the gRPC tunnel
    /// transport ([`crate::transport`]) share this exact logic.
    pub async fn handle_conn<S>(&self, stream: S, addr: SocketAddr) -> Result<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let drain_budget = self.config.timeout.drain_budget();
        let accepted =
            match shadowsocks::accept(stream, addr.ip(), &self.users, &self.replay, drain_budget).await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(%addr, error = %e, "handshake failed");
                    return Err(e);
                }
            };

        let passage = accepted.passage;
        let mut stream = accepted.stream;

        if !passage.is_manager() && self.contention.check(passage.key(), addr.ip()) {
            warn!(%addr, passage = passage.key(), "passage contention budget exceeded");
            crate::security::drain(&mut stream, drain_budget).await;
            return Err(JohnError::Contention);
        }

        let metadata = Metadata::read(&mut stream).await?;

        match metadata {
            Metadata::Msg { cmd, len_msg_body } => {
                if !passage.is_manager() {
                    crate::security::drain(&mut stream, drain_budget).await;
                    return Err(JohnError::PassageAbuse);
                }
                control::dispatch(
                    &mut stream,
                    cmd,
                    len_msg_body,
                    &passage.master_key,
                    &self.registry,
                    &self.users,
                    &self.bandwidth,
                    &self.config.bandwidth,
                )
                .await
            }
            Metadata::Target { target, port } => self.relay_to_target(stream, &passage, target, port).await,
        }
    }

    async fn relay_to_target<S>(
        &self,
        client: ShadowsocksStream<shadowsocks::Primed<S>>,
        passage: &Passage,
        target: Target,
        port: u16,
    ) -> Result<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let dial_timeout = self.config.timeout.dial();
        let idle_timeout = self.config.timeout.idle();

        if let Some(out) = &passage.out {
            let upstream = dial_upstream(out.address, dial_timeout).await?;
            let mut upstream = shadowsocks::connect(upstream, out.method, &out.master_key).await?;
            Metadata::Target { target, port }.write(&mut upstream).await?;
            return relay::splice(client, upstream, idle_timeout).await;
        }

        let host = target.host();
        let addrs = resolve_public(&host, port).await?;
        let target_stream = connect_first(&addrs, dial_timeout).await?;
        relay::splice(client, target_stream, idle_timeout).await
    }
}

/// Dials a configured upstream directly — no private-address guard, since
/// the upstream address is an operator-supplied part of the configuration
/// rather than something a passage gets to pick.
async fn dial_upstream(addr: SocketAddr, dial_timeout: Duration) -> Result<TcpStream> {
    match timeout(dial_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(JohnError::Dial(e.to_string())),
        Err(_) => Err(JohnError::Dial(format!("connect to upstream {addr} timed out"))),
    }
}

async fn connect_first(addrs: &[SocketAddr], dial_timeout: Duration) -> Result<TcpStream> {
    let mut last_err = None;
    for addr in addrs {
        match guarded_connect(*addr, dial_timeout).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| JohnError::Dial("no addresses to try".into())))
}
