//! VMess-over-gRPC transport (C8): the same authenticated tunnel and relay
//! logic as the raw TCP listener, carried instead as a bidirectional
//! stream of opaque chunks over HTTP/2. A connection here is only ever a
//! Shadowsocks AEAD tunnel wrapped in gRPC framing, not a separate
//! protocol — [`crate::tcp::Server::handle_conn`] doesn't know or care
//! which transport it was handed.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Buf;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::codegen::futures_core::Stream;
use tonic::{Request, Response, Status, Streaming};
use tracing::warn;

use crate::config::GrpcConfig;
use crate::error::{JohnError, Result};
use crate::tcp::Server;

pub mod gun {
    tonic::include_proto!("gun");
}

use gun::gun_service_server::{GunService, GunServiceServer};
use gun::Hunk;

/// Adapts one `Tun` call's inbound/outbound [`Hunk`] streams into a plain
/// byte stream, so the rest of the stack never has to know it's talking
/// over gRPC instead of a socket.
///
/// Generic over the incoming stream type so tests can drive it with a
/// plain `futures`/`tokio-stream` source instead of a live `Streaming<Hunk>`,
/// which can't be constructed outside an actual gRPC call.
struct GrpcStream<St> {
    incoming: St,
    outgoing: mpsc::UnboundedSender<std::result::Result<Hunk, Status>>,
    read_buf: bytes::Bytes,
}

impl<St> GrpcStream<St> {
    fn new(incoming: St, outgoing: mpsc::UnboundedSender<std::result::Result<Hunk, Status>>) -> Self {
        Self { incoming, outgoing, read_buf: bytes::Bytes::new() }
    }
}

impl<St> AsyncRead for GrpcStream<St>
where
    St: Stream<Item = std::result::Result<Hunk, Status>> + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        loop {
            if !self.read_buf.is_empty() {
                let n = self.read_buf.len().min(buf.remaining());
                buf.put_slice(&self.read_buf[..n]);
                self.read_buf.advance(n);
                return Poll::Ready(Ok(()));
            }
            match Pin::new(&mut self.incoming).poll_next(cx) {
                Poll::Ready(Some(Ok(hunk))) => {
                    self.read_buf = hunk.data.into();
                    continue;
                }
                Poll::Ready(Some(Err(status))) => {
                    return Poll::Ready(Err(std::io::Error::other(status.to_string())));
                }
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<St> AsyncWrite for GrpcStream<St> {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        let hunk = Hunk { data: buf.to_vec() };
        match self.outgoing.send(Ok(hunk)) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gRPC peer gone"))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

struct GrpcService {
    server: Arc<Server>,
}

#[tonic::async_trait]
impl GunService for GrpcService {
    type TunStream = UnboundedReceiverStream<std::result::Result<Hunk, Status>>;

    /// Hands the call's duplex stream to the shared connection handler and
    /// returns the outbound half immediately; the handler writes its
    /// replies through `tx` as it relays.
    async fn tun(
        &self,
        request: Request<Streaming<Hunk>>,
    ) -> std::result::Result<Response<Self::TunStream>, Status> {
        let addr = request.remote_addr().unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
        let incoming = request.into_inner();
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = GrpcStream::new(incoming, tx);

        let server = self.server.clone();
        tokio::spawn(async move {
            if let Err(e) = server.handle_conn(stream, addr).await {
                warn!(%addr, error = %e, "grpc tunnel connection ended with an error");
            }
        });

        Ok(Response::new(UnboundedReceiverStream::new(rx)))
    }
}

/// Runs the gRPC listener until `shutdown` fires, serving the same
/// [`Server`] the raw TCP listener does.
pub async fn serve(config: &GrpcConfig, server: Arc<Server>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let service = GunServiceServer::new(GrpcService { server });
    tonic::transport::Server::builder()
        .add_service(service)
        .serve_with_shutdown(config.listen, async move {
            let _ = shutdown.changed().await;
        })
        .await
        .map_err(|e| JohnError::Grpc(e.to_string()))
}
