//! Bidirectional byte relay between an authenticated client tunnel and the
//! dialed target (C9). Each direction is copied independently so either
//! side hitting EOF, erroring, or going idle past `idle_timeout` tears down
//! the other half instead of leaking a half-open connection.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;

use crate::error::{JohnError, Result};

const COPY_BUF_SIZE: usize = 16 * 1024;

/// Splices `a` and `b` until one side closes, errors, or the link sits
/// idle past `idle_timeout`. An idle timeout ends the relay cleanly rather
/// than as an error, mirroring the upstream side simply giving up on a
/// stale connection.
pub async fn splice<A, B>(a: A, b: B, idle_timeout: Duration) -> Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let cancel_fwd = Notify::new();
    let cancel_back = Notify::new();

    let forward = copy_with_idle_timeout(&mut a_read, &mut b_write, idle_timeout, &cancel_back);
    let backward = copy_with_idle_timeout(&mut b_read, &mut a_write, idle_timeout, &cancel_fwd);

    tokio::pin!(forward);
    tokio::pin!(backward);

    let result = tokio::select! {
        res = &mut forward => {
            cancel_fwd.notify_waiters();
            res.and(backward.await)
        }
        res = &mut backward => {
            cancel_back.notify_waiters();
            res.and(forward.await)
        }
    };

    result
}

/// Copies from `reader` to `writer` a chunk at a time, resetting the idle
/// timer on every successful read. Returns cleanly (not as an error) when
/// the reader hits EOF, goes idle, or `cancel` is notified by the other
/// direction finishing first.
async fn copy_with_idle_timeout<R, W>(
    reader: &mut R,
    writer: &mut W,
    idle_timeout: Duration,
    cancel: &Notify,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = tokio::select! {
            biased;
            _ = cancel.notified() => return Ok(()),
            res = tokio::time::timeout(idle_timeout, reader.read(&mut buf)) => match res {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(JohnError::Io(e)),
                Err(_elapsed) => return Ok(()),
            },
        };
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn relays_bytes_until_either_side_closes() {
        let (client, mut client_peer) = duplex(64);
        let (upstream, mut upstream_peer) = duplex(64);

        let handle = tokio::spawn(splice(client, upstream, Duration::from_secs(5)));

        client_peer.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        upstream_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        upstream_peer.write_all(b"world").await.unwrap();
        let mut buf = [0u8; 5];
        client_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");

        drop(client_peer);
        drop(upstream_peer);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn idle_timeout_ends_the_relay_without_an_error() {
        let (client, _client_peer) = duplex(64);
        let (upstream, _upstream_peer) = duplex(64);

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            splice(client, upstream, Duration::from_millis(20)),
        )
        .await
        .expect("splice should finish once both sides go idle");
        assert!(result.is_ok());
    }
}
