//! Inbound handshake (C6 continued): trial-decrypt against the candidate
//! passages for this source, confirm with the replay filter, and hand back
//! a fully keyed [`ShadowsocksStream`] ready for metadata parsing.
//!
//! Mirrors the original's fixed-size peek: the largest possible prefix
//! (max salt length, plus the encrypted length field) is read up front so
//! every configured cipher's key length can be trial-decrypted from the
//! same buffer, regardless of which one a given passage turns out to use.

use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::crypto::{derive_subkey, salt_len, AeadCipher, NonceSequence, LENGTH_FIELD_LEN, TAG_LEN};
use crate::error::{JohnError, Result};
use crate::passage::{Passage, UserContextStore};
use crate::security::{drain, ReplayFilter};

use super::framer::ShadowsocksStream;

const MAX_SALT_LEN: usize = 32;
const PREFIX_LEN: usize = MAX_SALT_LEN + LENGTH_FIELD_LEN + TAG_LEN;

/// The part of an inner stream already consumed during the handshake,
/// replayed ahead of the socket for whatever still needs reading.
pub struct Primed<S> {
    prefix: Vec<u8>,
    pos: usize,
    inner: S,
}

impl<S: AsyncRead + Unpin> AsyncRead for Primed<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.pos < this.prefix.len() {
            let remaining = &this.prefix[this.pos..];
            let to_copy = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..to_copy]);
            this.pos += to_copy;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Primed<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Outcome of a successful inbound handshake: a keyed stream, positioned
/// right after the address/control header so the caller can read it off
/// next, and the passage it authenticated as.
pub struct Accepted<S> {
    pub stream: ShadowsocksStream<Primed<S>>,
    pub passage: Arc<Passage>,
}

/// Reads and authenticates the fixed-size handshake prefix from `stream`,
/// then returns a keyed [`ShadowsocksStream`] over the remainder.
///
/// On `FailAuth`/`ReplayAttack`, drains up to `drain_budget` worth of
/// whatever the peer sends next before returning the error, so a rejected
/// connection isn't distinguishable from an accepted one by how quickly it
/// closes.
pub async fn accept<S>(
    mut stream: S,
    source: IpAddr,
    users: &UserContextStore,
    replay: &ReplayFilter,
    drain_budget: Duration,
) -> Result<Accepted<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut prefix = vec![0u8; PREFIX_LEN];
    stream.read_exact(&mut prefix).await?;

    let found = users.auth(source, |passage| probe(&prefix, passage));
    let (passage, (salt, payload_len, decoder)) = match found {
        Some(found) => found,
        None => {
            drain(&mut stream, drain_budget).await;
            return Err(JohnError::FailAuth);
        }
    };

    if !replay.check_and_insert(&salt) {
        drain(&mut stream, drain_budget).await;
        return Err(JohnError::ReplayAttack);
    }

    let leftover_start = salt.len() + LENGTH_FIELD_LEN + TAG_LEN;
    let leftover = prefix[leftover_start..].to_vec();

    let mut server_salt = vec![0u8; salt_len(passage.method)];
    rand::thread_rng().fill_bytes(&mut server_salt);
    stream.write_all(&server_salt).await?;

    let encoder_key = derive_subkey(&passage.master_key, &server_salt, passage.method.key_len())?;
    let encoder = AeadCipher::new(passage.method, &encoder_key)?;

    let primed = Primed { prefix: leftover, pos: 0, inner: stream };
    let mut decoder_nonces = NonceSequence::new();
    decoder_nonces.next(); // the length field already consumed one nonce

    let shadowsocks_stream = ShadowsocksStream::resume(
        primed,
        encoder,
        NonceSequence::new(),
        decoder,
        decoder_nonces,
        payload_len,
    );

    Ok(Accepted { stream: shadowsocks_stream, passage })
}

/// Tries `passage` against the handshake prefix. Returns the salt actually
/// used (so the caller can replay-check it), the decrypted chunk length,
/// and a decoder already keyed for this connection.
fn probe(prefix: &[u8], passage: &Passage) -> Option<(Vec<u8>, usize, AeadCipher)> {
    let klen = passage.method.key_len();
    if prefix.len() < klen + LENGTH_FIELD_LEN + TAG_LEN {
        return None;
    }
    let salt = &prefix[..klen];
    let len_ct = &prefix[klen..klen + LENGTH_FIELD_LEN + TAG_LEN];

    let subkey = derive_subkey(&passage.master_key, salt, klen).ok()?;
    let cipher = AeadCipher::new(passage.method, &subkey).ok()?;
    let mut nonces = NonceSequence::new();
    let len_plain = cipher.open(&nonces.next(), len_ct).ok()?;
    let payload_len = u16::from_be_bytes([len_plain[0], len_plain[1]]) as usize;

    Some((salt.to_vec(), payload_len, cipher))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::passage::{PassageRegistry, Role, UserContextStore};

    /// Builds a handshake prefix the way a real client would, for a given
    /// passage's credential, so `accept` can trial-decrypt it.
    fn make_prefix(method: crate::config::CipherMethod, master_key: &[u8], salt: &[u8], payload_len: u16) -> Vec<u8> {
        let subkey = derive_subkey(master_key, salt, method.key_len()).unwrap();
        let cipher = AeadCipher::new(method, &subkey).unwrap();
        let mut nonces = NonceSequence::new();
        let len_ct = cipher.seal(&nonces.next(), &payload_len.to_be_bytes()).unwrap();
        let mut prefix = Vec::with_capacity(PREFIX_LEN);
        prefix.extend_from_slice(salt);
        prefix.extend_from_slice(&len_ct);
        prefix.resize(PREFIX_LEN, 0);
        prefix
    }

    #[tokio::test]
    async fn authenticates_the_right_passage_among_several_wrong_ones() {
        use crate::config::CipherMethod;

        let registry = PassageRegistry::new(
            vec![
                Passage::new("p1", CipherMethod::Chacha20Poly1305, vec![1u8; 32], Role::Client, None),
                Passage::new("p2", CipherMethod::Chacha20Poly1305, vec![2u8; 32], Role::Client, None),
                Passage::new("p3", CipherMethod::Chacha20Poly1305, vec![3u8; 32], Role::Client, None),
            ],
            CipherMethod::Chacha20Poly1305,
        );
        let users = UserContextStore::new(Arc::new(registry), &CacheConfig::default());
        let replay = ReplayFilter::new(1000, Duration::from_secs(60));

        let salt = vec![9u8; 32];
        let prefix = make_prefix(CipherMethod::Chacha20Poly1305, &[3u8; 32], &salt, 0);

        let (mut client, server_side) = tokio::io::duplex(4096);
        client.write_all(&prefix).await.unwrap();

        let source: IpAddr = "203.0.113.9".parse().unwrap();
        let accepted =
            accept(server_side, source, &users, &replay, Duration::from_millis(100)).await.unwrap();
        assert_eq!(accepted.passage.id, "p3");
    }

    #[tokio::test]
    async fn replayed_salt_is_rejected_on_the_second_connection() {
        use crate::config::CipherMethod;

        let registry = PassageRegistry::new(
            vec![Passage::new("p", CipherMethod::Chacha20Poly1305, vec![5u8; 32], Role::Client, None)],
            CipherMethod::Chacha20Poly1305,
        );
        let users = UserContextStore::new(Arc::new(registry), &CacheConfig::default());
        let replay = ReplayFilter::new(1000, Duration::from_secs(60));

        let salt = vec![7u8; 32];
        let prefix = make_prefix(CipherMethod::Chacha20Poly1305, &[5u8; 32], &salt, 0);
        let source: IpAddr = "203.0.113.10".parse().unwrap();

        let (mut client1, server1) = tokio::io::duplex(4096);
        client1.write_all(&prefix).await.unwrap();
        accept(server1, source, &users, &replay, Duration::from_millis(100)).await.unwrap();

        let (mut client2, server2) = tokio::io::duplex(4096);
        client2.write_all(&prefix).await.unwrap();
        let result = accept(server2, source, &users, &replay, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(JohnError::ReplayAttack)));
    }
}
