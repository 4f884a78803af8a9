//! The Shadowsocks AEAD chunk framing (C6): `salt‖encLen‖lenTag‖encPayload‖payloadTag`
//! on the wire, a plain byte stream to callers above it.
//!
//! [`ShadowsocksStream`] wraps an already-handshaken connection — salt
//! exchanged, subkeys derived — and does nothing but frame/deframe chunks
//! as `AsyncRead`/`AsyncWrite`. Handshake and authentication happen once,
//! before this type exists; see [`crate::tcp::server`].

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::crypto::{AeadCipher, NonceSequence, LENGTH_FIELD_LEN, MAX_CHUNK_SIZE, TAG_LEN};

enum ReadState {
    Length { len_buf: Vec<u8>, len_read: usize },
    Payload { payload_buf: Vec<u8>, payload_read: usize },
}

enum WriteState {
    Ready,
    Writing { data: Vec<u8>, written: usize, original_len: usize },
}

/// A Shadowsocks AEAD tunnel over an inner `AsyncRead + AsyncWrite`
/// transport, chunked to [`MAX_CHUNK_SIZE`] per the wire format.
pub struct ShadowsocksStream<S> {
    inner: S,
    encoder: AeadCipher,
    encoder_nonces: NonceSequence,
    decoder: AeadCipher,
    decoder_nonces: NonceSequence,
    read_buf: Vec<u8>,
    read_pos: usize,
    read_state: ReadState,
    write_state: WriteState,
}

impl<S> ShadowsocksStream<S> {
    pub fn new(inner: S, encoder: AeadCipher, decoder: AeadCipher) -> Self {
        Self {
            inner,
            encoder,
            encoder_nonces: NonceSequence::new(),
            decoder,
            decoder_nonces: NonceSequence::new(),
            read_buf: Vec::new(),
            read_pos: 0,
            read_state: ReadState::Length {
                len_buf: vec![0u8; LENGTH_FIELD_LEN + TAG_LEN],
                len_read: 0,
            },
            write_state: WriteState::Ready,
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Resumes a stream whose handshake already decoded the first length
    /// field out-of-band; `decoder_nonces` must already reflect that one
    /// nonce draw so the next decode lines up with the payload sub-frame.
    pub fn resume(
        inner: S,
        encoder: AeadCipher,
        encoder_nonces: NonceSequence,
        decoder: AeadCipher,
        decoder_nonces: NonceSequence,
        pending_payload_len: usize,
    ) -> Self {
        Self {
            inner,
            encoder,
            encoder_nonces,
            decoder,
            decoder_nonces,
            read_buf: Vec::new(),
            read_pos: 0,
            read_state: ReadState::Payload {
                payload_buf: vec![0u8; pending_payload_len + TAG_LEN],
                payload_read: 0,
            },
            write_state: WriteState::Ready,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ShadowsocksStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        loop {
            if this.read_pos < this.read_buf.len() {
                let remaining = &this.read_buf[this.read_pos..];
                let to_copy = remaining.len().min(buf.remaining());
                buf.put_slice(&remaining[..to_copy]);
                this.read_pos += to_copy;
                if this.read_pos >= this.read_buf.len() {
                    this.read_buf.clear();
                    this.read_pos = 0;
                }
                return Poll::Ready(Ok(()));
            }

            match &mut this.read_state {
                ReadState::Length { len_buf, len_read } => {
                    while *len_read < len_buf.len() {
                        let mut rb = ReadBuf::new(&mut len_buf[*len_read..]);
                        match Pin::new(&mut this.inner).poll_read(cx, &mut rb) {
                            Poll::Ready(Ok(())) => {
                                let n = rb.filled().len();
                                if n == 0 {
                                    return Poll::Ready(Err(std::io::Error::new(
                                        std::io::ErrorKind::UnexpectedEof,
                                        "connection closed mid length frame",
                                    )));
                                }
                                *len_read += n;
                            }
                            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                            Poll::Pending => return Poll::Pending,
                        }
                    }

                    let nonce = this.decoder_nonces.next();
                    let len_plain = this
                        .decoder
                        .open(&nonce, len_buf)
                        .map_err(|e| std::io::Error::other(e.to_string()))?;
                    let payload_len = u16::from_be_bytes([len_plain[0], len_plain[1]]) as usize;
                    if payload_len > MAX_CHUNK_SIZE {
                        return Poll::Ready(Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!("chunk length {payload_len} exceeds maximum {MAX_CHUNK_SIZE}"),
                        )));
                    }

                    this.read_state = ReadState::Payload {
                        payload_buf: vec![0u8; payload_len + TAG_LEN],
                        payload_read: 0,
                    };
                }
                ReadState::Payload { payload_buf, payload_read } => {
                    while *payload_read < payload_buf.len() {
                        let mut rb = ReadBuf::new(&mut payload_buf[*payload_read..]);
                        match Pin::new(&mut this.inner).poll_read(cx, &mut rb) {
                            Poll::Ready(Ok(())) => {
                                let n = rb.filled().len();
                                if n == 0 {
                                    return Poll::Ready(Err(std::io::Error::new(
                                        std::io::ErrorKind::UnexpectedEof,
                                        "connection closed mid payload frame",
                                    )));
                                }
                                *payload_read += n;
                            }
                            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                            Poll::Pending => return Poll::Pending,
                        }
                    }

                    let nonce = this.decoder_nonces.next();
                    let payload = this
                        .decoder
                        .open(&nonce, payload_buf)
                        .map_err(|e| std::io::Error::other(e.to_string()))?;
                    this.read_buf = payload;
                    this.read_pos = 0;
                    this.read_state = ReadState::Length {
                        len_buf: vec![0u8; LENGTH_FIELD_LEN + TAG_LEN],
                        len_read: 0,
                    };
                }
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ShadowsocksStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();

        loop {
            match &mut this.write_state {
                WriteState::Ready => {
                    if buf.is_empty() {
                        return Poll::Ready(Ok(0));
                    }

                    let chunk_len = buf.len().min(MAX_CHUNK_SIZE);
                    let chunk = &buf[..chunk_len];
                    let len_plain = (chunk_len as u16).to_be_bytes();

                    let len_nonce = this.encoder_nonces.next();
                    let encrypted_len = this
                        .encoder
                        .seal(&len_nonce, &len_plain)
                        .map_err(|e| std::io::Error::other(e.to_string()))?;
                    let payload_nonce = this.encoder_nonces.next();
                    let encrypted_payload = this
                        .encoder
                        .seal(&payload_nonce, chunk)
                        .map_err(|e| std::io::Error::other(e.to_string()))?;

                    let mut data = Vec::with_capacity(encrypted_len.len() + encrypted_payload.len());
                    data.extend_from_slice(&encrypted_len);
                    data.extend_from_slice(&encrypted_payload);

                    this.write_state =
                        WriteState::Writing { data, written: 0, original_len: chunk_len };
                }
                WriteState::Writing { data, written, original_len } => {
                    while *written < data.len() {
                        match Pin::new(&mut this.inner).poll_write(cx, &data[*written..]) {
                            Poll::Ready(Ok(n)) => {
                                if n == 0 {
                                    return Poll::Ready(Err(std::io::Error::new(
                                        std::io::ErrorKind::WriteZero,
                                        "write returned 0",
                                    )));
                                }
                                *written += n;
                            }
                            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                            Poll::Pending => return Poll::Pending,
                        }
                    }

                    let n = *original_len;
                    this.write_state = WriteState::Ready;
                    return Poll::Ready(Ok(n));
                }
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CipherMethod;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn write_then_read_roundtrips_a_chunk_larger_than_one_frame() {
        let (client, server) = tokio::io::duplex(1 << 20);
        let key = vec![0x7au8; 32];

        let c_enc = AeadCipher::new(CipherMethod::Chacha20Poly1305, &key).unwrap();
        let c_dec = AeadCipher::new(CipherMethod::Chacha20Poly1305, &key).unwrap();
        let mut writer = ShadowsocksStream::new(client, c_enc, c_dec);

        let s_enc = AeadCipher::new(CipherMethod::Chacha20Poly1305, &key).unwrap();
        let s_dec = AeadCipher::new(CipherMethod::Chacha20Poly1305, &key).unwrap();
        let mut reader = ShadowsocksStream::new(server, s_enc, s_dec);

        let payload = vec![0x5bu8; MAX_CHUNK_SIZE * 2 + 37];
        let write_payload = payload.clone();
        let writer_task =
            tokio::spawn(async move { writer.write_all(&write_payload).await.unwrap() });

        let mut received = vec![0u8; payload.len()];
        reader.read_exact(&mut received).await.unwrap();
        writer_task.await.unwrap();

        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn mismatched_keys_fail_to_open() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = ShadowsocksStream::new(
            client,
            AeadCipher::new(CipherMethod::Chacha20Poly1305, &[1u8; 32]).unwrap(),
            AeadCipher::new(CipherMethod::Chacha20Poly1305, &[1u8; 32]).unwrap(),
        );
        let mut reader = ShadowsocksStream::new(
            server,
            AeadCipher::new(CipherMethod::Chacha20Poly1305, &[2u8; 32]).unwrap(),
            AeadCipher::new(CipherMethod::Chacha20Poly1305, &[2u8; 32]).unwrap(),
        );

        tokio::spawn(async move { writer.write_all(b"hello").await.unwrap() });
        let mut buf = [0u8; 5];
        assert!(reader.read_exact(&mut buf).await.is_err());
    }
}
