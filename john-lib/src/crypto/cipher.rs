use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::ChaCha20Poly1305;

use crate::config::CipherMethod;
use crate::error::{JohnError, Result};

/// Shadowsocks AEAD caps a single length/payload chunk at 0x3FFF bytes.
pub const MAX_CHUNK_SIZE: usize = 0x3FFF;
pub const TAG_LEN: usize = 16;
pub const LENGTH_FIELD_LEN: usize = 2;

/// A little-endian 96-bit nonce counter, incremented after every seal/open.
/// Shared state between the length and payload sub-frames of a chunk: the
/// caller must draw one nonce per AEAD call, in send/receive order.
#[derive(Debug, Default, Clone)]
pub struct NonceSequence {
    counter: [u8; 12],
}

impl NonceSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> [u8; 12] {
        let current = self.counter;
        for byte in self.counter.iter_mut() {
            let (next, overflowed) = byte.overflowing_add(1);
            *byte = next;
            if !overflowed {
                break;
            }
        }
        current
    }
}

/// Dispatches AEAD seal/open to the configured cipher suite.
pub enum AeadCipher {
    Aes128Gcm(Box<Aes128Gcm>),
    Aes256Gcm(Box<Aes256Gcm>),
    ChaCha20Poly1305(Box<ChaCha20Poly1305>),
}

impl AeadCipher {
    pub fn new(method: CipherMethod, key: &[u8]) -> Result<Self> {
        Ok(match method {
            CipherMethod::Aes128Gcm => AeadCipher::Aes128Gcm(Box::new(
                Aes128Gcm::new_from_slice(key).map_err(|_| JohnError::Crypto)?,
            )),
            CipherMethod::Aes256Gcm => AeadCipher::Aes256Gcm(Box::new(
                Aes256Gcm::new_from_slice(key).map_err(|_| JohnError::Crypto)?,
            )),
            CipherMethod::Chacha20Poly1305 => AeadCipher::ChaCha20Poly1305(Box::new(
                ChaCha20Poly1305::new_from_slice(key).map_err(|_| JohnError::Crypto)?,
            )),
        })
    }

    pub fn seal(&self, nonce: &[u8; 12], plaintext: &[u8]) -> Result<Vec<u8>> {
        let payload = Payload { msg: plaintext, aad: &[] };
        let result = match self {
            AeadCipher::Aes128Gcm(c) => c.encrypt(nonce.into(), payload),
            AeadCipher::Aes256Gcm(c) => c.encrypt(nonce.into(), payload),
            AeadCipher::ChaCha20Poly1305(c) => c.encrypt(nonce.into(), payload),
        };
        result.map_err(|_| JohnError::Crypto)
    }

    pub fn open(&self, nonce: &[u8; 12], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let payload = Payload { msg: ciphertext, aad: &[] };
        let result = match self {
            AeadCipher::Aes128Gcm(c) => c.decrypt(nonce.into(), payload),
            AeadCipher::Aes256Gcm(c) => c.decrypt(nonce.into(), payload),
            AeadCipher::ChaCha20Poly1305(c) => c.decrypt(nonce.into(), payload),
        };
        result.map_err(|_| JohnError::Crypto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_roundtrips_for_every_method() {
        for method in [
            CipherMethod::Aes128Gcm,
            CipherMethod::Aes256Gcm,
            CipherMethod::Chacha20Poly1305,
        ] {
            let key = vec![0x42u8; method.key_len()];
            let cipher = AeadCipher::new(method, &key).unwrap();
            let mut nonces = NonceSequence::new();
            let sealed = cipher.seal(&nonces.next(), b"hello, john").unwrap();
            let mut reader_nonces = NonceSequence::new();
            let opened = cipher.open(&reader_nonces.next(), &sealed).unwrap();
            assert_eq!(opened, b"hello, john");
        }
    }

    #[test]
    fn open_rejects_tampered_ciphertext() {
        let key = vec![0x11u8; 32];
        let cipher = AeadCipher::new(CipherMethod::Chacha20Poly1305, &key).unwrap();
        let mut nonces = NonceSequence::new();
        let mut sealed = cipher.seal(&nonces.next(), b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        let mut reader_nonces = NonceSequence::new();
        assert!(cipher.open(&reader_nonces.next(), &sealed).is_err());
    }

    #[test]
    fn nonce_sequence_increments_little_endian() {
        let mut seq = NonceSequence::new();
        assert_eq!(seq.next(), [0u8; 12]);
        let mut expect = [0u8; 12];
        expect[0] = 1;
        assert_eq!(seq.next(), expect);
    }
}
