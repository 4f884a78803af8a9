use hkdf::Hkdf;
use md5::{Digest, Md5};
use sha1::Sha1;

use crate::error::{JohnError, Result};

/// OpenSSL `EVP_BytesToKey`-style KDF: repeatedly MD5 the previous digest
/// concatenated with the password until enough key material accumulates.
/// This is the legacy (pre-2022) Shadowsocks password-to-key derivation.
pub fn evp_bytes_to_key(password: &str, key_len: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(key_len);
    let mut prev: Vec<u8> = Vec::new();
    while key.len() < key_len {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(password.as_bytes());
        prev = hasher.finalize().to_vec();
        key.extend_from_slice(&prev);
    }
    key.truncate(key_len);
    key
}

/// Per-connection subkey: `HKDF-SHA1(master_key, salt, info="ss-subkey")`.
pub fn derive_subkey(master_key: &[u8], salt: &[u8], key_len: usize) -> Result<Vec<u8>> {
    let hk = Hkdf::<Sha1>::new(Some(salt), master_key);
    let mut okm = vec![0u8; key_len];
    hk.expand(b"ss-subkey", &mut okm).map_err(|_| JohnError::Crypto)?;
    Ok(okm)
}
