mod cipher;
mod kdf;
mod padding;

pub use cipher::{AeadCipher, NonceSequence, LENGTH_FIELD_LEN, MAX_CHUNK_SIZE, TAG_LEN};
pub use kdf::{derive_subkey, evp_bytes_to_key};
pub use padding::{padding_len, DEFAULT_PADDING_LIMIT};

use crate::config::CipherMethod;

/// Derives a passage's long-lived master key from its configured password.
/// Salts are per-connection and derived subkeys are scoped to a single
/// stream via [`derive_subkey`]; the master key itself never touches the
/// wire.
pub fn derive_master_key(method: CipherMethod, password: &str) -> Vec<u8> {
    evp_bytes_to_key(password, method.key_len())
}

/// Shadowsocks AEAD uses a salt the same length as the cipher's key.
pub fn salt_len(method: CipherMethod) -> usize {
    method.key_len()
}
