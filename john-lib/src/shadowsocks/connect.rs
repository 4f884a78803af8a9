//! Client-side handshake: used when this node chains a matched passage's
//! traffic to a configured upstream (C9 step 7) instead of relaying
//! plaintext. The mirror of [`super::handshake::accept`] — here *we* pick
//! the salt instead of trial-decrypting one.

use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::CipherMethod;
use crate::crypto::{derive_subkey, salt_len, AeadCipher};
use crate::error::Result;

use super::framer::ShadowsocksStream;

/// Performs the client-side salt exchange over `inner` and returns a keyed
/// stream ready to carry the address header and relay data.
pub async fn connect<S>(mut inner: S, method: CipherMethod, master_key: &[u8]) -> Result<ShadowsocksStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut client_salt = vec![0u8; salt_len(method)];
    rand::thread_rng().fill_bytes(&mut client_salt);
    inner.write_all(&client_salt).await?;
    let encoder_key = derive_subkey(master_key, &client_salt, method.key_len())?;
    let encoder = AeadCipher::new(method, &encoder_key)?;

    let mut server_salt = vec![0u8; salt_len(method)];
    inner.read_exact(&mut server_salt).await?;
    let decoder_key = derive_subkey(master_key, &server_salt, method.key_len())?;
    let decoder = AeadCipher::new(method, &decoder_key)?;

    Ok(ShadowsocksStream::new(inner, encoder, decoder))
}
