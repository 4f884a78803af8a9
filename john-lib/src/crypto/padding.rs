use hmac::{Hmac, Mac};
use sha1::Sha1;

/// Default upper bound on control-response padding, chosen so padded
/// frames stay well under a single AEAD chunk.
pub const DEFAULT_PADDING_LIMIT: usize = 256;

/// `PRF(masterKey, body) mod limit` (§4.6): a deterministic, keyed pseudo-
/// random padding length so two control responses with the same body
/// always pad the same way, but an observer without the key can't predict
/// or strip it.
pub fn padding_len(master_key: &[u8], body: &[u8], limit: usize) -> usize {
    if limit == 0 {
        return 0;
    }
    let mut mac = Hmac::<Sha1>::new_from_slice(master_key).expect("hmac accepts any key length");
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    let mut counter = [0u8; 8];
    counter.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(counter) % limit as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_is_deterministic_for_the_same_inputs() {
        let a = padding_len(b"key", b"body", 256);
        let b = padding_len(b"key", b"body", 256);
        assert_eq!(a, b);
    }

    #[test]
    fn padding_varies_with_body() {
        let a = padding_len(b"key", b"body-one", 256);
        let b = padding_len(b"key", b"body-two", 256);
        assert_ne!(a, b);
    }

    #[test]
    fn padding_never_reaches_the_limit() {
        for body in [&b"x"[..], &b"yy"[..], &b"zzz"[..]] {
            assert!(padding_len(b"key", body, 64) < 64);
        }
    }

    #[test]
    fn zero_limit_means_no_padding() {
        assert_eq!(padding_len(b"key", b"body", 0), 0);
    }
}
