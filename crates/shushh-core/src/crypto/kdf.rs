//! Shared secret to key/IV derivation

use super::SessionKey;
use num_bigint::BigUint;
use sha2::{Digest, Sha512};
use shushh_types::{IV_LEN, KEY_LEN};

/// Fixed width of the serialized shared secret
pub const SECRET_WIDTH: usize = 256;

/// Serialize `shared_secret` big-endian into [`SECRET_WIDTH`] bytes, hash it
/// with SHA-512 and split the digest into key (first half) and IV (second half).
pub fn derive_key_and_iv(shared_secret: &BigUint) -> SessionKey {
    let digest = Sha512::digest(serialize_secret(shared_secret));

    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    key.copy_from_slice(&digest[..KEY_LEN]);
    iv.copy_from_slice(&digest[KEY_LEN..KEY_LEN + IV_LEN]);
    SessionKey::new(key, iv)
}

fn serialize_secret(shared_secret: &BigUint) -> [u8; SECRET_WIDTH] {
    let raw = shared_secret.to_bytes_be();
    // Group elements are far below the width; keep the low-order bytes regardless
    let raw = &raw[raw.len().saturating_sub(SECRET_WIDTH)..];

    let mut out = [0u8; SECRET_WIDTH];
    out[SECRET_WIDTH - raw.len()..].copy_from_slice(raw);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_is_left_padded() {
        let out = serialize_secret(&BigUint::from(0x0102u32));
        assert_eq!(out.len(), SECRET_WIDTH);
        assert!(out[..SECRET_WIDTH - 2].iter().all(|b| *b == 0));
        assert_eq!(&out[SECRET_WIDTH - 2..], &[0x01, 0x02]);
    }

    #[test]
    fn test_derivation_matches_digest_halves() {
        let secret = BigUint::from(123_456_789u64);
        let derived = derive_key_and_iv(&secret);

        let digest = Sha512::digest(serialize_secret(&secret));
        assert_eq!(&derived.key()[..], &digest[..32]);
        assert_eq!(&derived.iv()[..], &digest[32..]);
    }

    #[test]
    fn test_deterministic() {
        let secret = BigUint::from(42u32);
        assert_eq!(derive_key_and_iv(&secret), derive_key_and_iv(&secret));
        assert_ne!(
            derive_key_and_iv(&secret),
            derive_key_and_iv(&BigUint::from(43u32))
        );
    }
}
