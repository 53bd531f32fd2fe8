//! Fixed-group Diffie-Hellman
//!
//! The group is the 768-bit Oakley Group 1 prime with generator 3, shared with
//! the legacy clients this protocol interoperates with. Exponentiation is plain
//! square-and-multiply and is not hardened against timing side channels.

use super::SessionKey;
use crate::{CoreError, Result};
use num_bigint::BigUint;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::OnceLock;

/// Group generator
pub const GENERATOR: u32 = 3;

/// Size of a freshly drawn private exponent in bytes
pub const EXPONENT_BYTES: usize = 256;

const MODULUS_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A63A3620FFFFFFFFFFFFFFFF",
);

/// The group prime `p`
pub fn modulus() -> &'static BigUint {
    static MODULUS: OnceLock<BigUint> = OnceLock::new();
    MODULUS.get_or_init(|| {
        BigUint::parse_bytes(MODULUS_HEX.as_bytes(), 16).expect("group modulus is valid hex")
    })
}

/// The group generator `g`
pub fn generator() -> BigUint {
    BigUint::from(GENERATOR)
}

/// `base^exponent mod modulus` by binary exponentiation.
///
/// `modulus` must be non-zero. A modulus of one yields zero.
pub fn mod_pow(base: &BigUint, exponent: &BigUint, modulus: &BigUint) -> BigUint {
    let one = BigUint::from(1u32);
    if *modulus == one {
        return BigUint::from(0u32);
    }

    let mut result = one;
    let mut base = base % modulus;
    for bit in 0..exponent.bits() {
        if exponent.bit(bit) {
            result = result * &base % modulus;
        }
        base = &base * &base % modulus;
    }
    result
}

/// Uniformly random non-negative integer of `byte_len` bytes from the OS CSPRNG
pub fn random_exponent(byte_len: usize) -> BigUint {
    let mut bytes = vec![0u8; byte_len];
    OsRng.fill_bytes(&mut bytes);
    BigUint::from_bytes_be(&bytes)
}

/// Lowercase hex without prefix, the wire encoding of public values
pub fn to_hex(value: &BigUint) -> String {
    value.to_str_radix(16)
}

/// Parse a peer's public value and check it lies in `(1, p - 1)`
pub fn parse_public(hex: &str) -> Result<BigUint> {
    let value = BigUint::parse_bytes(hex.as_bytes(), 16)
        .ok_or_else(|| CoreError::InvalidPublicValue(format!("not a hex integer: {:?}", hex)))?;

    let one = BigUint::from(1u32);
    let upper = modulus() - &one;
    if value <= one || value >= upper {
        return Err(CoreError::InvalidPublicValue(
            "value outside (1, p - 1)".to_string(),
        ));
    }
    Ok(value)
}

/// One side of a single handshake attempt. The private exponent never leaves
/// this struct and is dropped with it.
pub struct KeyPair {
    secret: BigUint,
    public: BigUint,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self::from_secret(random_exponent(EXPONENT_BYTES))
    }

    pub fn from_secret(secret: BigUint) -> Self {
        let public = mod_pow(&generator(), &secret, modulus());
        Self { secret, public }
    }

    pub fn public(&self) -> &BigUint {
        &self.public
    }

    pub fn public_hex(&self) -> String {
        to_hex(&self.public)
    }

    /// Raw shared secret `peer_public^secret mod p`
    pub fn shared_secret(&self, peer_public: &BigUint) -> BigUint {
        mod_pow(peer_public, &self.secret, modulus())
    }

    /// Complete the handshake and derive the symmetric key material
    pub fn agree(self, peer_public: &BigUint) -> SessionKey {
        super::derive_key_and_iv(&self.shared_secret(peer_public))
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_hex())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modulus_is_768_bits() {
        assert_eq!(modulus().bits(), 768);
        assert_eq!(modulus().to_bytes_be().len(), 96);
    }

    #[test]
    fn test_mod_pow_small_values() {
        let n = |v: u32| BigUint::from(v);
        assert_eq!(mod_pow(&n(4), &n(13), &n(497)), n(445));
        assert_eq!(mod_pow(&n(2), &n(0), &n(7)), n(1));
        assert_eq!(mod_pow(&n(0), &n(5), &n(7)), n(0));
        assert_eq!(mod_pow(&n(10), &n(3), &n(1)), n(0));
    }

    #[test]
    fn test_mod_pow_matches_library() {
        let base = random_exponent(64);
        let exponent = random_exponent(64);
        assert_eq!(
            mod_pow(&base, &exponent, modulus()),
            base.modpow(&exponent, modulus())
        );
    }

    #[test]
    fn test_random_exponents_differ() {
        let a = random_exponent(EXPONENT_BYTES);
        let b = random_exponent(EXPONENT_BYTES);
        assert_ne!(a, b);
        assert!(a.bits() <= (EXPONENT_BYTES * 8) as u64);
    }

    #[test]
    fn test_dh_agreement() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let s1 = alice.shared_secret(bob.public());
        let s2 = bob.shared_secret(alice.public());
        assert_eq!(s1, s2);

        let bob_public = bob.public().clone();
        let alice_public = alice.public().clone();
        assert_eq!(alice.agree(&bob_public), bob.agree(&alice_public));
    }

    #[test]
    fn test_parse_public() {
        let pair = KeyPair::generate();
        assert_eq!(&parse_public(&pair.public_hex()).unwrap(), pair.public());

        assert!(parse_public("").is_err());
        assert!(parse_public("xyz").is_err());
        assert!(parse_public("1").is_err());
        assert!(parse_public(&to_hex(&(modulus() - BigUint::from(1u32)))).is_err());
        assert!(parse_public(&to_hex(modulus())).is_err());
        assert!(parse_public("2").is_ok());
    }
}
