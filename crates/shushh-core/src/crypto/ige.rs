//! AES-256 in Infinite Garble Extension mode
//!
//! For each 16-byte block `B`, with chaining values `x` and `y` seeded from the
//! first and second halves of the 32-byte IV:
//!
//! ```text
//! encrypt: Y = E(B ^ y) ^ x;  x = B; y = Y
//! decrypt: X = D(C ^ x) ^ y;  x = X; y = C
//! ```
//!
//! The mode is unauthenticated. Tampered ciphertext decrypts to garbage and
//! is never detected here.

use super::SessionKey;
use crate::{CoreError, Result};
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes256, Block};
use rand::rngs::OsRng;
use rand::RngCore;

pub const BLOCK_SIZE: usize = 16;

/// Minimum number of random bytes appended before encryption
pub const MIN_PADDING: usize = 12;

/// Number of random bytes [`pad`] appends to `len` bytes of plaintext.
///
/// Always between `MIN_PADDING + 1` and `MIN_PADDING + BLOCK_SIZE`; a
/// block-aligned input always gets exactly one block.
pub fn padding_len(len: usize) -> usize {
    MIN_PADDING + (BLOCK_SIZE - (len + MIN_PADDING) % BLOCK_SIZE)
}

/// Append random padding so the result is block aligned
pub fn pad(data: &[u8]) -> Vec<u8> {
    let mut padded = Vec::with_capacity(data.len() + padding_len(data.len()));
    padded.extend_from_slice(data);
    padded.resize(data.len() + padding_len(data.len()), 0);
    OsRng.fill_bytes(&mut padded[data.len()..]);
    padded
}

/// Pad `plaintext` and encrypt it. Padding is never removed by [`decrypt`];
/// callers carry their own length information.
pub fn encrypt(plaintext: &[u8], key: &SessionKey) -> Vec<u8> {
    let padded = pad(plaintext);
    // Padded input is aligned by construction
    transform(&padded, key, Direction::Encrypt)
}

/// Encrypt already block-aligned data without padding
#[cfg(test)]
fn encrypt_aligned(data: &[u8], key: &SessionKey) -> Result<Vec<u8>> {
    check_aligned(data.len())?;
    Ok(transform(data, key, Direction::Encrypt))
}

/// Decrypt block-aligned ciphertext. The output includes the sender's padding.
pub fn decrypt(ciphertext: &[u8], key: &SessionKey) -> Result<Vec<u8>> {
    check_aligned(ciphertext.len())?;
    Ok(transform(ciphertext, key, Direction::Decrypt))
}

fn check_aligned(len: usize) -> Result<()> {
    if len % BLOCK_SIZE != 0 {
        return Err(CoreError::Format(format!(
            "ciphertext length {} is not a multiple of {}",
            len, BLOCK_SIZE
        )));
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum Direction {
    Encrypt,
    Decrypt,
}

fn transform(data: &[u8], key: &SessionKey, direction: Direction) -> Vec<u8> {
    let cipher = Aes256::new(GenericArray::from_slice(key.key()));
    let iv = key.iv();

    let mut x_prev = [0u8; BLOCK_SIZE];
    let mut y_prev = [0u8; BLOCK_SIZE];
    x_prev.copy_from_slice(&iv[..BLOCK_SIZE]);
    y_prev.copy_from_slice(&iv[BLOCK_SIZE..]);

    let mut out = Vec::with_capacity(data.len());
    for chunk in data.chunks_exact(BLOCK_SIZE) {
        let mut input = [0u8; BLOCK_SIZE];
        input.copy_from_slice(chunk);

        match direction {
            Direction::Encrypt => {
                let mut block = Block::clone_from_slice(&xor(&input, &y_prev));
                cipher.encrypt_block(&mut block);
                let y = xor(&block, &x_prev);
                out.extend_from_slice(&y);
                x_prev = input;
                y_prev = y;
            }
            Direction::Decrypt => {
                let mut block = Block::clone_from_slice(&xor(&input, &x_prev));
                cipher.decrypt_block(&mut block);
                let x = xor(&block, &y_prev);
                out.extend_from_slice(&x);
                x_prev = x;
                y_prev = input;
            }
        }
    }
    out
}

fn xor(a: &[u8], b: &[u8]) -> [u8; BLOCK_SIZE] {
    let mut out = [0u8; BLOCK_SIZE];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
        *o = x ^ y;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SessionKey {
        let mut key = [0u8; 32];
        let mut iv = [0u8; 32];
        for i in 0..32 {
            key[i] = i as u8;
            iv[i] = (0x40 + i) as u8;
        }
        SessionKey::new(key, iv)
    }

    #[test]
    fn test_padding_bounds() {
        for len in 0..64 {
            let pad = padding_len(len);
            assert!(pad > MIN_PADDING && pad <= MIN_PADDING + BLOCK_SIZE);
            assert_eq!((len + pad) % BLOCK_SIZE, 0);
        }
        assert_eq!(padding_len(0), BLOCK_SIZE);
        assert_eq!(padding_len(48), BLOCK_SIZE);
        assert_eq!(padding_len(4), 28);
    }

    #[test]
    fn test_round_trip_keeps_prefix() {
        let key = test_key();
        for len in [0usize, 1, 4, 15, 16, 17, 100, 1024] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
            let ciphertext = encrypt(&plaintext, &key);
            assert_eq!(ciphertext.len(), len + padding_len(len));

            let decrypted = decrypt(&ciphertext, &key).unwrap();
            assert_eq!(&decrypted[..len], &plaintext[..]);
        }
    }

    #[test]
    fn test_first_block_matches_definition() {
        let key = test_key();
        let plaintext = [0x5au8; BLOCK_SIZE];
        let ciphertext = encrypt_aligned(&plaintext, &key).unwrap();

        let cipher = Aes256::new(GenericArray::from_slice(key.key()));
        let mut y_seed = [0u8; BLOCK_SIZE];
        let mut x_seed = [0u8; BLOCK_SIZE];
        x_seed.copy_from_slice(&key.iv()[..16]);
        y_seed.copy_from_slice(&key.iv()[16..]);

        let mut block = Block::clone_from_slice(&xor(&plaintext, &y_seed));
        cipher.encrypt_block(&mut block);
        let expected = xor(&block, &x_seed);
        assert_eq!(&ciphertext[..], &expected[..]);
    }

    #[test]
    fn test_rejects_unaligned_input() {
        let key = test_key();
        assert!(matches!(decrypt(&[0u8; 17], &key), Err(CoreError::Format(_))));
        assert!(matches!(
            encrypt_aligned(&[0u8; 5], &key),
            Err(CoreError::Format(_))
        ));
        assert!(decrypt(&[], &key).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_key_garbles_without_error() {
        let key = test_key();
        let other = SessionKey::new([9u8; 32], [3u8; 32]);
        let plaintext = [1u8; 32];

        let ciphertext = encrypt_aligned(&plaintext, &key).unwrap();
        let garbled = decrypt(&ciphertext, &other).unwrap();
        assert_eq!(garbled.len(), plaintext.len());
        assert_ne!(&garbled[..], &plaintext[..]);
    }

    #[test]
    fn test_error_propagates_forward() {
        let key = test_key();
        let plaintext = [0u8; 64];
        let mut ciphertext = encrypt_aligned(&plaintext, &key).unwrap();
        ciphertext[0] ^= 0x01;

        let decrypted = decrypt(&ciphertext, &key).unwrap();
        for block in decrypted.chunks(BLOCK_SIZE) {
            assert_ne!(block, &plaintext[..BLOCK_SIZE]);
        }
    }
}
