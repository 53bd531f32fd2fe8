//! Chat payload framing and two-layer encryption
//!
//! A chat payload is a 4-byte big-endian length followed by UTF-8 text. It is
//! encrypted under the peer key, and that ciphertext is wrapped again under the
//! transport key shared with the relay. The relay only ever removes and
//! re-applies the outer layer.

use crate::crypto::ige::{self, BLOCK_SIZE};
use crate::crypto::SessionKey;
use crate::{CoreError, Result};

/// Size of the big-endian length prefix
pub const LENGTH_PREFIX: usize = 4;

/// Length-prefix `text`
pub fn frame(text: &str) -> Result<Vec<u8>> {
    let len = u32::try_from(text.len())
        .map_err(|_| CoreError::Format(format!("message of {} bytes is too long", text.len())))?;

    let mut framed = Vec::with_capacity(LENGTH_PREFIX + text.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(text.as_bytes());
    Ok(framed)
}

/// Read the length prefix and decode exactly that many bytes. Anything after
/// them is padding and ignored.
pub fn unframe(buf: &[u8]) -> Result<String> {
    if buf.len() < LENGTH_PREFIX {
        return Err(CoreError::Format(format!(
            "frame of {} bytes has no length prefix",
            buf.len()
        )));
    }
    let mut prefix = [0u8; LENGTH_PREFIX];
    prefix.copy_from_slice(&buf[..LENGTH_PREFIX]);
    let len = u32::from_be_bytes(prefix) as usize;

    let body = &buf[LENGTH_PREFIX..];
    if len > body.len() {
        return Err(CoreError::Format(format!(
            "declared length {} exceeds {} available bytes",
            len,
            body.len()
        )));
    }
    Ok(String::from_utf8(body[..len].to_vec())?)
}

/// Encrypt under the peer key only (the end-to-end layer)
pub fn seal_inner(text: &str, peer: &SessionKey) -> Result<Vec<u8>> {
    Ok(ige::encrypt(&frame(text)?, peer))
}

/// Apply the transport layer to an end-to-end ciphertext
pub fn wrap_transport(inner: &[u8], transport: &SessionKey) -> Vec<u8> {
    ige::encrypt(inner, transport)
}

/// Remove the transport layer, returning the end-to-end ciphertext unchanged.
///
/// The inner ciphertext is block aligned, so the outer layer always carries
/// exactly one block of padding, which is dropped here.
pub fn strip_transport(data: &[u8], transport: &SessionKey) -> Result<Vec<u8>> {
    if data.len() < 2 * BLOCK_SIZE {
        return Err(CoreError::Format(format!(
            "wrapped ciphertext of {} bytes is too short",
            data.len()
        )));
    }
    let mut inner = ige::decrypt(data, transport)?;
    inner.truncate(data.len() - BLOCK_SIZE);
    Ok(inner)
}

/// Outgoing chat message: frame, encrypt under the peer key, then the transport key
pub fn seal(text: &str, peer: &SessionKey, transport: &SessionKey) -> Result<Vec<u8>> {
    let inner = seal_inner(text, peer)?;
    Ok(wrap_transport(&inner, transport))
}

/// Incoming chat message: strip the transport layer, decrypt under the peer
/// key and read the framed text
pub fn open(data: &[u8], transport: &SessionKey, peer: &SessionKey) -> Result<String> {
    let inner = strip_transport(data, transport)?;
    let framed = ige::decrypt(&inner, peer)?;
    unframe(&framed)
}
