//! Cryptographic primitives for the Steam CM wire protocol.
//!
//! This crate covers exactly the crypto surface the connection manager
//! handshake needs: wrapping a fresh session key under the universe RSA
//! key, and AES-128-CBC framing for everything sent after the handshake
//! completes. Higher-level framing and dispatch live in `steamcm-proto`
//! and `steamcm-net`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

#[macro_use]
mod sha;

pub mod aes;
pub mod rsa;

pub use crate::aes::IntegrityError;

use rand::RngCore;

/// A freshly generated 32-byte session key plus the RSA blob to send as
/// `ChannelEncryptResponse`'s key payload.
///
/// The 32 random bytes split into two 16-byte halves once the handshake
/// completes: the first half becomes the ongoing HMAC secret, the second
/// half becomes the AES-128 key used for all subsequent frame encryption.
pub struct SessionKey {
    /// Raw 32 bytes of key material drawn for this handshake.
    pub key: [u8; 32],
    /// RSA-OAEP/SHA-1 ciphertext of `key` (optionally `key || challenge`)
    /// under the universe public key.
    pub encrypted_blob: Vec<u8>,
}

impl SessionKey {
    /// The AES-128 key used to encrypt/decrypt frames for this session.
    pub fn aes_key(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out.copy_from_slice(&self.key[16..]);
        out
    }

    /// The HMAC-SHA1 secret bound into each frame's IV for this session.
    pub fn hmac_secret(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out.copy_from_slice(&self.key[..16]);
        out
    }
}

/// Generate a fresh random 32-byte session key and wrap it for the
/// handshake.
///
/// `challenge` is the server's `ChannelEncryptRequest` challenge bytes, if
/// any; when present it is appended to the key before RSA-wrapping so the
/// server can bind the response to its own nonce.
pub fn generate_session_key(challenge: Option<&[u8]>) -> Result<SessionKey, crate::rsa::WrapError> {
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);

    let mut plaintext = key.to_vec();
    if let Some(challenge) = challenge {
        plaintext.extend_from_slice(challenge);
    }

    let public_key = crate::rsa::universe_key();
    let encrypted_blob = crate::rsa::encrypt_oaep(&mut rand::rngs::OsRng, &public_key, &plaintext)
        .map_err(crate::rsa::WrapError)?;

    Ok(SessionKey { key, encrypted_blob })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_session_key_with_plausible_blob_length() {
        let session_key = generate_session_key(None).expect("OAEP-wraps under the universe key");
        assert_eq!(session_key.key.len(), 32);
        assert_eq!(session_key.encrypted_blob.len(), 128);
    }

    #[test]
    fn generates_session_key_with_challenge_folded_in() {
        let session_key =
            generate_session_key(Some(b"0123456789abcdef")).expect("OAEP-wraps a longer payload");
        assert_eq!(session_key.encrypted_blob.len(), 128);
    }

    #[test]
    fn aes_key_and_hmac_secret_are_disjoint_halves() {
        let session_key = generate_session_key(None).expect("OAEP-wraps under the universe key");
        assert_eq!(&session_key.key[..16], &session_key.hmac_secret());
        assert_eq!(&session_key.key[16..], &session_key.aes_key());
    }
}
