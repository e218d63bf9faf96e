//! AES-128-CBC session encryption.
//!
//! Steam CM session crypto is plain CBC, not the IGE mode used elsewhere in
//! this workspace's ancestry, so this module is built directly on the
//! `aes` crate's block cipher rather than sharing code with a sibling.
//! The IV itself is never sent in the clear: it is ECB-encrypted under the
//! session key and prefixed to the ciphertext. The HMAC-bound variant
//! additionally folds the plaintext itself into the IV via HMAC-SHA1, so a
//! ciphertext tampered with in transit decrypts to a plaintext whose IV no
//! longer matches what it was encrypted under.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use cipher::generic_array::GenericArray;

const BLOCK: usize = 16;

/// An encrypted frame failed PKCS#7 unpadding or an HMAC-bound IV did not
/// match the plaintext it was decrypted to.
#[derive(Debug)]
pub struct IntegrityError;

impl std::fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AES frame failed integrity or padding check")
    }
}

impl std::error::Error for IntegrityError {}

fn ecb_encrypt_block(key: &Aes128, block: &mut [u8; BLOCK]) {
    let mut ga = GenericArray::clone_from_slice(block);
    key.encrypt_block(&mut ga);
    block.copy_from_slice(&ga);
}

fn ecb_decrypt_block(key: &Aes128, block: &mut [u8; BLOCK]) {
    let mut ga = GenericArray::clone_from_slice(block);
    key.decrypt_block(&mut ga);
    block.copy_from_slice(&ga);
}

fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let pad_len = BLOCK - (data.len() % BLOCK);
    let mut out = Vec::with_capacity(data.len() + pad_len);
    out.extend_from_slice(data);
    out.extend(std::iter::repeat(pad_len as u8).take(pad_len));
    out
}

fn pkcs7_unpad(data: &[u8]) -> Result<&[u8], IntegrityError> {
    let pad_len = *data.last().ok_or(IntegrityError)? as usize;
    if pad_len == 0 || pad_len > BLOCK || pad_len > data.len() {
        return Err(IntegrityError);
    }
    let (body, pad) = data.split_at(data.len() - pad_len);
    if pad.iter().any(|&b| b as usize != pad_len) {
        return Err(IntegrityError);
    }
    Ok(body)
}

fn cbc_encrypt(key: &Aes128, iv: [u8; BLOCK], plaintext: &[u8]) -> Vec<u8> {
    let padded = pkcs7_pad(plaintext);
    let mut prev = iv;
    let mut out = Vec::with_capacity(padded.len());
    for chunk in padded.chunks_exact(BLOCK) {
        let mut block = [0u8; BLOCK];
        for i in 0..BLOCK {
            block[i] = chunk[i] ^ prev[i];
        }
        ecb_encrypt_block(key, &mut block);
        out.extend_from_slice(&block);
        prev = block;
    }
    out
}

fn cbc_decrypt(key: &Aes128, iv: [u8; BLOCK], ciphertext: &[u8]) -> Result<Vec<u8>, IntegrityError> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK != 0 {
        return Err(IntegrityError);
    }
    let mut prev = iv;
    let mut out = Vec::with_capacity(ciphertext.len());
    for chunk in ciphertext.chunks_exact(BLOCK) {
        let mut block = [0u8; BLOCK];
        block.copy_from_slice(chunk);
        let mut decrypted = block;
        ecb_decrypt_block(key, &mut decrypted);
        for i in 0..BLOCK {
            decrypted[i] ^= prev[i];
        }
        out.extend_from_slice(&decrypted);
        prev = block;
    }
    pkcs7_unpad(&out).map(|b| b.to_vec())
}

/// Unauthenticated AES-128-CBC encrypt: random IV, ECB-encrypt the IV under
/// `key`, CBC-encrypt PKCS#7-padded `plaintext` under `(key, iv)`. Output
/// is `ecb(iv) || cbc(plaintext)`.
pub fn aes_encrypt(plaintext: &[u8], key: &[u8; 16]) -> Vec<u8> {
    let mut iv = [0u8; BLOCK];
    getrandom::getrandom(&mut iv).expect("OS randomness source is available");
    let cipher = Aes128::new(GenericArray::from_slice(key));

    let mut iv_enc = iv;
    ecb_encrypt_block(&cipher, &mut iv_enc);

    let mut out = Vec::with_capacity(BLOCK + plaintext.len() + BLOCK);
    out.extend_from_slice(&iv_enc);
    out.extend(cbc_encrypt(&cipher, iv, plaintext));
    out
}

/// Inverse of [`aes_encrypt`]: ECB-decrypt the leading block to recover the
/// IV, then CBC-decrypt and strip PKCS#7 padding.
pub fn aes_decrypt(frame: &[u8], key: &[u8; 16]) -> Result<Vec<u8>, IntegrityError> {
    if frame.len() < BLOCK {
        return Err(IntegrityError);
    }
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut iv = [0u8; BLOCK];
    iv.copy_from_slice(&frame[..BLOCK]);
    ecb_decrypt_block(&cipher, &mut iv);
    cbc_decrypt(&cipher, iv, &frame[BLOCK..])
}

/// HMAC-bound variant: draw a random 3-byte prefix; the IV is
/// `HMAC-SHA1(hmac_secret, prefix || plaintext)[..13] || prefix`, so the
/// first 13 bytes of the IV bind the ciphertext to the exact plaintext it
/// carries. Proceeds as [`aes_encrypt`] otherwise.
pub fn aes_encrypt_hmac(plaintext: &[u8], key: &[u8; 16], hmac_secret: &[u8]) -> Vec<u8> {
    let mut prefix = [0u8; 3];
    getrandom::getrandom(&mut prefix).expect("OS randomness source is available");
    let iv = derive_hmac_iv(hmac_secret, prefix, plaintext);
    let cipher = Aes128::new(GenericArray::from_slice(key));

    let mut iv_enc = iv;
    ecb_encrypt_block(&cipher, &mut iv_enc);

    let mut out = Vec::with_capacity(BLOCK + plaintext.len() + BLOCK);
    out.extend_from_slice(&iv_enc);
    out.extend(cbc_encrypt(&cipher, iv, plaintext));
    out
}

/// Inverse of [`aes_encrypt_hmac`]. After PKCS#7-stripping, recomputes
/// `HMAC-SHA1(hmac_secret, iv[13:16] || plaintext)` and checks it against
/// `iv[0:13]`; a mismatch means the ciphertext was tampered with or the
/// wrong key/secret was used.
pub fn aes_decrypt_hmac(frame: &[u8], key: &[u8; 16], hmac_secret: &[u8]) -> Result<Vec<u8>, IntegrityError> {
    if frame.len() < BLOCK {
        return Err(IntegrityError);
    }
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut iv = [0u8; BLOCK];
    iv.copy_from_slice(&frame[..BLOCK]);
    ecb_decrypt_block(&cipher, &mut iv);

    let plaintext = cbc_decrypt(&cipher, iv, &frame[BLOCK..])?;

    let mut prefix = [0u8; 3];
    prefix.copy_from_slice(&iv[13..]);
    let expected = derive_hmac_iv(hmac_secret, prefix, &plaintext);
    if expected[..13] != iv[..13] {
        return Err(IntegrityError);
    }

    Ok(plaintext)
}

fn derive_hmac_iv(hmac_secret: &[u8], prefix: [u8; 3], plaintext: &[u8]) -> [u8; BLOCK] {
    let digest = hmac_sha1!(hmac_secret, &prefix, plaintext);
    let mut iv = [0u8; BLOCK];
    iv[..13].copy_from_slice(&digest[..13]);
    iv[13..].copy_from_slice(&prefix);
    iv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_without_hmac() {
        let key = [7u8; 16];
        let plaintext = b"channel encrypt result, deflate-friendly payload";
        let frame = aes_encrypt(plaintext, &key);
        let decoded = aes_decrypt(&frame, &key).expect("valid frame decrypts");
        assert_eq!(decoded, plaintext);
    }

    #[test]
    fn round_trips_with_hmac_binding() {
        let key = [9u8; 16];
        let secret = b"hmac secret";
        let plaintext = b"multi-message envelope body";
        let frame = aes_encrypt_hmac(plaintext, &key, secret);
        let decoded = aes_decrypt_hmac(&frame, &key, secret).expect("untampered frame decrypts");
        assert_eq!(decoded, plaintext);
    }

    #[test]
    fn rejects_ciphertext_tampered_after_hmac_binding() {
        let key = [9u8; 16];
        let secret = b"hmac secret";
        let mut frame = aes_encrypt_hmac(b"original payload", &key, secret);
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        assert!(aes_decrypt_hmac(&frame, &key, secret).is_err());
    }

    #[test]
    fn rejects_tampered_padding() {
        let key = [1u8; 16];
        let mut frame = aes_encrypt(b"short", &key);
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        assert!(aes_decrypt(&frame, &key).is_err());
    }
}
