//! Authenticated encryption for secrets at rest
//!
//! AES-256-GCM with a fresh 96-bit random nonce per call. The output is
//! base64(nonce || ciphertext || tag) so it can sit inside a text record.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ring::aead;
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

pub const KEY_LEN: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid encryption key")]
    KeyError,
    #[error("Random number generation failed")]
    RandomError,
    #[error("Encryption failed")]
    SealError,
    #[error("Ciphertext is not valid base64")]
    EncodingError,
    #[error("Ciphertext is too short")]
    Truncated,
    #[error("Decryption failed: wrong key or tampered ciphertext")]
    OpenError,
    #[error("Decrypted data is not valid UTF-8")]
    Utf8Error,
}

fn sealing_key(key: &[u8; KEY_LEN]) -> Result<aead::LessSafeKey, CryptoError> {
    let unbound =
        aead::UnboundKey::new(&aead::AES_256_GCM, key).map_err(|_| CryptoError::KeyError)?;
    Ok(aead::LessSafeKey::new(unbound))
}

pub fn encrypt(plaintext: &str, key: &[u8; KEY_LEN]) -> Result<String, CryptoError> {
    let key = sealing_key(key)?;

    let mut nonce_bytes = [0u8; aead::NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| CryptoError::RandomError)?;
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.as_bytes().to_vec();
    key.seal_in_place_append_tag(nonce, aead::Aad::empty(), &mut in_out)
        .map_err(|_| CryptoError::SealError)?;

    let mut blob = nonce_bytes.to_vec();
    blob.extend_from_slice(&in_out);
    Ok(BASE64.encode(blob))
}

pub fn decrypt(ciphertext: &str, key: &[u8; KEY_LEN]) -> Result<String, CryptoError> {
    let blob = BASE64
        .decode(ciphertext.trim())
        .map_err(|_| CryptoError::EncodingError)?;
    if blob.len() < aead::NONCE_LEN + aead::AES_256_GCM.tag_len() {
        return Err(CryptoError::Truncated);
    }

    let key = sealing_key(key)?;
    let (nonce_bytes, sealed) = blob.split_at(aead::NONCE_LEN);
    let nonce =
        aead::Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| CryptoError::Truncated)?;

    let mut in_out = sealed.to_vec();
    let plaintext = key
        .open_in_place(nonce, aead::Aad::empty(), &mut in_out)
        .map_err(|_| CryptoError::OpenError)?;

    String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::Utf8Error)
}

/// Fresh random key for the on-disk vault
pub fn generate_key() -> Result<[u8; KEY_LEN], CryptoError> {
    let mut key = [0u8; KEY_LEN];
    SystemRandom::new()
        .fill(&mut key)
        .map_err(|_| CryptoError::RandomError)?;
    Ok(key)
}
