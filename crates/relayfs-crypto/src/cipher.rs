//! Self-encryption payload cipher.
//!
//! Wire format (before base64): `[24-byte nonce][ciphertext][16-byte tag]`.
//! The conversation key is derived once per (secret, public) pair:
//! `HKDF-SHA256(salt = domain constant, ikm = X25519(secret, public))`.
//!
//! Binary chunks are base64-encoded before encryption, so `decrypt_binary`
//! decrypts to a string and then base64-decodes it. Which entry point
//! applies is decided by the manifest's scheme metadata, not inferred here.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use relayfs_core::{RfsError, RfsResult};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::identity::SecretKey;
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

const CONVERSATION_SALT: &[u8] = b"relayfs-conversation-v2";
const CONVERSATION_INFO: &[u8] = b"relayfs-payload";

/// Derive the shared conversation key for a (secret, public) pair.
///
/// Self-encryption passes the owner's own public key here, but the
/// derivation is symmetric and works for any counterparty.
pub fn conversation_key(secret: &SecretKey, pubkey_hex: &str) -> RfsResult<[u8; KEY_SIZE]> {
    let pub_bytes: [u8; KEY_SIZE] = hex::decode(pubkey_hex)
        .ok()
        .and_then(|v| v.try_into().ok())
        .ok_or_else(|| RfsError::DecryptionFailed("public key is not 32 hex bytes".into()))?;

    let scalar = StaticSecret::from(*secret.as_bytes());
    let mut shared = *scalar.diffie_hellman(&PublicKey::from(pub_bytes)).as_bytes();

    let hkdf = Hkdf::<Sha256>::new(Some(CONVERSATION_SALT), &shared);
    let mut okm = [0u8; KEY_SIZE];
    let expanded = hkdf.expand(CONVERSATION_INFO, &mut okm);
    shared.zeroize();
    expanded.map_err(|e| RfsError::DecryptionFailed(format!("HKDF expand failed: {e}")))?;
    Ok(okm)
}

/// Decrypt a ciphertext whose original payload was text. Returns the UTF-8
/// bytes of the decrypted payload.
pub fn decrypt_text(ciphertext: &str, secret: &SecretKey, pubkey_hex: &str) -> RfsResult<Vec<u8>> {
    let key = conversation_key(secret, pubkey_hex)?;
    decrypt(ciphertext, &key)
}

/// Decrypt a ciphertext whose original payload was binary: decrypt to a
/// string, then base64-decode that string.
pub fn decrypt_binary(
    ciphertext: &str,
    secret: &SecretKey,
    pubkey_hex: &str,
) -> RfsResult<Vec<u8>> {
    let text = decrypt_text(ciphertext, secret, pubkey_hex)?;
    let text = std::str::from_utf8(&text)
        .map_err(|e| RfsError::DecryptionFailed(format!("payload is not UTF-8: {e}")))?;
    BASE64
        .decode(text.trim())
        .map_err(|e| RfsError::DecryptionFailed(format!("payload is not base64: {e}")))
}

/// Decrypt with an already-derived conversation key.
pub fn decrypt(ciphertext: &str, key: &[u8; KEY_SIZE]) -> RfsResult<Vec<u8>> {
    let blob = BASE64
        .decode(ciphertext.trim())
        .map_err(|e| RfsError::DecryptionFailed(format!("ciphertext is not base64: {e}")))?;

    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return Err(RfsError::DecryptionFailed(format!(
            "ciphertext too short: {} bytes",
            blob.len()
        )));
    }

    let (nonce_bytes, body) = blob.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(key.into());

    cipher.decrypt(nonce, body).map_err(|_| {
        RfsError::DecryptionFailed("invalid key or corrupted ciphertext".into())
    })
}

/// Encrypt a text payload (inverse of [`decrypt_text`]).
pub fn encrypt_text(plaintext: &[u8], secret: &SecretKey, pubkey_hex: &str) -> RfsResult<String> {
    let key = conversation_key(secret, pubkey_hex)?;
    let cipher = XChaCha20Poly1305::new((&key).into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let body = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| RfsError::DecryptionFailed(format!("encryption failed: {e}")))?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + body.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&body);
    Ok(BASE64.encode(blob))
}

/// Encrypt a binary payload: base64-encode first, then encrypt as text
/// (inverse of [`decrypt_binary`]).
pub fn encrypt_binary(plaintext: &[u8], secret: &SecretKey, pubkey_hex: &str) -> RfsResult<String> {
    let encoded = BASE64.encode(plaintext);
    encrypt_text(encoded.as_bytes(), secret, pubkey_hex)
}
