//! Key representations: bech32 `nsec`/`npub` forms and raw hex public keys.
//!
//! Secrets only ever live in [`SecretKey`] buffers (zeroized on drop);
//! strings are not zeroable and must never hold secret material.

use bech32::{Bech32, Hrp};
use relayfs_core::{RfsError, RfsResult};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::KEY_SIZE;

const SECRET_HRP: &str = "nsec";
const PUBLIC_HRP: &str = "npub";

/// A 256-bit secret key. Zeroized on drop; callers holding one longer than
/// a single operation should call [`SecretKey::wipe`] as soon as the key is
/// no longer needed.
#[derive(Clone)]
pub struct SecretKey {
    bytes: [u8; KEY_SIZE],
}

impl SecretKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Explicit zero-fill, for callers that keep the value alive past its
    /// last use (drop covers the common case).
    pub fn wipe(&mut self) {
        self.bytes.zeroize();
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Result of [`normalize`]: always a hex public key, plus the secret when
/// the input was a secret form.
#[derive(Debug)]
pub struct NormalizedKey {
    /// Lowercase 64-char hex public key
    pub pubkey: String,
    pub secret: Option<SecretKey>,
}

/// Decode a bech32 `nsec` form into raw secret bytes.
pub fn decode_secret(form: &str) -> RfsResult<SecretKey> {
    let bytes = decode_tagged(form, SECRET_HRP)?;
    Ok(SecretKey::from_bytes(bytes))
}

/// Decode a bech32 `npub` form into a lowercase hex public key.
pub fn decode_public(form: &str) -> RfsResult<String> {
    let bytes = decode_tagged(form, PUBLIC_HRP)?;
    Ok(hex::encode(bytes))
}

fn decode_tagged(form: &str, expected_hrp: &str) -> RfsResult<[u8; KEY_SIZE]> {
    let expected = if expected_hrp == SECRET_HRP {
        "secret"
    } else {
        "public"
    };
    let (hrp, mut data) = bech32::decode(form).map_err(|e| RfsError::InvalidFormat {
        expected,
        detail: e.to_string(),
    })?;
    if hrp.as_str() != expected_hrp {
        let detail = format!("discriminator is {:?}", hrp.as_str());
        data.zeroize();
        return Err(RfsError::InvalidFormat { expected, detail });
    }
    if data.len() != KEY_SIZE {
        let detail = format!("{} data bytes", data.len());
        data.zeroize();
        return Err(RfsError::InvalidFormat { expected, detail });
    }
    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&data);
    data.zeroize();
    Ok(bytes)
}

/// Derive the hex public key for a secret key (X25519 basepoint mult).
pub fn derive_public(secret: &SecretKey) -> String {
    let scalar = StaticSecret::from(*secret.as_bytes());
    hex::encode(PublicKey::from(&scalar).as_bytes())
}

/// Encode a hex public key into its bech32 `npub` form.
pub fn encode_public(pubkey_hex: &str) -> RfsResult<String> {
    if !is_hex_public(pubkey_hex) {
        return Err(RfsError::InvalidFormat {
            expected: "public",
            detail: "not a 64-char hex key".into(),
        });
    }
    let bytes = hex::decode(pubkey_hex).expect("validated hex");
    let hrp = Hrp::parse(PUBLIC_HRP).expect("static hrp");
    bech32::encode::<Bech32>(hrp, &bytes).map_err(|e| RfsError::InvalidFormat {
        expected: "public",
        detail: e.to_string(),
    })
}

/// True iff the input is exactly 64 hex characters (either case).
pub fn is_hex_public(input: &str) -> bool {
    input.len() == 64 && input.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Accept any of the three key representations, in order: `npub` form,
/// `nsec` form, raw hex public key.
///
/// A secret-form input yields both the derived public key and the raw
/// secret; the caller owns the secret's lifetime and should wipe it after
/// use. Hex input is lowercase-normalized.
pub fn normalize(input: &str) -> RfsResult<NormalizedKey> {
    let input = input.trim();

    if let Ok(pubkey) = decode_public(input) {
        return Ok(NormalizedKey {
            pubkey,
            secret: None,
        });
    }

    if let Ok(secret) = decode_secret(input) {
        let pubkey = derive_public(&secret);
        return Ok(NormalizedKey {
            pubkey,
            secret: Some(secret),
        });
    }

    if is_hex_public(input) {
        return Ok(NormalizedKey {
            pubkey: input.to_ascii_lowercase(),
            secret: None,
        });
    }

    Err(RfsError::InvalidKeyFormat)
}
