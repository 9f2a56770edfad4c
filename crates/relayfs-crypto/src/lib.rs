//! relayfs-crypto: identity codec and self-encryption cipher.
//!
//! Key model:
//! ```text
//! Secret key (X25519 scalar, 32 bytes, zeroized on drop)
//!   ├── Public key: X25519 basepoint mult → 64-char lowercase hex
//!   └── Conversation key: DH(secret, own public) → HKDF-SHA256
//!         └── Payload AEAD: XChaCha20-Poly1305
//! ```
//!
//! Self-encryption: the same identity plays both sides of the exchange, so
//! only the holder of the secret key can recover the conversation key.
//! Human-readable key forms are bech32 (`nsec` secret, `npub` public).

pub mod cipher;
pub mod identity;

pub use cipher::{
    conversation_key, decrypt_binary, decrypt_text, encrypt_binary, encrypt_text,
};
pub use identity::{
    decode_public, decode_secret, derive_public, encode_public, is_hex_public, normalize,
    NormalizedKey, SecretKey,
};

/// Size of a secret or public key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;
