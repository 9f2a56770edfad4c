use thiserror::Error;

pub type RfsResult<T> = Result<T, RfsError>;

/// Error taxonomy for the retrieval engine.
///
/// Malformed JSON inside an otherwise valid record is deliberately absent:
/// the resolver absorbs parse failures locally (logged, treated as "no data
/// at this tag") because another relay or tag convention may still succeed.
/// Version and decryption errors are never absorbed.
#[derive(Debug, Error)]
pub enum RfsError {
    /// A specific key decode was asked for and the input's discriminator
    /// did not match (e.g. an npub passed where an nsec was expected).
    #[error("invalid {expected} form: {detail}")]
    InvalidFormat {
        expected: &'static str,
        detail: String,
    },

    /// No accepted key representation matched the input.
    #[error("unrecognized key format (expected npub, nsec, or 64-char hex)")]
    InvalidKeyFormat,

    /// Schema version mismatch on a well-formed record. Fatal: the engine
    /// has no cross-version compatibility logic.
    #[error("unsupported {record} version {found} (only version {expected} is supported)")]
    UnsupportedVersion {
        record: &'static str,
        found: u32,
        expected: u32,
    },

    #[error("file {0} not found in any index page")]
    FileNotFound(String),

    #[error("no manifest found for file {0}")]
    ManifestNotFound(String),

    #[error("incomplete file: retrieved {got} of {expected} chunks")]
    IncompleteFile { got: usize, expected: usize },

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Transport-level failure surfaced by a relay pool implementation
    /// (connection refused, protocol error). The in-memory pool never
    /// fails this way; real pools map their transport errors here.
    #[error("relay error: {0}")]
    Relay(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
