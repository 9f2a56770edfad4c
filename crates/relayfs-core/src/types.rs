use serde::{Deserialize, Serialize};

/// An immutable, authored, timestamped, tagged message as served by a relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayRecord {
    /// Record identifier (opaque, unique per record)
    pub id: String,
    /// Hex public key of the author
    pub pubkey: String,
    /// Creation timestamp (Unix seconds); last-writer-wins tie-break key
    pub created_at: u64,
    /// Record kind
    pub kind: u32,
    /// Tags: each tag is `[name, value, ...]`
    pub tags: Vec<Vec<String>>,
    /// Payload: JSON for index/manifest records, ciphertext for chunks
    pub content: String,
}

impl RelayRecord {
    /// First value of the named tag, if present.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }
}

/// Query filter consumed by the relay pool.
///
/// Empty vectors mean "no constraint on that dimension". Tag filters map to
/// the `#d` / `#x` relay filter syntax.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub kinds: Vec<u32>,
    pub authors: Vec<String>,
    pub ids: Vec<String>,
    pub d_tags: Vec<String>,
    pub x_tags: Vec<String>,
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: u32) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn author(mut self, pubkey: impl Into<String>) -> Self {
        self.authors.push(pubkey.into());
        self
    }

    pub fn ids(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.ids.extend(ids);
        self
    }

    pub fn d_tag(mut self, tag: impl Into<String>) -> Self {
        self.d_tags.push(tag.into());
        self
    }

    pub fn x_tag(mut self, tag: impl Into<String>) -> Self {
        self.x_tags.push(tag.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a record matches this filter. Shared by in-memory pools so
    /// tests and production agree on one matching rule.
    pub fn matches(&self, record: &RelayRecord) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&record.kind) {
            return false;
        }
        if !self.authors.is_empty() && !self.authors.iter().any(|a| *a == record.pubkey) {
            return false;
        }
        if !self.ids.is_empty() && !self.ids.iter().any(|i| *i == record.id) {
            return false;
        }
        if !self.d_tags.is_empty() {
            match record.tag_value("d") {
                Some(d) if self.d_tags.iter().any(|t| t == d) => {}
                _ => return false,
            }
        }
        if !self.x_tags.is_empty() {
            match record.tag_value("x") {
                Some(x) if self.x_tags.iter().any(|t| t == x) => {}
                _ => return false,
            }
        }
        true
    }
}

/// One file known to an index page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Content hash of the original file
    pub hash: String,
    pub name: String,
    pub size: u64,
    /// Number of chunk records the file was split into
    pub chunks: usize,
}

/// The paged file index. Page 1 is the mutable current index; pages > 1
/// are immutable archive snapshots. Fetched read-only, never mutated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileIndex {
    pub version: u32,
    /// Completed archive pages beyond this one
    #[serde(default)]
    pub total_archives: u32,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

/// Maps a chunk's logical index to the record that carries it, when known.
/// A missing entry for some index is tolerated; the fallback query covers it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub index: u64,
    pub event_id: String,
}

/// Per-file chunk directory, fetched once per reconstruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub file_name: String,
    pub file_hash: String,
    pub total_chunks: usize,
    /// Encryption scheme identifier applied to chunks without their own tag
    #[serde(default)]
    pub encryption: String,
    /// Relay hints: addresses the publisher expects to hold the chunks
    #[serde(default)]
    pub relays: Vec<String>,
    #[serde(default)]
    pub chunks: Vec<ChunkInfo>,
}

/// One retrieved, not-yet-decrypted chunk. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkEvent {
    pub index: u64,
    /// Ciphertext as carried on the wire
    pub content: String,
    /// Scheme tag from the record (`"none"` when absent)
    pub encryption: String,
}
