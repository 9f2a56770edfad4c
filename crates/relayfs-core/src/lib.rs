//! relayfs-core: shared vocabulary for the relayfs retrieval engine.
//!
//! A file published to the relay network is represented by three record
//! kinds, all authored by the file's owner:
//!
//! | Kind  | Constant              | Purpose                   | Addressing    |
//! |-------|-----------------------|---------------------------|---------------|
//! | 30081 | `KIND_FILE_INDEX`     | File listing (paged)      | `d` tag       |
//! | 30082 | `KIND_FILE_MANIFEST`  | Per-file chunk directory  | `x` / `d` tag |
//! | 30083 | `KIND_FILE_CHUNK`     | One encrypted segment     | `d` + `x` tag |

pub mod config;
pub mod error;
pub mod types;

pub use config::FetchConfig;
pub use error::{RfsError, RfsResult};
pub use types::{ChunkEvent, ChunkInfo, FileEntry, FileIndex, Filter, Manifest, RelayRecord};

/// Record kind for the paged file index.
pub const KIND_FILE_INDEX: u32 = 30081;

/// Record kind for per-file manifests.
pub const KIND_FILE_MANIFEST: u32 = 30082;

/// Record kind for encrypted chunk records.
pub const KIND_FILE_CHUNK: u32 = 30083;

/// Schema version accepted for index and manifest payloads.
pub const SCHEMA_VERSION: u32 = 2;

/// Addressing tag of the mutable current index (logical page 1).
pub const TAG_INDEX_CURRENT: &str = "relayfs-index";

/// Addressing tag prefix for immutable archive index pages.
pub const TAG_INDEX_ARCHIVE_PREFIX: &str = "relayfs-index-archive-";

/// Addressing tag prefix for the manifest fallback convention.
pub const TAG_FILE_PREFIX: &str = "file:";

/// Addressing tag prefix for chunk records: `chunk:{file_hash}:{index}`.
pub const TAG_CHUNK_PREFIX: &str = "chunk:";

/// Compute the archive tag number for a logical index page.
///
/// Page 1 is the current index and has no archive number. For page N > 1
/// the archive suffix is `total_archives + 2 - N`: the most recently
/// completed archive carries the highest number, so page 2 reads the
/// newest archive and page `total_archives + 1` reads the oldest.
pub fn archive_tag_number(total_archives: u32, page: u32) -> Option<u32> {
    if page <= 1 {
        return None;
    }
    // widened: `total_archives` comes from an untrusted index payload and
    // may sit near u32::MAX, where `+ 2` would wrap
    (u64::from(total_archives) + 2)
        .checked_sub(u64::from(page))
        .filter(|n| *n >= 1)
        .map(|n| n as u32)
}

/// Build the addressing tag for a logical index page.
pub fn index_tag(total_archives: u32, page: u32) -> Option<String> {
    if page == 1 {
        return Some(TAG_INDEX_CURRENT.to_string());
    }
    archive_tag_number(total_archives, page).map(|n| format!("{TAG_INDEX_ARCHIVE_PREFIX}{n}"))
}
