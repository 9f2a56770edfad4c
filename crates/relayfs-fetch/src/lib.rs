//! relayfs-fetch: the retrieval and reconstruction engine.
//!
//! Layering, leaves first:
//!
//! - [`relay`] — the pool boundary: one-shot queries and cancellable
//!   streaming subscriptions against a set of independent relays.
//! - [`resolver`] — index and manifest resolution with page-based archive
//!   addressing (page N > 1 depends on page 1).
//! - [`chunks`] — two-phase chunk retrieval: direct-by-id batches, then a
//!   content-hash-tag fallback, with dedup and early stop.
//! - [`cache`] — process-wide (owner, file hash) cache that coalesces
//!   concurrent retrievals into one in-flight operation.
//! - [`reconstruct`] — the driver: resolve → retrieve → decrypt → reassemble.

pub mod cache;
pub mod chunks;
pub mod reconstruct;
pub mod relay;
pub mod resolver;

pub use cache::ChunkCache;
pub use chunks::{ChunkRequest, FetchStats, ProgressFn};
pub use reconstruct::Reconstructor;
pub use relay::{MemoryPool, RelayPool, SubMessage, Subscription};
