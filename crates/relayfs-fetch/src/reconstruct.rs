//! Reconstruction driver: resolve → retrieve → decrypt → reassemble.
//!
//! Scheme selection per chunk: the chunk record's own `encryption` tag
//! wins; a chunk tagged `"none"` (or untagged) falls back to the
//! manifest's scheme. A scheme with a `+base64` suffix marks a
//! binary-sourced chunk (base64-encoded before encryption); a resolved
//! scheme of `"none"` means the content is carried in the clear.

use relayfs_core::{
    FetchConfig, FileEntry, Manifest, RfsError, RfsResult,
};
use relayfs_crypto::{cipher, SecretKey};
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::ChunkCache;
use crate::chunks::{ChunkRequest, ProgressFn};
use crate::relay::RelayPool;
use crate::resolver;

/// Orchestrates one owner's file reconstructions over a relay pool.
/// Holds the process-wide retrieval cache; construct once and share.
pub struct Reconstructor<P: RelayPool> {
    pool: Arc<P>,
    cache: Arc<ChunkCache>,
    config: FetchConfig,
}

impl<P: RelayPool> Reconstructor<P> {
    pub fn new(pool: Arc<P>, config: FetchConfig) -> Self {
        let cache = Arc::new(ChunkCache::new(config.clone()));
        Self::with_cache(pool, cache, config)
    }

    pub fn with_cache(pool: Arc<P>, cache: Arc<ChunkCache>, config: FetchConfig) -> Self {
        Self {
            pool,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<ChunkCache> {
        &self.cache
    }

    /// Find a file's index entry by content hash, walking archive pages
    /// after the current index until the hash is found or pages are
    /// exhausted.
    pub async fn locate_file(
        &self,
        relays: &[String],
        pubkey: &str,
        file_hash: &str,
    ) -> RfsResult<FileEntry> {
        let Some(first) =
            resolver::fetch_index(self.pool.as_ref(), relays, pubkey, 1, &self.config).await?
        else {
            return Err(RfsError::FileNotFound(file_hash.to_string()));
        };

        if let Some(entry) = first.files.iter().find(|f| f.hash == file_hash) {
            return Ok(entry.clone());
        }

        for page in 2..=first.total_archives.saturating_add(1) {
            debug!(page, file_hash, "walking archive page");
            let Some(index) =
                resolver::fetch_index(self.pool.as_ref(), relays, pubkey, page, &self.config)
                    .await?
            else {
                continue;
            };
            if let Some(entry) = index.files.iter().find(|f| f.hash == file_hash) {
                return Ok(entry.clone());
            }
        }

        Err(RfsError::FileNotFound(file_hash.to_string()))
    }

    /// Resolve a file's manifest.
    pub async fn fetch_manifest(
        &self,
        relays: &[String],
        pubkey: &str,
        file_hash: &str,
    ) -> RfsResult<Manifest> {
        resolver::fetch_manifest(self.pool.as_ref(), relays, pubkey, file_hash, &self.config)
            .await?
            .ok_or_else(|| RfsError::ManifestNotFound(file_hash.to_string()))
    }

    /// Reconstruct a file: locate its index entry, fetch its manifest,
    /// retrieve all chunks through the cache, decrypt each in index order,
    /// and concatenate.
    ///
    /// `secret` may be omitted for files published in the clear; any chunk
    /// that resolves to an encrypted scheme then fails with
    /// `DecryptionFailed` rather than silently producing garbage.
    pub async fn reconstruct(
        &self,
        relays: &[String],
        pubkey: &str,
        file_hash: &str,
        secret: Option<&SecretKey>,
        progress: Option<ProgressFn>,
    ) -> RfsResult<Vec<u8>> {
        let entry = self.locate_file(relays, pubkey, file_hash).await?;
        let manifest = self.fetch_manifest(relays, pubkey, file_hash).await?;

        // Union of caller relays and the manifest's hints
        let mut all_relays = relays.to_vec();
        for hint in &manifest.relays {
            if !all_relays.contains(hint) {
                all_relays.push(hint.clone());
            }
        }

        let req = ChunkRequest {
            relays: all_relays,
            pubkey: pubkey.to_string(),
            file_hash: file_hash.to_string(),
            total_chunks: manifest.total_chunks,
            chunk_infos: manifest.chunks.clone(),
        };
        let chunks = self.cache.fetch(&self.pool, req, progress).await?;

        if chunks.len() < manifest.total_chunks {
            return Err(RfsError::IncompleteFile {
                got: chunks.len(),
                expected: manifest.total_chunks,
            });
        }

        let mut out = Vec::with_capacity(entry.size as usize);
        for chunk in &chunks {
            let scheme = resolve_scheme(&chunk.encryption, &manifest.encryption);
            let bytes = match scheme {
                "none" => chunk.content.clone().into_bytes(),
                encrypted => {
                    let secret = secret.ok_or_else(|| {
                        RfsError::DecryptionFailed(format!(
                            "chunk {} uses scheme {encrypted:?} but no secret key was given",
                            chunk.index
                        ))
                    })?;
                    if encrypted.ends_with("+base64") {
                        cipher::decrypt_binary(&chunk.content, secret, pubkey)?
                    } else {
                        cipher::decrypt_text(&chunk.content, secret, pubkey)?
                    }
                }
            };
            out.extend_from_slice(&bytes);
        }

        info!(
            file = %manifest.file_name,
            hash = file_hash,
            chunks = chunks.len(),
            bytes = out.len(),
            "reconstructed"
        );
        Ok(out)
    }
}

/// Chunk tag wins over the manifest scheme; empty and `"none"` defer.
fn resolve_scheme<'a>(chunk_scheme: &'a str, manifest_scheme: &'a str) -> &'a str {
    let effective = match chunk_scheme {
        "" | "none" => manifest_scheme,
        tagged => tagged,
    };
    if effective.is_empty() {
        "none"
    } else {
        effective
    }
}
