//! Process-wide retrieval cache with request coalescing.
//!
//! One entry per (owner, file hash) key, created on first request and kept
//! for the life of the process. The entry's chunk map is the single source
//! of truth: every retrieval merges into it, so a retry reuses
//! already-collected chunks instead of re-fetching them.
//!
//! Coalescing invariant: at most one network retrieval per key is active
//! at any time. Concurrent callers either read a satisfied entry, await
//! the published in-flight handle, or start fresh work after a previous
//! operation settled short (e.g. a relay outage). The in-flight handle is
//! cleared when the operation settles, success or failure.

use futures::future::{BoxFuture, FutureExt, Shared};
use relayfs_core::{ChunkEvent, FetchConfig, RfsResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::chunks::{self, ChunkMap, ChunkRequest, ProgressFn};
use crate::relay::RelayPool;

type InflightHandle = Shared<BoxFuture<'static, ()>>;

#[derive(Default)]
struct CacheEntry {
    chunks: ChunkMap,
    inflight: Option<InflightHandle>,
}

/// The retrieval cache. Construct once per process or session and share;
/// tests instantiate a fresh one per case.
pub struct ChunkCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    config: FetchConfig,
}

enum Action {
    Done(Vec<ChunkEvent>),
    Wait(InflightHandle),
    Run(InflightHandle, ChunkMap),
}

impl ChunkCache {
    pub fn new(config: FetchConfig) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    fn key(pubkey: &str, file_hash: &str) -> String {
        format!("{pubkey}:{file_hash}")
    }

    /// Chunks currently held for a key, ascending by index.
    pub fn cached(&self, pubkey: &str, file_hash: &str) -> Vec<ChunkEvent> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(&Self::key(pubkey, file_hash))
            .map(|e| e.chunks.lock().unwrap().values().cloned().collect())
            .unwrap_or_default()
    }

    /// Fetch a file's chunks, coalescing with any concurrent request for
    /// the same key. Returns whatever is held once the retrieval settles,
    /// sorted by index; the caller checks the count against the expected
    /// total.
    pub async fn fetch<P: RelayPool>(
        &self,
        pool: &Arc<P>,
        req: ChunkRequest,
        progress: Option<ProgressFn>,
    ) -> RfsResult<Vec<ChunkEvent>> {
        let key = Self::key(&req.pubkey, &req.file_hash);
        let mut progress = progress;
        let mut awaited: Option<InflightHandle> = None;

        loop {
            let action = {
                let mut entries = self.entries.lock().unwrap();
                let entry = entries.entry(key.clone()).or_default();

                if entry.chunks.lock().unwrap().len() >= req.total_chunks {
                    Action::Done(entry.chunks.lock().unwrap().values().cloned().collect())
                } else {
                    match &entry.inflight {
                        // someone else's operation we have not waited on yet
                        Some(handle)
                            if !awaited
                                .as_ref()
                                .is_some_and(|prev| Shared::ptr_eq(prev, handle)) =>
                        {
                            Action::Wait(handle.clone())
                        }
                        // no operation, or only the stale one we already
                        // waited out: publish fresh work under the lock
                        _ => {
                            let (handle, map) = self.start_retrieval(
                                entry,
                                &key,
                                pool,
                                req.clone(),
                                progress.take(),
                            );
                            Action::Run(handle, map)
                        }
                    }
                }
            };

            match action {
                Action::Done(snapshot) => {
                    debug!(key = %key, chunks = snapshot.len(), "cache satisfied");
                    return Ok(snapshot);
                }
                Action::Wait(handle) => {
                    debug!(key = %key, "coalescing onto in-flight retrieval");
                    handle.clone().await;
                    awaited = Some(handle);
                }
                Action::Run(handle, map) => {
                    handle.await;
                    return Ok(chunks::sorted_chunks(&map));
                }
            }
        }
    }

    /// Spawn the retrieval task and publish its handle on the entry.
    /// Caller holds the registry lock, so the publish is atomic with the
    /// in-flight check.
    fn start_retrieval<P: RelayPool>(
        &self,
        entry: &mut CacheEntry,
        key: &str,
        pool: &Arc<P>,
        req: ChunkRequest,
        progress: Option<ProgressFn>,
    ) -> (InflightHandle, ChunkMap) {
        let (tx, rx) = oneshot::channel::<()>();
        let handle: InflightHandle = rx.map(|_| ()).boxed().shared();
        entry.inflight = Some(handle.clone());

        let map = entry.chunks.clone();
        let task_map = map.clone();
        let entries = Arc::clone(&self.entries);
        let pool = Arc::clone(pool);
        let config = self.config.clone();
        let task_key = key.to_string();
        let task_handle = handle.clone();

        tokio::spawn(async move {
            if let Err(e) =
                chunks::fetch_chunks(pool.as_ref(), &req, &task_map, &config, progress.as_ref())
                    .await
            {
                warn!(key = %task_key, "chunk retrieval failed: {e}");
            }
            // Clear the handle unconditionally once settled, but only if it
            // is still ours; a later operation may have replaced it.
            {
                let mut entries = entries.lock().unwrap();
                if let Some(entry) = entries.get_mut(&task_key) {
                    if entry
                        .inflight
                        .as_ref()
                        .is_some_and(|h| Shared::ptr_eq(h, &task_handle))
                    {
                        entry.inflight = None;
                    }
                }
            }
            let _ = tx.send(());
        });

        (handle, map)
    }
}
