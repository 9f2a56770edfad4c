//! Two-phase chunk retrieval.
//!
//! Direct phase: known record identifiers from the manifest are queried in
//! fixed-size batches. Fallback phase: anything still missing is swept up
//! by a content-hash-tag subscription, which also catches chunks whose
//! identifier was unknown or whose record predates manifest generation.
//!
//! Every subscription is bounded: it stops early once `total_chunks`
//! distinct indices are held, when every relay has signaled
//! end-of-stored-data, or when the per-batch timeout expires. The engine
//! never blocks forever on chunks no relay holds; completeness is the
//! caller's check.

use relayfs_core::{ChunkEvent, ChunkInfo, FetchConfig, Filter, RelayRecord, RfsResult, KIND_FILE_CHUNK};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::relay::{RelayPool, SubMessage, Subscription};

/// Shared index → chunk map. All concurrent callers for one (owner, file)
/// key merge into the same map; it grows monotonically and never shrinks.
pub type ChunkMap = Arc<Mutex<BTreeMap<u64, ChunkEvent>>>;

/// Progress callback: (distinct chunks so far, total expected).
pub type ProgressFn = Box<dyn Fn(usize, usize) + Send + Sync>;

/// Everything needed to retrieve one file's chunks.
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub relays: Vec<String>,
    /// Owner's hex public key
    pub pubkey: String,
    pub file_hash: String,
    /// Expected distinct chunk count, from the manifest
    pub total_chunks: usize,
    /// Index → record identifier hints from the manifest; may be empty or
    /// partial, the fallback phase covers the rest
    pub chunk_infos: Vec<ChunkInfo>,
}

/// Outcome of one retrieval pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchStats {
    /// Distinct chunk indices held after the pass (including pre-existing
    /// cached chunks)
    pub collected: usize,
    /// Records discarded because no strategy produced a chunk index
    pub unplaceable: usize,
}

/// Retrieve chunks for `req` into `map`.
///
/// `map` may already hold chunks from an earlier pass; they count toward
/// completion and are never re-fetched.
pub async fn fetch_chunks<P: RelayPool>(
    pool: &P,
    req: &ChunkRequest,
    map: &ChunkMap,
    config: &FetchConfig,
    progress: Option<&ProgressFn>,
) -> RfsResult<FetchStats> {
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut unplaceable = 0usize;

    if held(map) >= req.total_chunks {
        return Ok(FetchStats {
            collected: held(map),
            unplaceable: 0,
        });
    }

    // Direct phase: batches of known record identifiers.
    let ids = known_ids(&req.chunk_infos);
    for batch in ids.chunks(config.id_batch_size.max(1)) {
        if held(map) >= req.total_chunks {
            break;
        }
        debug!(batch = batch.len(), file = %req.file_hash, "direct chunk batch");
        let filter = Filter::new()
            .kind(KIND_FILE_CHUNK)
            .author(req.pubkey.clone())
            .ids(batch.to_vec());
        let sub = pool.subscribe(&req.relays, filter).await?;
        drain(
            sub,
            map,
            &mut seen_ids,
            &mut unplaceable,
            req.total_chunks,
            config,
            progress,
        )
        .await;
    }

    // Fallback phase: sweep by content-hash tag.
    if held(map) < req.total_chunks {
        debug!(
            held = held(map),
            total = req.total_chunks,
            file = %req.file_hash,
            "direct phase short, falling back to content-hash tag"
        );
        let filter = Filter::new()
            .kind(KIND_FILE_CHUNK)
            .author(req.pubkey.clone())
            .x_tag(req.file_hash.clone());
        let sub = pool.subscribe(&req.relays, filter).await?;
        drain(
            sub,
            map,
            &mut seen_ids,
            &mut unplaceable,
            req.total_chunks,
            config,
            progress,
        )
        .await;
    }

    let collected = held(map);
    if unplaceable > 0 {
        warn!(
            unplaceable,
            file = %req.file_hash,
            "discarded records carrying no usable chunk index"
        );
    }
    Ok(FetchStats {
        collected,
        unplaceable,
    })
}

/// Snapshot of the map in ascending index order.
pub fn sorted_chunks(map: &ChunkMap) -> Vec<ChunkEvent> {
    map.lock().unwrap().values().cloned().collect()
}

fn held(map: &ChunkMap) -> usize {
    map.lock().unwrap().len()
}

/// Deduplicated record identifiers from the manifest hints, in order.
fn known_ids(infos: &[ChunkInfo]) -> Vec<String> {
    let mut seen = HashSet::new();
    infos
        .iter()
        .filter(|i| seen.insert(i.event_id.as_str()))
        .map(|i| i.event_id.clone())
        .collect()
}

/// Consume one subscription until complete, all relays done, or timeout.
async fn drain(
    mut sub: Subscription,
    map: &ChunkMap,
    seen_ids: &mut HashSet<String>,
    unplaceable: &mut usize,
    total: usize,
    config: &FetchConfig,
    progress: Option<&ProgressFn>,
) {
    let deadline = tokio::time::Instant::now() + config.batch_timeout;
    let mut done_relays: HashSet<String> = HashSet::new();

    loop {
        if held(map) >= total {
            sub.close();
            return;
        }
        match tokio::time::timeout_at(deadline, sub.recv()).await {
            Err(_) => {
                warn!("chunk subscription hit its wait bound, moving on");
                sub.close();
                return;
            }
            Ok(None) => return,
            Ok(Some(SubMessage::Event(record))) => {
                place(record, map, seen_ids, unplaceable, total, progress);
            }
            Ok(Some(SubMessage::EndOfStored { relay })) => {
                done_relays.insert(relay);
                if done_relays.len() >= sub.relay_count() {
                    sub.close();
                    return;
                }
            }
        }
    }
}

/// Insert one incoming record into the shared map.
///
/// Dedup is two-level: by record identifier (same record from several
/// relays), then first-writer-wins per chunk index (distinct records
/// claiming the same index).
fn place(
    record: RelayRecord,
    map: &ChunkMap,
    seen_ids: &mut HashSet<String>,
    unplaceable: &mut usize,
    total: usize,
    progress: Option<&ProgressFn>,
) {
    if !seen_ids.insert(record.id.clone()) {
        return;
    }

    let Some(index) = chunk_index(&record) else {
        *unplaceable += 1;
        debug!(id = %record.id, "record has no usable chunk index, discarding");
        return;
    };

    let encryption = record
        .tag_value("encryption")
        .unwrap_or("none")
        .to_string();

    let count = {
        let mut guard = map.lock().unwrap();
        if let std::collections::btree_map::Entry::Vacant(slot) = guard.entry(index) {
            slot.insert(ChunkEvent {
                index,
                content: record.content,
                encryption,
            });
            Some(guard.len())
        } else {
            None
        }
    };

    if let (Some(count), Some(cb)) = (count, progress) {
        cb(count, total);
    }
}

/// Ordered extraction strategies for a chunk's logical index: the explicit
/// `chunk` tag, then the trailing colon-delimited segment of the
/// addressing tag. First success wins; no success means the record cannot
/// be placed.
fn chunk_index(record: &RelayRecord) -> Option<u64> {
    explicit_index_tag(record).or_else(|| addressing_tag_suffix(record))
}

fn explicit_index_tag(record: &RelayRecord) -> Option<u64> {
    record.tag_value("chunk")?.parse().ok()
}

fn addressing_tag_suffix(record: &RelayRecord) -> Option<u64> {
    record.tag_value("d")?.rsplit(':').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::MemoryPool;
    use std::time::Duration;

    const PK: &str = "owner-pubkey";
    const HASH: &str = "filehash";

    fn fast_config() -> FetchConfig {
        FetchConfig {
            batch_timeout: Duration::from_millis(200),
            ..FetchConfig::default()
        }
    }

    fn chunk_record(id: &str, index: u64, content: &str) -> RelayRecord {
        RelayRecord {
            id: id.into(),
            pubkey: PK.into(),
            created_at: 1,
            kind: KIND_FILE_CHUNK,
            tags: vec![
                vec!["d".into(), format!("chunk:{HASH}:{index}")],
                vec!["x".into(), HASH.into()],
                vec!["chunk".into(), index.to_string()],
                vec!["encryption".into(), "xchacha".into()],
            ],
            content: content.into(),
        }
    }

    fn request(total: usize, infos: Vec<ChunkInfo>) -> ChunkRequest {
        ChunkRequest {
            relays: vec!["r1".to_string(), "r2".to_string()],
            pubkey: PK.into(),
            file_hash: HASH.into(),
            total_chunks: total,
            chunk_infos: infos,
        }
    }

    fn info(index: u64, id: &str) -> ChunkInfo {
        ChunkInfo {
            index,
            event_id: id.into(),
        }
    }

    fn fresh_map() -> ChunkMap {
        ChunkMap::default()
    }

    #[tokio::test]
    async fn direct_phase_collects_out_of_order_with_duplicate() {
        let pool = MemoryPool::new();
        // out of order, and index 1 duplicated across relays
        pool.publish("r1", chunk_record("e2", 2, "c2"));
        pool.publish("r1", chunk_record("e1", 1, "c1"));
        pool.publish("r2", chunk_record("e1", 1, "c1"));
        pool.publish("r2", chunk_record("e0", 0, "c0"));

        let map = fresh_map();
        let req = request(3, vec![info(0, "e0"), info(1, "e1"), info(2, "e2")]);
        let stats = fetch_chunks(&pool, &req, &map, &fast_config(), None)
            .await
            .unwrap();

        assert_eq!(stats.collected, 3);
        let chunks = sorted_chunks(&map);
        assert_eq!(
            chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(pool.subscribe_calls(), 1, "one batch, no fallback");
    }

    #[tokio::test]
    async fn empty_chunk_infos_succeed_via_fallback_alone() {
        let pool = MemoryPool::new();
        pool.publish("r1", chunk_record("e0", 0, "c0"));
        pool.publish("r2", chunk_record("e1", 1, "c1"));

        let map = fresh_map();
        let stats = fetch_chunks(&pool, &request(2, vec![]), &map, &fast_config(), None)
            .await
            .unwrap();

        assert_eq!(stats.collected, 2);
        assert_eq!(pool.subscribe_calls(), 1, "no direct batches to issue");
    }

    #[tokio::test]
    async fn fallback_covers_chunks_missing_from_infos() {
        let pool = MemoryPool::new();
        pool.publish("r1", chunk_record("e0", 0, "c0"));
        pool.publish("r1", chunk_record("e1", 1, "c1"));

        let map = fresh_map();
        // only chunk 0 has a known identifier
        let req = request(2, vec![info(0, "e0")]);
        let stats = fetch_chunks(&pool, &req, &map, &fast_config(), None)
            .await
            .unwrap();

        assert_eq!(stats.collected, 2);
        assert_eq!(pool.subscribe_calls(), 2, "direct batch plus fallback");
    }

    #[tokio::test]
    async fn explicit_index_tag_beats_addressing_suffix() {
        let record = RelayRecord {
            id: "e".into(),
            pubkey: PK.into(),
            created_at: 1,
            kind: KIND_FILE_CHUNK,
            tags: vec![
                vec!["d".into(), format!("chunk:{HASH}:9")],
                vec!["chunk".into(), "4".into()],
            ],
            content: String::new(),
        };
        assert_eq!(chunk_index(&record), Some(4));
    }

    #[tokio::test]
    async fn addressing_suffix_used_when_index_tag_absent() {
        let record = RelayRecord {
            id: "e".into(),
            pubkey: PK.into(),
            created_at: 1,
            kind: KIND_FILE_CHUNK,
            tags: vec![vec!["d".into(), format!("chunk:{HASH}:7")]],
            content: String::new(),
        };
        assert_eq!(chunk_index(&record), Some(7));
    }

    #[tokio::test]
    async fn unplaceable_records_are_counted_not_inserted() {
        let pool = MemoryPool::new();
        let mut bad = chunk_record("ebad", 0, "junk");
        bad.tags = vec![
            vec!["d".into(), "no-trailing-integer".into()],
            vec!["x".into(), HASH.into()],
        ];
        pool.publish("r1", bad);
        pool.publish("r1", chunk_record("e0", 0, "c0"));

        let map = fresh_map();
        let stats = fetch_chunks(&pool, &request(1, vec![]), &map, &fast_config(), None)
            .await
            .unwrap();

        assert_eq!(stats.collected, 1);
        assert_eq!(stats.unplaceable, 1);
        assert_eq!(sorted_chunks(&map)[0].content, "c0");
    }

    #[tokio::test]
    async fn first_writer_wins_per_index() {
        let pool = MemoryPool::new();
        // two distinct records claim index 0
        pool.publish("r1", chunk_record("first", 0, "kept"));
        pool.publish("r1", chunk_record("second", 0, "ignored"));
        pool.publish("r1", chunk_record("e1", 1, "c1"));

        let map = fresh_map();
        let stats = fetch_chunks(&pool, &request(2, vec![]), &map, &fast_config(), None)
            .await
            .unwrap();

        assert_eq!(stats.collected, 2);
        assert_eq!(sorted_chunks(&map)[0].content, "kept");
    }

    #[tokio::test]
    async fn silent_relay_times_out_instead_of_hanging() {
        let pool = MemoryPool::new();
        pool.mark_silent("r1");
        pool.mark_silent("r2");
        pool.publish("r1", chunk_record("e0", 0, "c0"));

        let map = fresh_map();
        let cfg = FetchConfig {
            batch_timeout: Duration::from_millis(50),
            ..FetchConfig::default()
        };
        // asks for 2 chunks but only 1 exists and no relay ever signals
        let stats = fetch_chunks(&pool, &request(2, vec![]), &map, &cfg, None)
            .await
            .unwrap();

        assert_eq!(stats.collected, 1, "returns what was collected");
    }

    #[tokio::test]
    async fn progress_reports_each_insertion() {
        let pool = MemoryPool::new();
        pool.publish("r1", chunk_record("e0", 0, "c0"));
        pool.publish("r1", chunk_record("e1", 1, "c1"));

        let calls = Arc::new(Mutex::new(Vec::new()));
        let calls2 = Arc::clone(&calls);
        let progress: ProgressFn = Box::new(move |done, total| {
            calls2.lock().unwrap().push((done, total));
        });

        let map = fresh_map();
        fetch_chunks(&pool, &request(2, vec![]), &map, &fast_config(), Some(&progress))
            .await
            .unwrap();

        assert_eq!(*calls.lock().unwrap(), vec![(1, 2), (2, 2)]);
    }

    #[tokio::test]
    async fn batching_splits_large_id_lists() {
        let pool = MemoryPool::new();
        for i in 0..5u64 {
            pool.publish("r1", chunk_record(&format!("e{i}"), i, "c"));
        }

        let cfg = FetchConfig {
            id_batch_size: 2,
            batch_timeout: Duration::from_millis(200),
            ..FetchConfig::default()
        };
        let infos = (0..5u64).map(|i| info(i, &format!("e{i}"))).collect();
        let map = fresh_map();
        let stats = fetch_chunks(&pool, &request(5, infos), &map, &cfg, None)
            .await
            .unwrap();

        assert_eq!(stats.collected, 5);
        assert_eq!(pool.subscribe_calls(), 3, "5 ids in batches of 2");
    }

    #[tokio::test]
    async fn stops_issuing_batches_once_complete() {
        let pool = MemoryPool::new();
        pool.publish("r1", chunk_record("e0", 0, "c0"));
        pool.publish("r1", chunk_record("e1", 1, "c1"));

        let cfg = FetchConfig {
            id_batch_size: 2,
            batch_timeout: Duration::from_millis(200),
            ..FetchConfig::default()
        };
        // 4 hinted ids → 2 batches, but the first batch already completes
        let infos = vec![info(0, "e0"), info(1, "e1"), info(2, "e2"), info(3, "e3")];
        let map = fresh_map();
        let stats = fetch_chunks(&pool, &request(2, infos), &map, &cfg, None)
            .await
            .unwrap();

        assert_eq!(stats.collected, 2);
        assert_eq!(pool.subscribe_calls(), 1, "second batch never issued");
    }
}
