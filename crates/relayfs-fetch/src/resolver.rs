//! Index and manifest resolution.
//!
//! Both record kinds are "latest wins": when several relays return
//! different candidates for the same addressing tag, the record with the
//! greatest `created_at` is taken. Malformed payloads are absorbed here
//! (logged, treated as no data at that tag) because another relay or tag
//! convention may still succeed; a declared schema version other than 2 is
//! a hard failure regardless.

use relayfs_core::{
    FetchConfig, FileIndex, Filter, Manifest, RelayRecord, RfsError, RfsResult,
    KIND_FILE_INDEX, KIND_FILE_MANIFEST, SCHEMA_VERSION, TAG_FILE_PREFIX, TAG_INDEX_CURRENT,
};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::relay::RelayPool;

/// Fetch the index record for a logical page.
///
/// Page 1 maps to the constant current-index tag. Any page N > 1 is a
/// two-step dependent lookup: page 1 must resolve first to learn
/// `total_archives`, which determines the archive tag number. If page 1 is
/// absent, no other page is resolvable.
pub async fn fetch_index<P: RelayPool>(
    pool: &P,
    relays: &[String],
    pubkey: &str,
    page: u32,
    config: &FetchConfig,
) -> RfsResult<Option<FileIndex>> {
    if page <= 1 {
        return fetch_index_tag(pool, relays, pubkey, TAG_INDEX_CURRENT, config).await;
    }

    let Some(first) = fetch_index_tag(pool, relays, pubkey, TAG_INDEX_CURRENT, config).await?
    else {
        debug!(page, "page 1 absent, archive page unresolvable");
        return Ok(None);
    };

    let Some(tag) = relayfs_core::index_tag(first.total_archives, page) else {
        debug!(page, total_archives = first.total_archives, "page out of range");
        return Ok(None);
    };

    fetch_index_tag(pool, relays, pubkey, &tag, config).await
}

async fn fetch_index_tag<P: RelayPool>(
    pool: &P,
    relays: &[String],
    pubkey: &str,
    tag: &str,
    config: &FetchConfig,
) -> RfsResult<Option<FileIndex>> {
    let filter = Filter::new()
        .kind(KIND_FILE_INDEX)
        .author(pubkey)
        .d_tag(tag)
        .limit(10);
    let records = query(pool, relays, filter, config).await?;
    match latest(records) {
        Some(winner) => parse_versioned::<FileIndex>(&winner, "index"),
        None => Ok(None),
    }
}

/// Fetch a file's manifest, trying the content-hash tag convention first
/// and the file-identifier d-tag as fallback. The first convention that
/// yields any result wins.
pub async fn fetch_manifest<P: RelayPool>(
    pool: &P,
    relays: &[String],
    pubkey: &str,
    file_hash: &str,
    config: &FetchConfig,
) -> RfsResult<Option<Manifest>> {
    let by_hash = Filter::new()
        .kind(KIND_FILE_MANIFEST)
        .author(pubkey)
        .x_tag(file_hash)
        .limit(10);
    let mut records = query(pool, relays, by_hash, config).await?;

    if records.is_empty() {
        debug!(file_hash, "no manifest by content-hash tag, trying file tag");
        let by_file_tag = Filter::new()
            .kind(KIND_FILE_MANIFEST)
            .author(pubkey)
            .d_tag(format!("{TAG_FILE_PREFIX}{file_hash}"))
            .limit(10);
        records = query(pool, relays, by_file_tag, config).await?;
    }

    match latest(records) {
        Some(winner) => parse_versioned::<Manifest>(&winner, "manifest"),
        None => Ok(None),
    }
}

/// One-shot query with the configured upper wait bound. A timeout is
/// treated as "no data", same as an empty response.
async fn query<P: RelayPool>(
    pool: &P,
    relays: &[String],
    filter: Filter,
    config: &FetchConfig,
) -> RfsResult<Vec<RelayRecord>> {
    match tokio::time::timeout(config.query_timeout, pool.query_sync(relays, filter)).await {
        Ok(result) => result,
        Err(_) => {
            warn!("relay query timed out");
            Ok(Vec::new())
        }
    }
}

/// Last-writer-wins tie-break across relay responses.
fn latest(records: Vec<RelayRecord>) -> Option<RelayRecord> {
    records.into_iter().max_by_key(|r| r.created_at)
}

/// Parse a versioned JSON payload.
///
/// Gate order matters: the declared version is checked before the full
/// typed parse, so a version mismatch surfaces as `UnsupportedVersion`
/// even when the rest of the payload would not deserialize. Payloads with
/// no parseable version declaration are malformed, not incompatible.
fn parse_versioned<T: DeserializeOwned>(
    record: &RelayRecord,
    what: &'static str,
) -> RfsResult<Option<T>> {
    let value: serde_json::Value = match serde_json::from_str(&record.content) {
        Ok(v) => v,
        Err(e) => {
            warn!(id = %record.id, record = what, "malformed payload: {e}");
            return Ok(None);
        }
    };

    match value.get("version").and_then(|v| v.as_u64()) {
        None => {
            warn!(id = %record.id, record = what, "payload has no version field");
            Ok(None)
        }
        Some(found) if found as u32 != SCHEMA_VERSION => Err(RfsError::UnsupportedVersion {
            record: what,
            found: found as u32,
            expected: SCHEMA_VERSION,
        }),
        Some(_) => match serde_json::from_value::<T>(value) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => {
                warn!(id = %record.id, record = what, "payload did not deserialize: {e}");
                Ok(None)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::MemoryPool;
    use relayfs_core::TAG_INDEX_ARCHIVE_PREFIX;

    const PK: &str = "owner-pubkey";

    fn relays() -> Vec<String> {
        vec!["r1".to_string(), "r2".to_string()]
    }

    fn index_record(id: &str, tag: &str, created_at: u64, content: &str) -> RelayRecord {
        RelayRecord {
            id: id.into(),
            pubkey: PK.into(),
            created_at,
            kind: KIND_FILE_INDEX,
            tags: vec![vec!["d".into(), tag.into()]],
            content: content.into(),
        }
    }

    fn index_json(total_archives: u32, hashes: &[&str]) -> String {
        let files: Vec<String> = hashes
            .iter()
            .map(|h| format!(r#"{{"hash":"{h}","name":"{h}.bin","size":10,"chunks":1}}"#))
            .collect();
        format!(
            r#"{{"version":2,"total_archives":{total_archives},"files":[{}]}}"#,
            files.join(",")
        )
    }

    #[tokio::test]
    async fn page_one_latest_wins_across_relays() {
        let pool = MemoryPool::new();
        pool.publish(
            "r1",
            index_record("old", TAG_INDEX_CURRENT, 100, &index_json(0, &["aaa"])),
        );
        pool.publish(
            "r2",
            index_record("new", TAG_INDEX_CURRENT, 200, &index_json(0, &["bbb"])),
        );

        let idx = fetch_index(&pool, &relays(), PK, 1, &FetchConfig::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(idx.files[0].hash, "bbb");
    }

    #[tokio::test]
    async fn archive_page_requires_page_one() {
        let pool = MemoryPool::new();
        // archive exists but page 1 does not: page 2 must be unresolvable
        pool.publish(
            "r1",
            index_record(
                "arch",
                &format!("{TAG_INDEX_ARCHIVE_PREFIX}1"),
                100,
                &index_json(0, &["old-file"]),
            ),
        );

        let idx = fetch_index(&pool, &relays(), PK, 2, &FetchConfig::default())
            .await
            .unwrap();
        assert!(idx.is_none());
    }

    #[tokio::test]
    async fn archive_page_resolves_via_page_one_count() {
        let pool = MemoryPool::new();
        pool.publish(
            "r1",
            index_record("cur", TAG_INDEX_CURRENT, 300, &index_json(2, &["new-file"])),
        );
        // page 2 → archive tag 2 + 2 - 2 = 2
        pool.publish(
            "r1",
            index_record(
                "arch2",
                &format!("{TAG_INDEX_ARCHIVE_PREFIX}2"),
                100,
                &index_json(0, &["archived-file"]),
            ),
        );

        let idx = fetch_index(&pool, &relays(), PK, 2, &FetchConfig::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(idx.files[0].hash, "archived-file");
    }

    #[tokio::test]
    async fn wrong_version_is_fatal_even_when_parseable() {
        let pool = MemoryPool::new();
        let content = r#"{"version":3,"total_archives":0,"files":[]}"#;
        pool.publish("r1", index_record("v3", TAG_INDEX_CURRENT, 100, content));

        let err = fetch_index(&pool, &relays(), PK, 1, &FetchConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RfsError::UnsupportedVersion {
                found: 3,
                expected: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn malformed_payload_is_absorbed() {
        let pool = MemoryPool::new();
        pool.publish("r1", index_record("bad", TAG_INDEX_CURRENT, 100, "not json"));

        let idx = fetch_index(&pool, &relays(), PK, 1, &FetchConfig::default())
            .await
            .unwrap();
        assert!(idx.is_none());
    }

    fn manifest_record(id: &str, tags: Vec<Vec<String>>, created_at: u64) -> RelayRecord {
        RelayRecord {
            id: id.into(),
            pubkey: PK.into(),
            created_at,
            kind: KIND_FILE_MANIFEST,
            tags,
            content: r#"{"version":2,"file_name":"a.bin","file_hash":"hhh","total_chunks":1}"#
                .into(),
        }
    }

    #[tokio::test]
    async fn manifest_by_content_hash_tag() {
        let pool = MemoryPool::new();
        pool.publish(
            "r1",
            manifest_record("m1", vec![vec!["x".into(), "hhh".into()]], 100),
        );

        let m = fetch_manifest(&pool, &relays(), PK, "hhh", &FetchConfig::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(m.total_chunks, 1);
    }

    #[tokio::test]
    async fn manifest_falls_back_to_file_tag() {
        let pool = MemoryPool::new();
        pool.publish(
            "r1",
            manifest_record("m1", vec![vec!["d".into(), "file:hhh".into()]], 100),
        );

        let m = fetch_manifest(&pool, &relays(), PK, "hhh", &FetchConfig::default())
            .await
            .unwrap();
        assert!(m.is_some());
        assert_eq!(pool.query_calls(), 2, "fallback needs a second query");
    }

    #[tokio::test]
    async fn manifest_wrong_version_is_fatal() {
        let pool = MemoryPool::new();
        let mut rec = manifest_record("m3", vec![vec!["x".into(), "hhh".into()]], 100);
        rec.content = r#"{"version":3,"file_name":"a.bin","file_hash":"hhh","total_chunks":1}"#
            .into();
        pool.publish("r1", rec);

        let err = fetch_manifest(&pool, &relays(), PK, "hhh", &FetchConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RfsError::UnsupportedVersion {
                record: "manifest",
                found: 3,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn manifest_absent_everywhere() {
        let pool = MemoryPool::new();
        let m = fetch_manifest(&pool, &relays(), PK, "hhh", &FetchConfig::default())
            .await
            .unwrap();
        assert!(m.is_none());
    }
}
