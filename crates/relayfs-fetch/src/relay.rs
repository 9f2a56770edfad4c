//! Relay pool boundary.
//!
//! The transport itself (connections, multiplexing, reconnects) lives
//! outside this crate; the engine consumes two primitives. `query_sync` is
//! one-shot: it resolves with all matching stored records once the relays
//! respond or the pool gives up. `subscribe` streams matching records as
//! they arrive, signals per-relay end-of-stored-data, and supports an
//! explicit close.
//!
//! [`MemoryPool`] is an in-memory implementation for tests and local use,
//! in the same spirit as an in-memory storage backend.

use relayfs_core::{Filter, RelayRecord, RfsResult};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One message from an open subscription.
#[derive(Debug)]
pub enum SubMessage {
    Event(RelayRecord),
    /// A relay has delivered everything it had stored for the filter
    EndOfStored { relay: String },
}

/// A live multi-relay subscription. Closing (or dropping) cancels the
/// producer so relays are not left draining into a dead channel.
pub struct Subscription {
    rx: mpsc::Receiver<SubMessage>,
    cancel: CancellationToken,
    relay_count: usize,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<SubMessage>, cancel: CancellationToken, relay_count: usize) -> Self {
        Self {
            rx,
            cancel,
            relay_count,
        }
    }

    /// Next message, or `None` once the producer has shut down.
    pub async fn recv(&mut self) -> Option<SubMessage> {
        self.rx.recv().await
    }

    /// Number of relays this subscription was opened against, for
    /// all-relays-done detection.
    pub fn relay_count(&self) -> usize {
        self.relay_count
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The multi-relay query/subscription primitive the engine runs against.
pub trait RelayPool: Send + Sync + 'static {
    /// Fetch all currently stored records matching `filter` from `relays`.
    /// Duplicates across relays are returned as-is; callers deduplicate.
    fn query_sync(
        &self,
        relays: &[String],
        filter: Filter,
    ) -> impl Future<Output = RfsResult<Vec<RelayRecord>>> + Send;

    /// Open a streaming subscription for `filter` on `relays`.
    fn subscribe(
        &self,
        relays: &[String],
        filter: Filter,
    ) -> impl Future<Output = RfsResult<Subscription>> + Send;
}

/// In-memory relay pool: each named relay holds its own record list, so
/// tests can model duplicates, partial coverage, and relays that never
/// signal end-of-stored-data.
#[derive(Default)]
pub struct MemoryPool {
    records: Mutex<HashMap<String, Vec<RelayRecord>>>,
    silent: Mutex<HashSet<String>>,
    query_calls: AtomicUsize,
    subscribe_calls: AtomicUsize,
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record on one relay.
    pub fn publish(&self, relay: &str, record: RelayRecord) {
        self.records
            .lock()
            .unwrap()
            .entry(relay.to_string())
            .or_default()
            .push(record);
    }

    /// Mark a relay as never signaling end-of-stored-data; subscriptions
    /// against it only terminate by close or timeout.
    pub fn mark_silent(&self, relay: &str) {
        self.silent.lock().unwrap().insert(relay.to_string());
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    fn stored_matches(&self, relays: &[String], filter: &Filter) -> Vec<(String, Vec<RelayRecord>)> {
        let records = self.records.lock().unwrap();
        relays
            .iter()
            .map(|relay| {
                let mut matches: Vec<RelayRecord> = records
                    .get(relay)
                    .map(|recs| recs.iter().filter(|r| filter.matches(r)).cloned().collect())
                    .unwrap_or_default();
                if let Some(limit) = filter.limit {
                    matches.truncate(limit);
                }
                (relay.clone(), matches)
            })
            .collect()
    }
}

impl RelayPool for MemoryPool {
    async fn query_sync(&self, relays: &[String], filter: Filter) -> RfsResult<Vec<RelayRecord>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .stored_matches(relays, &filter)
            .into_iter()
            .flat_map(|(_, recs)| recs)
            .collect())
    }

    async fn subscribe(&self, relays: &[String], filter: Filter) -> RfsResult<Subscription> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let per_relay = self.stored_matches(relays, &filter);
        let silent = self.silent.lock().unwrap().clone();

        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let producer_cancel = cancel.clone();
        let relay_count = relays.len();

        tokio::spawn(async move {
            for (relay, recs) in per_relay {
                for rec in recs {
                    tokio::select! {
                        _ = producer_cancel.cancelled() => return,
                        res = tx.send(SubMessage::Event(rec)) => {
                            if res.is_err() {
                                return;
                            }
                        }
                    }
                }
                if !silent.contains(&relay) {
                    tokio::select! {
                        _ = producer_cancel.cancelled() => return,
                        res = tx.send(SubMessage::EndOfStored { relay }) => {
                            if res.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
            // Stay open like a live subscription until explicitly closed
            producer_cancel.cancelled().await;
        });

        Ok(Subscription::new(rx, cancel, relay_count))
    }
}
