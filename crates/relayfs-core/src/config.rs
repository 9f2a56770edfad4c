use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning knobs for the chunk retrieval engine and record resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Record identifiers per direct-phase subscription batch
    pub id_batch_size: usize,
    /// Upper wait bound per subscription when relays never signal
    /// end-of-stored-data
    pub batch_timeout: Duration,
    /// Upper wait bound for one-shot queries (index/manifest resolution)
    pub query_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            id_batch_size: 200,
            batch_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(10),
        }
    }
}
