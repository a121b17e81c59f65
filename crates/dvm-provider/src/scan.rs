//! Concurrent relay-query subsystem.
//!
//! Checks activity of a large identity set by partitioning it into
//! contiguous chunks and querying each chunk over its own short-lived relay
//! connection, all chunks concurrently. Every worker builds a map over its
//! own keys only and the caller merges after the join barrier — no shared
//! mutable map exists while the scan runs, so there is nothing to race on.
//!
//! One failed chunk degrades its identities to the `false` default; the
//! scan as a whole fails only when no chunk succeeds. Dropping the returned
//! future aborts in-flight workers, so a cancelled scan never leaks a
//! half-built map.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dvm_relay::{Filter, RelayConnector, RelayError};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("all {0} scan chunks failed")]
    AllChunksFailed(usize),
}

/// Tuning for one scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Identities per chunk (and per connection)
    pub chunk_size: usize,
    /// Bounded wait per chunk query
    pub timeout: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            chunk_size: 20,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Scan `identities` for any event since `since`.
///
/// Returns a map with **every** input identity defined: `true` when at
/// least one matching event was observed, `false` otherwise (including
/// identities whose chunk failed).
pub async fn scan_activity(
    connector: Arc<dyn RelayConnector>,
    relays: Vec<String>,
    identities: Vec<String>,
    since: u64,
    options: ScanOptions,
) -> Result<HashMap<String, bool>, ScanError> {
    if identities.is_empty() {
        return Ok(HashMap::new());
    }
    let chunk_size = options.chunk_size.max(1);

    // Initialize the aggregate up front so failed chunks still leave their
    // identities defined.
    let mut merged: HashMap<String, bool> =
        identities.iter().map(|id| (id.clone(), false)).collect();

    let mut workers = JoinSet::new();
    let mut chunk_count = 0;
    for (index, chunk) in identities.chunks(chunk_size).enumerate() {
        chunk_count += 1;
        let connector = Arc::clone(&connector);
        let relays = relays.clone();
        let chunk = chunk.to_vec();
        let timeout = options.timeout;
        workers.spawn(async move {
            let outcome = scan_chunk(connector, relays, &chunk, since, timeout).await;
            (index, chunk, outcome)
        });
    }

    // Join barrier: every chunk finishes before the aggregate is read.
    let mut failed = 0;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok((index, _chunk, Ok(local))) => {
                debug!(chunk = index, active = local.values().filter(|v| **v).count(), "chunk done");
                for (identity, active) in local {
                    if active {
                        merged.insert(identity, true);
                    }
                }
            }
            Ok((index, chunk, Err(e))) => {
                failed += 1;
                warn!(chunk = index, identities = chunk.len(), "scan chunk failed: {e}");
            }
            Err(e) => {
                failed += 1;
                warn!("scan worker panicked or was aborted: {e}");
            }
        }
    }

    if failed == chunk_count {
        return Err(ScanError::AllChunksFailed(chunk_count));
    }
    Ok(merged)
}

/// One worker: own connection, one author filter per identity, local map.
async fn scan_chunk(
    connector: Arc<dyn RelayConnector>,
    relays: Vec<String>,
    identities: &[String],
    since: u64,
    timeout: Duration,
) -> Result<HashMap<String, bool>, RelayError> {
    let client = connector.open(&relays).await?;

    let filters: Vec<Filter> = identities
        .iter()
        .map(|id| Filter::new().author(id.clone()).since(since).limit(1))
        .collect();
    let fetched = client.fetch(filters, timeout).await;
    client.disconnect().await;
    let events = fetched?;

    let mut local: HashMap<String, bool> =
        identities.iter().map(|id| (id.clone(), false)).collect();
    for event in events {
        // Only this worker's keys; anything else the relay sent is noise.
        if let Some(active) = local.get_mut(&event.pubkey) {
            *active = true;
        }
    }
    Ok(local)
}
