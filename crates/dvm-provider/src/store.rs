//! Persistent dedup store for discovery tasks.
//!
//! Keyed by item id with a retention window: entries older than the window
//! are evicted on load and on insert. Scan workers share one store and all
//! writes funnel through the mutex-guarded append path — a single-writer
//! resource, never raw concurrent file writes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use dvm_protocol::unix_now;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Id → first-seen-timestamp map with retention-window eviction.
pub struct SeenStore {
    path: Option<PathBuf>,
    retention: Duration,
    entries: Mutex<HashMap<String, u64>>,
}

impl SeenStore {
    /// Open (or create) a store backed by `path`.
    pub fn open(path: PathBuf, retention: Duration) -> Result<Self, StoreError> {
        let mut entries: HashMap<String, u64> = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        evict(&mut entries, retention);
        debug!(path = %path.display(), entries = entries.len(), "seen store opened");
        Ok(Self {
            path: Some(path),
            retention,
            entries: Mutex::new(entries),
        })
    }

    /// A store that lives only in memory (tests, ephemeral providers).
    pub fn in_memory(retention: Duration) -> Self {
        Self {
            path: None,
            retention,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record `id` if it is new. Returns `true` when the id was not seen
    /// within the retention window (i.e. the item should be admitted).
    pub async fn insert_new(&self, id: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        evict(&mut entries, self.retention);
        if entries.contains_key(id) {
            return Ok(false);
        }
        entries.insert(id.to_string(), unix_now());
        self.persist(&entries)?;
        Ok(true)
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.entries.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    fn persist(&self, entries: &HashMap<String, u64>) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec(entries)?)?;
        Ok(())
    }
}

fn evict(entries: &mut HashMap<String, u64>, retention: Duration) {
    let cutoff = unix_now().saturating_sub(retention.as_secs());
    entries.retain(|_, first_seen| *first_seen >= cutoff);
}
