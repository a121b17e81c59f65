//! Topic content discovery.
//!
//! Surfaces recent notes that match a keyword profile: every `must` term
//! present, no `avoid` term, and not shown before — candidates are deduped
//! against the shared seen-store, which evicts entries older than its
//! retention window. Free to run by default; operators typically deploy one
//! instance per topic profile.

use async_trait::async_trait;

use dvm_protocol::{kinds, unix_now, JobRequest, ServiceAnnouncement};
use dvm_relay::Filter;

use crate::executor::{ExecutionContext, ExecutionError, TaskExecutor};
use crate::filter::KeywordFilter;

const DEFAULT_WINDOW_SECS: u64 = 10 * 60 * 60;
const FETCH_LIMIT: u64 = 500;
const MAX_RESULTS: usize = 50;

pub struct ContentDiscovery {
    identifier: String,
    name: String,
    keywords: KeywordFilter,
    /// How far back to look for candidate notes
    window_secs: u64,
    max_results: usize,
}

impl ContentDiscovery {
    pub fn new(
        identifier: impl Into<String>,
        name: impl Into<String>,
        keywords: KeywordFilter,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            name: name.into(),
            keywords,
            window_secs: DEFAULT_WINDOW_SECS,
            max_results: MAX_RESULTS,
        }
    }

    pub fn with_window_secs(mut self, window_secs: u64) -> Self {
        self.window_secs = window_secs;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }
}

#[async_trait]
impl TaskExecutor for ContentDiscovery {
    fn kind(&self) -> u16 {
        kinds::KIND_JOB_CONTENT_DISCOVERY
    }

    fn task(&self) -> &str {
        "content-discovery"
    }

    fn announcement(&self) -> ServiceAnnouncement {
        ServiceAnnouncement::new(self.identifier.clone(), self.kind(), self.name.clone())
            .with_about("Shows recent notes matching a topic profile")
    }

    fn is_input_supported(&self, _request: &JobRequest) -> bool {
        true
    }

    async fn process(
        &self,
        _request: &JobRequest,
        ctx: &ExecutionContext,
    ) -> Result<String, ExecutionError> {
        let since = unix_now().saturating_sub(self.window_secs);
        let client = ctx.connector.open(&ctx.relays).await?;
        let fetched = client
            .fetch(
                vec![Filter::new()
                    .kind(kinds::KIND_TEXT_NOTE)
                    .since(since)
                    .limit(FETCH_LIMIT)],
                ctx.relay_timeout,
            )
            .await;
        client.disconnect().await;

        let mut notes = fetched?;
        // Newest first, then admit through keywords and the dedup store.
        notes.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut admitted: Vec<Vec<String>> = Vec::new();
        for note in notes {
            if admitted.len() >= self.max_results {
                break;
            }
            if !self.keywords.admits(&note.content) {
                continue;
            }
            let fresh = ctx
                .store
                .insert_new(&note.id)
                .await
                .map_err(|e| ExecutionError::failed(e.to_string()))?;
            if fresh {
                admitted.push(vec!["e".to_string(), note.id]);
            }
        }

        serde_json::to_string(&admitted).map_err(|e| ExecutionError::failed(e.to_string()))
    }
}
