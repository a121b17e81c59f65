//! Task executors.
//!
//! One generic capability interface, many concrete task bodies, selected by
//! job kind. The engine holds one executor per registered kind; executors
//! get an [`ExecutionContext`] so discovery-style tasks can drive the relay
//! network directly (the concurrent scan opens its own connections through
//! the connector).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dvm_protocol::{JobRequest, ServiceAnnouncement};
use dvm_relay::{RelayConnector, RelayError};
use thiserror::Error;
use tracing::warn;

use crate::payment::CostModel;
use crate::scan::ScanError;
use crate::store::SeenStore;

/// Why a task body failed.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Failed(String),

    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("scan failed: {0}")]
    Scan(#[from] ScanError),
}

impl ExecutionError {
    pub fn failed(message: impl Into<String>) -> Self {
        ExecutionError::Failed(message.into())
    }
}

/// Shared resources handed to executors.
pub struct ExecutionContext {
    /// Factory for independent relay connections
    pub connector: Arc<dyn RelayConnector>,
    /// The provider's relay list
    pub relays: Vec<String>,
    /// Bounded wait for relay queries
    pub relay_timeout: Duration,
    /// Shared dedup store (single synchronized writer inside)
    pub store: Arc<SeenStore>,
}

/// A concrete task body.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Job request kind this executor serves.
    fn kind(&self) -> u16;

    /// Short task name for logs and announcements.
    fn task(&self) -> &str;

    /// Pricing; free by default.
    fn cost(&self) -> CostModel {
        CostModel::FREE
    }

    /// The discoverable description of this task.
    fn announcement(&self) -> ServiceAnnouncement;

    /// Whether encrypted request payloads are handled.
    fn accepts_encrypted(&self) -> bool {
        false
    }

    /// Whether this executor can work with the request's inputs.
    fn is_input_supported(&self, request: &JobRequest) -> bool;

    /// Units of work implied by the request, for per-unit pricing.
    fn units(&self, _request: &JobRequest) -> u64 {
        1
    }

    /// Run the task. May take minutes and may fan out over the scan
    /// subsystem; the engine applies the configured soft ceiling around it.
    async fn process(
        &self,
        request: &JobRequest,
        ctx: &ExecutionContext,
    ) -> Result<String, ExecutionError>;

    /// Pure reshaping of the raw result before publication, applied only
    /// when the request carries an `output` hint. Must be side-effect free.
    fn post_process(&self, raw: String, _request: &JobRequest) -> String {
        raw
    }
}

/// The fixed set of executors, keyed by kind.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<u16, Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor; a later registration for the same kind wins.
    pub fn register(&mut self, executor: Arc<dyn TaskExecutor>) {
        let kind = executor.kind();
        if let Some(previous) = self.executors.insert(kind, executor) {
            warn!(kind, task = previous.task(), "executor replaced");
        }
    }

    pub fn get(&self, kind: u16) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(&kind).cloned()
    }

    /// All registered kinds, sorted for deterministic subscriptions.
    pub fn kinds(&self) -> Vec<u16> {
        let mut kinds: Vec<u16> = self.executors.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn TaskExecutor>> {
        self.executors.values()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Null(u16);

    #[async_trait]
    impl TaskExecutor for Null {
        fn kind(&self) -> u16 {
            self.0
        }

        fn task(&self) -> &str {
            "null"
        }

        fn announcement(&self) -> ServiceAnnouncement {
            ServiceAnnouncement::new("null", self.0, "Null")
        }

        fn is_input_supported(&self, _request: &JobRequest) -> bool {
            true
        }

        async fn process(
            &self,
            _request: &JobRequest,
            _ctx: &ExecutionContext,
        ) -> Result<String, ExecutionError> {
            Ok(String::new())
        }
    }

    #[test]
    fn registry_selects_by_kind() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(Null(5301)));
        registry.register(Arc::new(Null(5000)));

        assert!(registry.get(5301).is_some());
        assert!(registry.get(5999).is_none());
        assert_eq!(registry.kinds(), vec![5000, 5301]);
        assert!(!registry.is_empty());
    }

    #[test]
    fn later_registration_wins() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(Null(5301)));
        registry.register(Arc::new(Null(5301)));
        assert_eq!(registry.kinds(), vec![5301]);
    }

    #[test]
    fn default_cost_is_free_and_units_one() {
        let executor = Null(5301);
        assert_eq!(executor.cost().quote(executor.units(&dummy_request())), 0);
        assert!(!executor.accepts_encrypted());
    }

    fn dummy_request() -> JobRequest {
        let event = dvm_protocol::Event {
            id: "aa".repeat(32),
            pubkey: "bb".repeat(32),
            created_at: 0,
            kind: 5301,
            tags: vec![],
            content: String::new(),
            sig: String::new(),
        };
        JobRequest::from_event(&event).unwrap()
    }
}
