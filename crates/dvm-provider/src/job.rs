//! Job records and the state machine.
//!
//! Exactly one [`JobState`] is associated with a job at any time and
//! transitions are monotonic; the ledger gives the engine run-scoped
//! idempotence over job ids, so relay re-delivery never dispatches twice.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dvm_protocol::JobRequest;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobStateError {
    #[error("invalid transition {from:?} -> {to:?}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("unknown job {0}")]
    UnknownJob(String),
}

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Received,
    Unsupported,
    PaymentRequired,
    PaymentReceived,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    /// Terminal states never advance again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Unsupported | JobState::Completed | JobState::Failed
        )
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_advance_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Received, Unsupported)
                | (Received, PaymentRequired)
                | (Received, PaymentReceived)
                | (Received, Processing)
                | (PaymentRequired, PaymentReceived)
                | (PaymentRequired, Failed)
                | (PaymentReceived, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

/// One tracked job.
#[derive(Debug, Clone)]
pub struct Job {
    pub request: JobRequest,
    pub state: JobState,
    /// Quoted cost; zero means the payment gate was skipped
    pub cost_sats: u64,
    /// Invoice presented to the requester, if any
    pub bolt11: Option<String>,
    pub received_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(request: JobRequest) -> Self {
        Self {
            request,
            state: JobState::Received,
            cost_sats: 0,
            bolt11: None,
            received_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Advance to `next`, enforcing monotonicity.
    pub fn advance(&mut self, next: JobState) -> Result<(), JobStateError> {
        if !self.state.can_advance_to(next) {
            return Err(JobStateError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }
}

/// Run-scoped job registry keyed by request id.
#[derive(Default)]
pub struct JobLedger {
    jobs: HashMap<String, Job>,
}

impl JobLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this id has been seen this run.
    pub fn contains(&self, id: &str) -> bool {
        self.jobs.contains_key(id)
    }

    pub fn insert(&mut self, job: Job) {
        self.jobs.insert(job.request.id.clone(), job);
    }

    pub fn get(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    /// Advance a tracked job.
    pub fn advance(&mut self, id: &str, next: JobState) -> Result<(), JobStateError> {
        let job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| JobStateError::UnknownJob(id.to_string()))?;
        job.advance(next)
    }

    /// Mutate a tracked job in place.
    pub fn update<F: FnOnce(&mut Job)>(&mut self, id: &str, f: F) -> Result<(), JobStateError> {
        let job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| JobStateError::UnknownJob(id.to_string()))?;
        f(job);
        Ok(())
    }

    /// Drop terminal jobs older than `retention`; keeps duplicate
    /// suppression bounded without forgetting recent outcomes.
    pub fn prune(&mut self, retention: std::time::Duration) {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(retention).unwrap_or_else(|_| ChronoDuration::hours(24));
        self.jobs.retain(|_, job| {
            !job.state.is_terminal() || job.finished_at.is_none_or(|t| t > cutoff)
        });
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
