//! Job protocol engine.
//!
//! One engine per worker identity. Inbound events are parsed at the
//! boundary, deduplicated by id, and driven through the job state machine:
//!
//! ```text
//! Received -> Unsupported                                [feedback: error]
//! Received -> Processing            (free or balance-covered)
//! Received -> PaymentRequired       [feedback: payment-required + invoice]
//! PaymentRequired -> Failed         (gateway down / deadline passed)
//! PaymentRequired -> PaymentReceived -> Processing       [feedback: processing]
//! Processing -> Completed           [publish result]
//! Processing -> Failed              [feedback: error]
//! ```
//!
//! Every terminal state other than `Completed` surfaces exactly one error
//! feedback; nothing is silently swallowed. Unrelated jobs run concurrently
//! in their own tasks; per-job events are published in state-transition
//! order, and aborted jobs never publish a late result.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use dvm_protocol::{
    kinds, unix_now, Event, EventError, EventTemplate, FeedbackStatus, JobFeedback, JobRequest,
    JobResult, Keys,
};
use dvm_relay::{Filter, RelayClient, RelayConnector, RelayError};

use crate::admin::{self, AdminCommand, AdminConfig, AdminError};
use crate::config::ProviderConfig;
use crate::executor::{ExecutionContext, ExecutionError, ExecutorRegistry, TaskExecutor};
use crate::job::{Job, JobLedger, JobState};
use crate::payment::{PaymentGate, PaymentGateway, Settlement};
use crate::store::SeenStore;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no task executors registered")]
    NoExecutors,

    #[error("inbound event stream closed")]
    StreamClosed,

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Event(#[from] EventError),
}

/// How a driven job ended up failing.
enum JobFailure {
    Execution(ExecutionError),
    Timeout(std::time::Duration),
}

impl JobFailure {
    fn detail(&self) -> String {
        match self {
            JobFailure::Execution(e) => format!("execution failed: {e}"),
            JobFailure::Timeout(ceiling) => {
                format!("execution timed out after {}s", ceiling.as_secs())
            }
        }
    }
}

pub struct Engine {
    config: ProviderConfig,
    keys: Keys,
    relay: Arc<dyn RelayClient>,
    registry: ExecutorRegistry,
    gate: PaymentGate,
    ledger: Mutex<JobLedger>,
    ctx: ExecutionContext,
    admin: AdminConfig,
    /// Per-job wakeups fired when a value-transfer event is observed
    settlements: Mutex<HashMap<String, Arc<Notify>>>,
    /// In-flight job tasks; aborted wholesale on shutdown
    tasks: Mutex<JoinSet<()>>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ProviderConfig,
        keys: Keys,
        relay: Arc<dyn RelayClient>,
        connector: Arc<dyn RelayConnector>,
        registry: ExecutorRegistry,
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<SeenStore>,
        admin: AdminConfig,
    ) -> Self {
        let gate = PaymentGate::new(
            gateway,
            config.settlement_poll,
            config.payment_deadline,
            config.gateway_retry_backoff,
        );
        let ctx = ExecutionContext {
            connector,
            relays: config.relays.clone(),
            relay_timeout: config.relay_timeout,
            store,
        };
        Self {
            config,
            keys,
            relay,
            registry,
            gate,
            ledger: Mutex::new(JobLedger::new()),
            ctx,
            admin,
            settlements: Mutex::new(HashMap::new()),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// The worker's public key.
    pub fn public_key(&self) -> &str {
        self.keys.public_key()
    }

    /// The payment gate (balances are adjusted through it).
    pub fn payment_gate(&self) -> &PaymentGate {
        &self.gate
    }

    /// Run startup admin commands and open the inbound subscriptions.
    pub async fn startup(&self) -> Result<(), EngineError> {
        if self.registry.is_empty() {
            return Err(EngineError::NoExecutors);
        }

        for command in self.admin.startup_commands() {
            self.execute_admin(command).await;
        }

        let since = unix_now();
        let filters = vec![
            Filter::new().kinds(self.registry.kinds()).since(since),
            Filter::new()
                .kind(kinds::KIND_ZAP_RECEIPT)
                .tag('p', self.keys.public_key())
                .since(since),
            Filter::new()
                .kind(kinds::KIND_ADMIN_COMMAND)
                .tag('p', self.keys.public_key())
                .since(since),
        ];
        self.relay.subscribe(filters).await?;

        info!(
            pubkey = self.keys.public_key(),
            kinds = ?self.registry.kinds(),
            "provider listening for jobs"
        );
        Ok(())
    }

    /// Startup, then dispatch inbound events until the stream closes.
    pub async fn run(self: Arc<Self>) -> Result<(), EngineError> {
        self.startup().await?;
        let mut events = self.relay.events();
        loop {
            match events.recv().await {
                Ok(event) => Arc::clone(&self).handle_event(event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("inbound stream lagged, dropped {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(EngineError::StreamClosed),
            }
        }
    }

    /// Dispatch one inbound event.
    pub async fn handle_event(self: Arc<Self>, event: Event) {
        match event.kind {
            k if kinds::is_job_request_kind(k) => self.handle_request(event).await,
            kinds::KIND_ZAP_RECEIPT => self.handle_zap(event).await,
            kinds::KIND_ADMIN_COMMAND => self.handle_admin(event).await,
            other => debug!(kind = other, "ignoring event"),
        }
    }

    /// Abort in-flight jobs and close the relay. Aborted jobs never publish
    /// a late result.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        drop(tasks);
        self.relay.disconnect().await;
        info!("engine stopped");
    }

    /// Wait until every spawned job task has finished (tests, drain).
    pub async fn wait_for_jobs(&self) {
        let mut tasks = self.tasks.lock().await;
        while tasks.join_next().await.is_some() {}
    }

    /// Terminal state of a tracked job, if known.
    pub async fn job_state(&self, id: &str) -> Option<JobState> {
        self.ledger.lock().await.get(id).map(|job| job.state)
    }

    async fn handle_request(self: Arc<Self>, event: Event) {
        // Relay duplication is expected; the first delivery wins.
        let request = {
            let mut ledger = self.ledger.lock().await;
            if ledger.contains(&event.id) {
                debug!(job = %event.id, "duplicate delivery ignored");
                return;
            }
            let request = match JobRequest::from_event(&event) {
                Ok(request) => request,
                Err(e) => {
                    // No valid job id means no feedback is possible.
                    debug!("dropping malformed job request: {e}");
                    return;
                }
            };
            ledger.insert(Job::new(request.clone()));
            request
        };

        info!(job = %request.id, kind = request.kind, from = %request.requester, "job received");

        let Some(executor) = self.registry.get(request.kind) else {
            self.reject_unsupported(&request, format!("task kind {} is not supported", request.kind))
                .await;
            return;
        };
        if request.encrypted && !executor.accepts_encrypted() {
            self.reject_unsupported(
                &request,
                format!("task {} does not accept encrypted requests", executor.task()),
            )
            .await;
            return;
        }
        if !executor.is_input_supported(&request) {
            self.reject_unsupported(&request, "unsupported input combination".to_string())
                .await;
            return;
        }

        // Unrelated jobs are not serialized: each runs in its own task.
        let engine = Arc::clone(&self);
        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            engine.drive_job(executor, request).await;
        });
    }

    async fn drive_job(self: Arc<Self>, executor: Arc<dyn TaskExecutor>, request: JobRequest) {
        let job_id = request.id.clone();
        let units = executor.units(&request);
        let cost = executor.cost().quote(units);
        self.with_ledger(|ledger| ledger.update(&job_id, |job| job.cost_sats = cost))
            .await;

        let mut invoice_bolt11 = None;
        if cost == 0 {
            self.advance(&job_id, JobState::Processing).await;
            self.publish_feedback(&request, FeedbackStatus::Processing, None, None)
                .await;
        } else if self.gate.balances().try_debit(&request.requester, cost) {
            info!(job = %job_id, cost, "cost covered from requester balance");
            self.advance(&job_id, JobState::PaymentReceived).await;
            self.advance(&job_id, JobState::Processing).await;
            self.publish_feedback(&request, FeedbackStatus::Processing, None, None)
                .await;
        } else {
            self.advance(&job_id, JobState::PaymentRequired).await;
            let memo = format!("{} job {}", executor.task(), &job_id[..8.min(job_id.len())]);
            let invoice = match self.gate.request_invoice(&job_id, cost, &memo).await {
                Ok(invoice) => invoice,
                Err(e) => {
                    self.advance(&job_id, JobState::Failed).await;
                    self.publish_feedback(
                        &request,
                        FeedbackStatus::Error,
                        Some(e.to_string()),
                        None,
                    )
                    .await;
                    return;
                }
            };
            invoice_bolt11 = Some(invoice.bolt11.clone());
            self.with_ledger(|ledger| {
                ledger.update(&job_id, |job| job.bolt11 = Some(invoice.bolt11.clone()))
            })
            .await;

            // Register the wakeup before the invoice is shown to the world,
            // so a fast payer cannot slip between publish and wait.
            let observed = self.settlement_notify(&job_id).await;
            self.publish_feedback(
                &request,
                FeedbackStatus::PaymentRequired,
                None,
                Some((cost, Some(invoice.bolt11.clone()))),
            )
            .await;

            // Settlement is observed asynchronously; other jobs keep running.
            let settlement = self.gate.await_settlement(&job_id, observed).await;
            self.drop_settlement_notify(&job_id).await;
            match settlement {
                Settlement::Settled => {
                    info!(job = %job_id, "payment settled");
                    self.advance(&job_id, JobState::PaymentReceived).await;
                    self.advance(&job_id, JobState::Processing).await;
                    self.publish_feedback(&request, FeedbackStatus::Processing, None, None)
                        .await;
                }
                Settlement::Expired => {
                    self.advance(&job_id, JobState::Failed).await;
                    self.publish_feedback(
                        &request,
                        FeedbackStatus::Error,
                        Some("payment expired".to_string()),
                        None,
                    )
                    .await;
                    return;
                }
            }
        }

        let outcome = match self.config.execution_ceiling {
            Some(ceiling) => match timeout(ceiling, executor.process(&request, &self.ctx)).await {
                Ok(result) => result.map_err(JobFailure::Execution),
                Err(_) => Err(JobFailure::Timeout(ceiling)),
            },
            None => executor
                .process(&request, &self.ctx)
                .await
                .map_err(JobFailure::Execution),
        };

        match outcome {
            Ok(raw) => {
                // The post-process hook is pure; it only fires on an output hint.
                let payload = if request.output.is_some() {
                    executor.post_process(raw, &request)
                } else {
                    raw
                };
                self.advance(&job_id, JobState::Completed).await;
                self.publish_result(&request, payload, cost, invoice_bolt11)
                    .await;
                info!(job = %job_id, "job completed");
            }
            Err(failure) => {
                self.advance(&job_id, JobState::Failed).await;
                self.publish_feedback(&request, FeedbackStatus::Error, Some(failure.detail()), None)
                    .await;
                warn!(job = %job_id, "job failed: {}", failure.detail());
            }
        }

        self.gate.finish(&job_id).await;
        self.with_ledger(|ledger| {
            ledger.prune(self.config.job_retention);
            Ok(())
        })
        .await;
    }

    async fn handle_zap(&self, event: Event) {
        let Some(job_id) = event.tag_value("e") else {
            return;
        };
        if let Some(observed) = self.settlements.lock().await.get(job_id) {
            debug!(job = %job_id, "zap receipt observed");
            observed.notify_one();
        }
    }

    async fn handle_admin(&self, event: Event) {
        match admin::parse_command(&event, &self.admin.admin_pubkeys) {
            Ok(command) => {
                info!(from = %event.pubkey, ?command, "admin command accepted");
                self.execute_admin(command).await;
            }
            // Rejected commands are logged, never executed, and never
            // surfaced over the job protocol.
            Err(AdminError::Unauthorized(pubkey)) => {
                warn!(from = %pubkey, "unauthorized admin command rejected");
            }
            Err(AdminError::Malformed(reason)) => {
                warn!(from = %event.pubkey, "malformed admin command: {reason}");
            }
        }
    }

    /// Execute an (already authorized) admin command.
    pub async fn execute_admin(&self, command: AdminCommand) {
        match command {
            AdminCommand::RebroadcastAnnouncement => {
                for executor in self.registry.iter() {
                    let template = executor.announcement().to_template(unix_now());
                    match self.sign_and_publish(template).await {
                        Ok(()) => info!(task = executor.task(), "announcement rebroadcast"),
                        Err(e) => warn!(task = executor.task(), "announcement failed: {e}"),
                    }
                }
            }
            AdminCommand::UpdateProfile { profile } => {
                match self.sign_and_publish(profile.to_template(unix_now())).await {
                    Ok(()) => info!("profile updated"),
                    Err(e) => warn!("profile update failed: {e}"),
                }
            }
            AdminCommand::AdjustBalance { pubkey, delta_sats } => {
                let balance = self.gate.balances().credit(&pubkey, delta_sats);
                info!(requester = %pubkey, delta_sats, balance, "balance adjusted");
            }
        }
    }

    async fn reject_unsupported(&self, request: &JobRequest, detail: String) {
        self.advance(&request.id, JobState::Unsupported).await;
        self.publish_feedback(request, FeedbackStatus::Error, Some(detail), None)
            .await;
    }

    async fn advance(&self, job_id: &str, state: JobState) {
        let mut ledger = self.ledger.lock().await;
        if let Err(e) = ledger.advance(job_id, state) {
            // A bug if it ever fires; the state machine is driven linearly.
            warn!(job = %job_id, "state advance rejected: {e}");
        }
    }

    async fn with_ledger<F>(&self, f: F)
    where
        F: FnOnce(&mut JobLedger) -> Result<(), crate::job::JobStateError>,
    {
        let mut ledger = self.ledger.lock().await;
        if let Err(e) = f(&mut ledger) {
            warn!("ledger update failed: {e}");
        }
    }

    async fn settlement_notify(&self, job_id: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.settlements
            .lock()
            .await
            .insert(job_id.to_string(), Arc::clone(&notify));
        notify
    }

    async fn drop_settlement_notify(&self, job_id: &str) {
        self.settlements.lock().await.remove(job_id);
    }

    async fn publish_feedback(
        &self,
        request: &JobRequest,
        status: FeedbackStatus,
        detail: Option<String>,
        amount: Option<(u64, Option<String>)>,
    ) {
        let mut feedback = JobFeedback::for_request(request, status);
        if let Some(detail) = detail {
            feedback = feedback.with_detail(detail);
        }
        if let Some((sats, bolt11)) = amount {
            feedback = feedback.with_amount(sats, bolt11);
        }
        if let Err(e) = self.sign_and_publish(feedback.to_template(unix_now())).await {
            warn!(job = %request.id, status = status.as_str(), "feedback publish failed: {e}");
        }
    }

    async fn publish_result(
        &self,
        request: &JobRequest,
        payload: String,
        cost: u64,
        bolt11: Option<String>,
    ) {
        let mut result = JobResult::for_request(request, payload);
        if cost > 0 {
            result = result.with_amount(cost, bolt11);
        }
        if let Err(e) = self.sign_and_publish(result.to_template(unix_now())).await {
            warn!(job = %request.id, "result publish failed: {e}");
        }
    }

    async fn sign_and_publish(&self, template: EventTemplate) -> Result<(), EngineError> {
        let event = self.keys.sign(template)?;
        self.relay.publish(event).await?;
        Ok(())
    }
}
