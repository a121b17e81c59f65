//! End-to-end engine tests over an in-memory relay network and gateway.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::sleep;

use dvm_protocol::{
    kinds, unix_now, Event, EventTemplate, JobRequest, Keys, ServiceAnnouncement,
};
use dvm_provider::{
    tasks::InactiveFollows, AdminConfig, CostModel, Engine, EngineError, ExecutionContext,
    ExecutionError, ExecutorRegistry, GatewayError, Invoice, JobState, PaymentGateway,
    ProviderConfig, SeenStore, TaskExecutor,
};
use dvm_relay::{Filter, RelayClient, RelayConnector, Result as RelayResult};

// ---------------------------------------------------------------------------
// In-memory network
// ---------------------------------------------------------------------------

/// Shared store of events that `fetch` can answer from, plus a log of
/// everything the engine publishes. Doubles as connector so scan workers get
/// independent clients over the same data.
struct FakeNet {
    stored: Arc<StdMutex<Vec<Event>>>,
    published: Arc<StdMutex<Vec<Event>>>,
    opened: AtomicUsize,
    events_tx: broadcast::Sender<Event>,
}

impl FakeNet {
    fn new() -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            stored: Arc::new(StdMutex::new(Vec::new())),
            published: Arc::new(StdMutex::new(Vec::new())),
            opened: AtomicUsize::new(0),
            events_tx,
        })
    }

    fn add_stored(&self, event: Event) {
        self.stored.lock().unwrap().push(event);
    }

    fn published(&self) -> Vec<Event> {
        self.published.lock().unwrap().clone()
    }

    /// Events the engine published that reference `job_id`.
    fn published_for(&self, job_id: &str) -> Vec<Event> {
        self.published()
            .into_iter()
            .filter(|e| e.tag_value("e") == Some(job_id))
            .collect()
    }

    /// Push an event into the engine's live stream.
    fn inject(&self, event: Event) {
        let _ = self.events_tx.send(event);
    }

    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

fn matches(event: &Event, filter: &Filter) -> bool {
    if let Some(ids) = &filter.ids {
        if !ids.contains(&event.id) {
            return false;
        }
    }
    if let Some(authors) = &filter.authors {
        if !authors.contains(&event.pubkey) {
            return false;
        }
    }
    if let Some(filter_kinds) = &filter.kinds {
        if !filter_kinds.contains(&event.kind) {
            return false;
        }
    }
    if let Some(since) = filter.since {
        if event.created_at < since {
            return false;
        }
    }
    if let Some(until) = filter.until {
        if event.created_at > until {
            return false;
        }
    }
    for (key, values) in &filter.tags {
        let letter = key.trim_start_matches('#');
        let hit = event
            .tags_named(letter)
            .any(|tag| tag.get(1).is_some_and(|v| values.contains(v)));
        if !hit {
            return false;
        }
    }
    true
}

fn run_query(stored: &[Event], filters: &[Filter]) -> Vec<Event> {
    let mut seen = HashSet::new();
    let mut results = Vec::new();
    for filter in filters {
        let limit = filter.limit.unwrap_or(u64::MAX) as usize;
        for event in stored.iter().filter(|e| matches(e, filter)).take(limit) {
            if seen.insert(event.id.clone()) {
                results.push(event.clone());
            }
        }
    }
    results
}

struct FakeClient {
    stored: Arc<StdMutex<Vec<Event>>>,
    published: Arc<StdMutex<Vec<Event>>>,
}

#[async_trait]
impl RelayClient for FakeClient {
    async fn publish(&self, event: Event) -> RelayResult<usize> {
        self.published.lock().unwrap().push(event);
        Ok(1)
    }

    async fn fetch(&self, filters: Vec<Filter>, _wait: Duration) -> RelayResult<Vec<Event>> {
        Ok(run_query(&self.stored.lock().unwrap(), &filters))
    }

    async fn subscribe(&self, _filters: Vec<Filter>) -> RelayResult<String> {
        Ok("sub".into())
    }

    fn events(&self) -> broadcast::Receiver<Event> {
        broadcast::channel(1).1
    }

    async fn disconnect(&self) {}
}

#[async_trait]
impl RelayClient for FakeNet {
    async fn publish(&self, event: Event) -> RelayResult<usize> {
        self.published.lock().unwrap().push(event);
        Ok(1)
    }

    async fn fetch(&self, filters: Vec<Filter>, _wait: Duration) -> RelayResult<Vec<Event>> {
        Ok(run_query(&self.stored.lock().unwrap(), &filters))
    }

    async fn subscribe(&self, _filters: Vec<Filter>) -> RelayResult<String> {
        Ok("sub".into())
    }

    fn events(&self) -> broadcast::Receiver<Event> {
        self.events_tx.subscribe()
    }

    async fn disconnect(&self) {}
}

#[async_trait]
impl RelayConnector for FakeNet {
    async fn open(&self, _relays: &[String]) -> RelayResult<Box<dyn RelayClient>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeClient {
            stored: Arc::clone(&self.stored),
            published: Arc::clone(&self.published),
        }))
    }
}

// ---------------------------------------------------------------------------
// Fake gateway
// ---------------------------------------------------------------------------

struct FakeGateway {
    unavailable: AtomicBool,
    paid: StdMutex<HashSet<String>>,
    issued: AtomicUsize,
}

impl FakeGateway {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            unavailable: AtomicBool::new(false),
            paid: StdMutex::new(HashSet::new()),
            issued: AtomicUsize::new(0),
        })
    }

    fn broken() -> Arc<Self> {
        let gateway = Self::new();
        gateway.unavailable.store(true, Ordering::SeqCst);
        gateway
    }

    fn settle_all(&self) {
        let issued = self.issued.load(Ordering::SeqCst);
        let mut paid = self.paid.lock().unwrap();
        for n in 0..issued {
            paid.insert(format!("hash-{n}"));
        }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_invoice(
        &self,
        amount_sats: u64,
        _memo: &str,
    ) -> Result<Invoice, GatewayError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("connection refused".into()));
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(Invoice {
            payment_hash: format!("hash-{n}"),
            bolt11: format!("lnbc{amount_sats}n1fake"),
            amount_sats,
        })
    }

    async fn check_settlement(&self, invoice: &Invoice) -> Result<bool, GatewayError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("connection refused".into()));
        }
        Ok(self.paid.lock().unwrap().contains(&invoice.payment_hash))
    }
}

// ---------------------------------------------------------------------------
// Test executors
// ---------------------------------------------------------------------------

struct Echo {
    cost: CostModel,
}

impl Echo {
    fn free() -> Arc<Self> {
        Arc::new(Self {
            cost: CostModel::FREE,
        })
    }

    fn paid(fix_sats: u64) -> Arc<Self> {
        Arc::new(Self {
            cost: CostModel::fixed(fix_sats),
        })
    }
}

#[async_trait]
impl TaskExecutor for Echo {
    fn kind(&self) -> u16 {
        5050
    }

    fn task(&self) -> &str {
        "echo"
    }

    fn cost(&self) -> CostModel {
        self.cost
    }

    fn announcement(&self) -> ServiceAnnouncement {
        ServiceAnnouncement::new("echo", 5050, "Echo")
    }

    fn is_input_supported(&self, request: &JobRequest) -> bool {
        !request.inputs.is_empty()
    }

    async fn process(
        &self,
        request: &JobRequest,
        _ctx: &ExecutionContext,
    ) -> Result<String, ExecutionError> {
        Ok(request.inputs[0].data.clone())
    }
}

struct Failing;

#[async_trait]
impl TaskExecutor for Failing {
    fn kind(&self) -> u16 {
        5051
    }

    fn task(&self) -> &str {
        "failing"
    }

    fn announcement(&self) -> ServiceAnnouncement {
        ServiceAnnouncement::new("failing", 5051, "Failing")
    }

    fn is_input_supported(&self, _request: &JobRequest) -> bool {
        true
    }

    async fn process(
        &self,
        _request: &JobRequest,
        _ctx: &ExecutionContext,
    ) -> Result<String, ExecutionError> {
        Err(ExecutionError::failed("boom"))
    }
}

struct Slow;

#[async_trait]
impl TaskExecutor for Slow {
    fn kind(&self) -> u16 {
        5052
    }

    fn task(&self) -> &str {
        "slow"
    }

    fn announcement(&self) -> ServiceAnnouncement {
        ServiceAnnouncement::new("slow", 5052, "Slow")
    }

    fn is_input_supported(&self, _request: &JobRequest) -> bool {
        true
    }

    async fn process(
        &self,
        _request: &JobRequest,
        _ctx: &ExecutionContext,
    ) -> Result<String, ExecutionError> {
        sleep(Duration::from_secs(5)).await;
        Ok("too late".into())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    engine: Arc<Engine>,
    net: Arc<FakeNet>,
    gateway: Arc<FakeGateway>,
    requester: Keys,
}

fn fast_config() -> ProviderConfig {
    let mut config = ProviderConfig::new("00".repeat(32), vec!["wss://fake".into()]);
    config.settlement_poll = Duration::from_millis(10);
    config.payment_deadline = Duration::from_secs(2);
    config.gateway_retry_backoff = Duration::from_millis(1);
    config.execution_ceiling = Some(Duration::from_millis(500));
    config
}

fn harness_with(
    executors: Vec<Arc<dyn TaskExecutor>>,
    gateway: Arc<FakeGateway>,
    config: ProviderConfig,
    admin: AdminConfig,
) -> Harness {
    let net = FakeNet::new();
    let mut registry = ExecutorRegistry::new();
    for executor in executors {
        registry.register(executor);
    }
    let engine = Arc::new(Engine::new(
        config,
        Keys::generate(),
        Arc::clone(&net) as Arc<dyn RelayClient>,
        Arc::clone(&net) as Arc<dyn RelayConnector>,
        registry,
        gateway.clone() as Arc<dyn PaymentGateway>,
        Arc::new(SeenStore::in_memory(Duration::from_secs(3600))),
        admin,
    ));
    Harness {
        engine,
        net,
        gateway,
        requester: Keys::generate(),
    }
}

fn harness(executors: Vec<Arc<dyn TaskExecutor>>) -> Harness {
    harness_with(
        executors,
        FakeGateway::new(),
        fast_config(),
        AdminConfig::default(),
    )
}

impl Harness {
    fn job_request(&self, kind: u16, tags: Vec<Vec<String>>) -> Event {
        self.requester
            .sign(EventTemplate::new(unix_now(), kind, tags, String::new()))
            .unwrap()
    }

    fn text_job(&self, kind: u16) -> Event {
        self.job_request(
            kind,
            vec![vec!["i".into(), "hello worker".into(), "text".into()]],
        )
    }

    async fn deliver(&self, event: Event) {
        Arc::clone(&self.engine).handle_event(event).await;
    }

    /// Wait until a published event for `job_id` satisfies `predicate`.
    async fn wait_published<F: Fn(&Event) -> bool>(&self, job_id: &str, predicate: F) {
        for _ in 0..300 {
            if self.net.published_for(job_id).iter().any(&predicate) {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met for job {job_id}");
    }
}

fn status_of(event: &Event) -> Option<&str> {
    (event.kind == kinds::KIND_JOB_FEEDBACK)
        .then(|| event.tag_value("status"))
        .flatten()
}

fn is_result(event: &Event) -> bool {
    (6000..=6999).contains(&event.kind)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unsupported_kind_emits_exactly_one_error_feedback() {
    let h = harness(vec![Echo::free()]);
    let event = h.text_job(5000); // valid request kind, nothing registered for it
    let job_id = event.id.clone();

    h.deliver(event).await;
    h.engine.wait_for_jobs().await;

    let published = h.net.published_for(&job_id);
    assert_eq!(published.len(), 1);
    assert_eq!(status_of(&published[0]), Some("error"));
    assert!(!published.iter().any(is_result));
    assert_eq!(h.engine.job_state(&job_id).await, Some(JobState::Unsupported));
}

#[tokio::test]
async fn unsupported_input_is_rejected_with_feedback() {
    let h = harness(vec![Echo::free()]);
    // Echo requires at least one input.
    let event = h.job_request(5050, vec![]);
    let job_id = event.id.clone();

    h.deliver(event).await;
    h.engine.wait_for_jobs().await;

    let published = h.net.published_for(&job_id);
    assert_eq!(published.len(), 1);
    assert_eq!(status_of(&published[0]), Some("error"));
}

#[tokio::test]
async fn encrypted_request_to_plain_executor_is_unsupported() {
    let h = harness(vec![Echo::free()]);
    let event = h.job_request(
        5050,
        vec![
            vec!["i".into(), "hi".into(), "text".into()],
            vec!["encrypted".into()],
        ],
    );
    let job_id = event.id.clone();

    h.deliver(event).await;
    h.engine.wait_for_jobs().await;

    assert_eq!(h.engine.job_state(&job_id).await, Some(JobState::Unsupported));
}

#[tokio::test]
async fn free_job_reaches_processing_without_payment_required() {
    let h = harness(vec![Echo::free()]);
    let event = h.text_job(5050);
    let job_id = event.id.clone();

    h.deliver(event).await;
    h.engine.wait_for_jobs().await;

    let published = h.net.published_for(&job_id);
    let statuses: Vec<&str> = published.iter().filter_map(status_of).collect();
    assert_eq!(statuses, vec!["processing"]);
    assert!(!statuses.contains(&"payment-required"));

    let result = published.iter().find(|e| is_result(e)).expect("result");
    assert_eq!(result.kind, 6050);
    assert_eq!(result.content, "hello worker");
    assert_eq!(h.engine.job_state(&job_id).await, Some(JobState::Completed));
}

#[tokio::test]
async fn duplicate_delivery_is_idempotent() {
    let h = harness(vec![Echo::free()]);
    let event = h.text_job(5050);
    let job_id = event.id.clone();

    h.deliver(event.clone()).await;
    h.engine.wait_for_jobs().await;
    let first = h.net.published_for(&job_id).len();

    // Relay duplication: the same id arrives again.
    h.deliver(event).await;
    h.engine.wait_for_jobs().await;

    assert_eq!(h.net.published_for(&job_id).len(), first);
    assert_eq!(first, 2); // processing + result, published once
}

#[tokio::test]
async fn paid_job_settles_and_completes() {
    let h = harness(vec![Echo::paid(50)]);
    let event = h.text_job(5050);
    let job_id = event.id.clone();

    h.deliver(event).await;

    // payment-required with a 50-sat invoice (millisats on the wire)
    h.wait_published(&job_id, |e| status_of(e) == Some("payment-required"))
        .await;
    let published = h.net.published_for(&job_id);
    let payment_required = published
        .iter()
        .find(|e| status_of(e) == Some("payment-required"))
        .unwrap();
    let amount = payment_required
        .tags_named("amount")
        .next()
        .expect("amount tag");
    assert_eq!(amount[1], "50000");
    assert!(amount[2].starts_with("lnbc50"));

    h.gateway.settle_all();
    h.engine.wait_for_jobs().await;

    let published = h.net.published_for(&job_id);
    let statuses: Vec<&str> = published.iter().filter_map(status_of).collect();
    assert_eq!(statuses, vec!["payment-required", "processing"]);
    assert!(published.iter().any(is_result));
    assert_eq!(h.engine.job_state(&job_id).await, Some(JobState::Completed));
}

#[tokio::test]
async fn paid_job_expires_without_result() {
    let mut config = fast_config();
    config.payment_deadline = Duration::from_millis(100);
    let h = harness_with(
        vec![Echo::paid(50)],
        FakeGateway::new(),
        config,
        AdminConfig::default(),
    );
    let event = h.text_job(5050);
    let job_id = event.id.clone();

    h.deliver(event).await;
    h.engine.wait_for_jobs().await;

    let published = h.net.published_for(&job_id);
    let statuses: Vec<&str> = published.iter().filter_map(status_of).collect();
    assert_eq!(statuses, vec!["payment-required", "error"]);
    assert!(!published.iter().any(is_result));
    assert_eq!(h.engine.job_state(&job_id).await, Some(JobState::Failed));
}

#[tokio::test]
async fn gateway_failure_fails_the_job_with_feedback() {
    let h = harness_with(
        vec![Echo::paid(50)],
        FakeGateway::broken(),
        fast_config(),
        AdminConfig::default(),
    );
    let event = h.text_job(5050);
    let job_id = event.id.clone();

    h.deliver(event).await;
    h.engine.wait_for_jobs().await;

    let published = h.net.published_for(&job_id);
    assert_eq!(published.len(), 1);
    let feedback = &published[0];
    assert_eq!(status_of(feedback), Some("error"));
    let status_tag = feedback.tags_named("status").next().unwrap();
    assert!(status_tag[2].contains("unavailable"));
    assert_eq!(h.engine.job_state(&job_id).await, Some(JobState::Failed));
}

#[tokio::test]
async fn zap_receipt_short_circuits_settlement() {
    let mut config = fast_config();
    config.payment_deadline = Duration::from_secs(30);
    let h = harness_with(
        vec![Echo::paid(50)],
        FakeGateway::new(), // never settles on its own
        config,
        AdminConfig::default(),
    );
    let event = h.text_job(5050);
    let job_id = event.id.clone();

    h.deliver(event).await;
    h.wait_published(&job_id, |e| status_of(e) == Some("payment-required"))
        .await;

    // A value-transfer event referencing the job arrives on the network.
    let zap = Keys::generate()
        .sign(EventTemplate::new(
            unix_now(),
            kinds::KIND_ZAP_RECEIPT,
            vec![
                vec!["e".into(), job_id.clone()],
                vec!["p".into(), h.engine.public_key().to_string()],
            ],
            String::new(),
        ))
        .unwrap();
    h.deliver(zap).await;
    h.engine.wait_for_jobs().await;

    assert_eq!(h.engine.job_state(&job_id).await, Some(JobState::Completed));
}

#[tokio::test]
async fn execution_error_surfaces_as_error_feedback() {
    let h = harness(vec![Arc::new(Failing)]);
    let event = h.job_request(5051, vec![]);
    let job_id = event.id.clone();

    h.deliver(event).await;
    h.engine.wait_for_jobs().await;

    let published = h.net.published_for(&job_id);
    let error = published
        .iter()
        .find(|e| status_of(e) == Some("error"))
        .expect("error feedback");
    let status_tag = error.tags_named("status").next().unwrap();
    assert!(status_tag[2].contains("execution failed: boom"));
    assert!(!published.iter().any(is_result));
}

#[tokio::test]
async fn execution_past_the_soft_ceiling_times_out() {
    let h = harness(vec![Arc::new(Slow)]);
    let event = h.job_request(5052, vec![]);
    let job_id = event.id.clone();

    h.deliver(event).await;
    h.engine.wait_for_jobs().await;

    let published = h.net.published_for(&job_id);
    let error = published
        .iter()
        .find(|e| status_of(e) == Some("error"))
        .expect("error feedback");
    let status_tag = error.tags_named("status").next().unwrap();
    assert!(status_tag[2].contains("timed out"));
    assert_eq!(h.engine.job_state(&job_id).await, Some(JobState::Failed));
}

#[tokio::test]
async fn balance_credit_covers_cost_and_skips_invoicing() {
    let admin_keys = Keys::generate();
    let admin = AdminConfig {
        admin_pubkeys: vec![admin_keys.public_key().to_string()],
        ..AdminConfig::default()
    };
    let h = harness_with(vec![Echo::paid(50)], FakeGateway::new(), fast_config(), admin);

    let credit = admin_keys
        .sign(EventTemplate::new(
            unix_now(),
            kinds::KIND_ADMIN_COMMAND,
            vec![vec!["p".into(), h.engine.public_key().to_string()]],
            format!(
                r#"{{"command":"adjust_balance","pubkey":"{}","delta_sats":50}}"#,
                h.requester.public_key()
            ),
        ))
        .unwrap();
    h.deliver(credit).await;
    assert_eq!(
        h.engine
            .payment_gate()
            .balances()
            .balance(h.requester.public_key()),
        50
    );

    let event = h.text_job(5050);
    let job_id = event.id.clone();
    h.deliver(event).await;
    h.engine.wait_for_jobs().await;

    let statuses: Vec<String> = h
        .net
        .published_for(&job_id)
        .iter()
        .filter_map(|e| status_of(e).map(str::to_string))
        .collect();
    assert_eq!(statuses, vec!["processing"]); // no payment-required
    assert_eq!(h.engine.job_state(&job_id).await, Some(JobState::Completed));
    assert_eq!(
        h.engine
            .payment_gate()
            .balances()
            .balance(h.requester.public_key()),
        0
    );
}

#[tokio::test]
async fn unauthorized_admin_command_is_never_executed() {
    let h = harness(vec![Echo::free()]);
    let mallory = Keys::generate();

    let command = mallory
        .sign(EventTemplate::new(
            unix_now(),
            kinds::KIND_ADMIN_COMMAND,
            vec![],
            r#"{"command":"adjust_balance","pubkey":"victim","delta_sats":100000}"#.to_string(),
        ))
        .unwrap();
    h.deliver(command).await;

    assert_eq!(h.engine.payment_gate().balances().balance("victim"), 0);
    assert!(h.net.published().is_empty());
}

#[tokio::test]
async fn announcement_rebroadcast_is_admin_driven_and_idempotent() {
    let admin_keys = Keys::generate();
    let admin = AdminConfig {
        admin_pubkeys: vec![admin_keys.public_key().to_string()],
        ..AdminConfig::default()
    };
    let h = harness_with(vec![Echo::free()], FakeGateway::new(), fast_config(), admin);

    // Nothing announced implicitly.
    assert!(h.net.published().is_empty());

    let command = admin_keys
        .sign(EventTemplate::new(
            unix_now(),
            kinds::KIND_ADMIN_COMMAND,
            vec![],
            r#"{"command":"rebroadcast_announcement"}"#.to_string(),
        ))
        .unwrap();
    h.deliver(command.clone()).await;

    let announcements: Vec<Event> = h
        .net
        .published()
        .into_iter()
        .filter(|e| e.kind == kinds::KIND_ANNOUNCEMENT)
        .collect();
    assert_eq!(announcements.len(), 1);
    assert_eq!(announcements[0].tag_value("d"), Some("echo"));

    // Safe to repeat: same addressable identifier each time.
    let again = admin_keys
        .sign(EventTemplate::new(
            unix_now() + 1,
            kinds::KIND_ADMIN_COMMAND,
            vec![],
            r#"{"command":"rebroadcast_announcement"}"#.to_string(),
        ))
        .unwrap();
    h.deliver(again).await;
    let announcements: Vec<Event> = h
        .net
        .published()
        .into_iter()
        .filter(|e| e.kind == kinds::KIND_ANNOUNCEMENT)
        .collect();
    assert_eq!(announcements.len(), 2);
    assert_eq!(announcements[0].tag_value("d"), announcements[1].tag_value("d"));
}

#[tokio::test]
async fn startup_requires_executors() {
    let h = harness_with(
        vec![],
        FakeGateway::new(),
        fast_config(),
        AdminConfig::default(),
    );
    assert!(matches!(
        h.engine.startup().await,
        Err(EngineError::NoExecutors)
    ));
}

#[tokio::test]
async fn run_loop_processes_injected_events() {
    let h = harness(vec![Echo::free()]);
    let event = h.text_job(5050);
    let job_id = event.id.clone();

    let runner = tokio::spawn(Arc::clone(&h.engine).run());
    sleep(Duration::from_millis(50)).await; // let startup subscribe

    h.net.inject(event);
    h.wait_published(&job_id, is_result).await;

    runner.abort();
    h.engine.shutdown().await;
    assert_eq!(h.engine.job_state(&job_id).await, Some(JobState::Completed));
}

// ---------------------------------------------------------------------------
// End-to-end discovery scenario
// ---------------------------------------------------------------------------

#[tokio::test]
async fn inactive_follows_end_to_end() {
    let h = harness(vec![Arc::new(InactiveFollows::new())]);
    let now = unix_now();

    // The requester follows 45 identities...
    let follows: Vec<String> = (0..45).map(|i| format!("{i:064x}")).collect();
    let contact_tags: Vec<Vec<String>> = follows
        .iter()
        .map(|pk| vec!["p".to_string(), pk.clone()])
        .collect();
    let contact_list = h
        .requester
        .sign(EventTemplate::new(
            now - 500,
            kinds::KIND_CONTACTS,
            contact_tags,
            String::new(),
        ))
        .unwrap();
    h.net.add_stored(contact_list);

    // ...and 10 of them have posted within the window.
    for pk in follows.iter().take(10) {
        h.net.add_stored(Event {
            id: format!("note-{pk}"),
            pubkey: pk.clone(),
            created_at: now - 3600,
            kind: kinds::KIND_TEXT_NOTE,
            tags: vec![],
            content: "still here".into(),
            sig: String::new(),
        });
    }

    // Pre-credit the requester so the 50-sat fix cost is covered.
    h.engine
        .payment_gate()
        .balances()
        .credit(h.requester.public_key(), 50);

    let request = h.job_request(
        kinds::KIND_JOB_PEOPLE_DISCOVERY,
        vec![vec!["param".into(), "since_days".into(), "90".into()]],
    );
    let job_id = request.id.clone();
    h.deliver(request).await;
    h.engine.wait_for_jobs().await;

    // 45 identities at partition size 20 -> 3 chunk connections,
    // plus one for the contact-list fetch.
    assert_eq!(h.net.opened(), 4);

    let published = h.net.published_for(&job_id);
    let result = published.iter().find(|e| is_result(e)).expect("result");
    assert_eq!(result.kind, 6301);

    let tags: Vec<Vec<String>> = serde_json::from_str(&result.content).unwrap();
    assert_eq!(tags.len(), 35);
    let inactive: HashSet<&str> = tags.iter().map(|t| t[1].as_str()).collect();
    for pk in follows.iter().take(10) {
        assert!(!inactive.contains(pk.as_str()), "active identity listed");
    }
    for pk in follows.iter().skip(10) {
        assert!(inactive.contains(pk.as_str()), "inactive identity missing");
    }
    assert_eq!(h.engine.job_state(&job_id).await, Some(JobState::Completed));
}

#[tokio::test]
async fn inactive_follows_without_contact_list_fails_cleanly() {
    let h = harness(vec![Arc::new(InactiveFollows::new())]);
    h.engine
        .payment_gate()
        .balances()
        .credit(h.requester.public_key(), 50);

    let request = h.job_request(kinds::KIND_JOB_PEOPLE_DISCOVERY, vec![]);
    let job_id = request.id.clone();
    h.deliver(request).await;
    h.engine.wait_for_jobs().await;

    let published = h.net.published_for(&job_id);
    let error = published
        .iter()
        .find(|e| status_of(e) == Some("error"))
        .expect("error feedback");
    let status_tag = error.tags_named("status").next().unwrap();
    assert!(status_tag[2].contains("no contact list"));
    assert_eq!(h.engine.job_state(&job_id).await, Some(JobState::Failed));
}
