//! Payment gate.
//!
//! Quotes a job from the executor's cost model, requests invoices from the
//! configured Lightning gateway, and observes settlement asynchronously —
//! either by polling the gateway or by being nudged when a value-transfer
//! event referencing the job shows up on the network. Zero-cost quotes skip
//! the gate entirely; the engine never blocks other jobs on a settlement
//! wait.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Errors from the payment gateway boundary.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),

    #[error("payment gateway rejected the request: {0}")]
    Rejected(String),
}

/// Fixed plus per-unit pricing for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostModel {
    pub fix_sats: u64,
    pub per_unit_sats: u64,
}

impl CostModel {
    pub const FREE: CostModel = CostModel {
        fix_sats: 0,
        per_unit_sats: 0,
    };

    pub fn fixed(fix_sats: u64) -> Self {
        Self {
            fix_sats,
            per_unit_sats: 0,
        }
    }

    /// Total price for `units` units of work.
    pub fn quote(&self, units: u64) -> u64 {
        self.fix_sats + self.per_unit_sats * units
    }
}

/// An invoice issued by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub payment_hash: String,
    pub bolt11: String,
    pub amount_sats: u64,
}

/// The Lightning gateway boundary.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_invoice(&self, amount_sats: u64, memo: &str)
        -> Result<Invoice, GatewayError>;

    async fn check_settlement(&self, invoice: &Invoice) -> Result<bool, GatewayError>;
}

/// Stand-in gateway for providers that run without payment configuration;
/// every paid job fails loudly instead of hanging.
pub struct NoGateway;

#[async_trait]
impl PaymentGateway for NoGateway {
    async fn create_invoice(
        &self,
        _amount_sats: u64,
        _memo: &str,
    ) -> Result<Invoice, GatewayError> {
        Err(GatewayError::Unavailable(
            "no payment gateway configured".into(),
        ))
    }

    async fn check_settlement(&self, _invoice: &Invoice) -> Result<bool, GatewayError> {
        Err(GatewayError::Unavailable(
            "no payment gateway configured".into(),
        ))
    }
}

#[derive(Serialize)]
struct LnBitsCreateInvoice<'a> {
    out: bool,
    amount: u64,
    memo: &'a str,
    unit: &'a str,
}

#[derive(Deserialize)]
struct LnBitsInvoiceResponse {
    payment_hash: String,
    payment_request: String,
}

#[derive(Deserialize)]
struct LnBitsPaymentStatus {
    paid: bool,
}

/// LNbits-style REST gateway.
pub struct LnBitsGateway {
    http: reqwest::Client,
    base_url: String,
    invoice_key: String,
}

impl LnBitsGateway {
    pub fn new(
        base_url: impl Into<String>,
        invoice_key: impl Into<String>,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            invoice_key: invoice_key.into(),
        })
    }
}

#[async_trait]
impl PaymentGateway for LnBitsGateway {
    async fn create_invoice(
        &self,
        amount_sats: u64,
        memo: &str,
    ) -> Result<Invoice, GatewayError> {
        let url = format!("{}/api/v1/payments", self.base_url);
        let body = LnBitsCreateInvoice {
            out: false,
            amount: amount_sats,
            memo,
            unit: "sat",
        };
        let response = self
            .http
            .post(&url)
            .header("X-Api-Key", &self.invoice_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::Rejected(format!(
                "invoice request returned {}",
                response.status()
            )));
        }
        let parsed: LnBitsInvoiceResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        Ok(Invoice {
            payment_hash: parsed.payment_hash,
            bolt11: parsed.payment_request,
            amount_sats,
        })
    }

    async fn check_settlement(&self, invoice: &Invoice) -> Result<bool, GatewayError> {
        let url = format!(
            "{}/api/v1/payments/{}",
            self.base_url, invoice.payment_hash
        );
        let response = self
            .http
            .get(&url)
            .header("X-Api-Key", &self.invoice_key)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GatewayError::Unavailable(format!(
                "settlement check returned {}",
                response.status()
            )));
        }
        let status: LnBitsPaymentStatus = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        Ok(status.paid)
    }
}

/// Outcome of a settlement wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Settled,
    Expired,
}

/// Bookkeeping for one outstanding invoice. Owned exclusively by the gate.
#[derive(Debug, Clone)]
pub struct PaymentRecord {
    pub job_id: String,
    pub invoice: Invoice,
    pub deadline: DateTime<Utc>,
    pub settled: bool,
}

/// Per-requester sat credits, adjustable through the admin surface.
///
/// A requester whose balance covers a quote skips invoicing entirely.
#[derive(Default)]
pub struct BalanceLedger {
    balances: StdMutex<HashMap<String, i64>>,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, pubkey: &str) -> i64 {
        self.balances
            .lock()
            .expect("balance lock poisoned")
            .get(pubkey)
            .copied()
            .unwrap_or(0)
    }

    pub fn credit(&self, pubkey: &str, delta_sats: i64) -> i64 {
        let mut balances = self.balances.lock().expect("balance lock poisoned");
        let balance = balances.entry(pubkey.to_string()).or_insert(0);
        *balance += delta_sats;
        *balance
    }

    /// Debit `amount_sats` if the balance covers it.
    pub fn try_debit(&self, pubkey: &str, amount_sats: u64) -> bool {
        let mut balances = self.balances.lock().expect("balance lock poisoned");
        let balance = balances.entry(pubkey.to_string()).or_insert(0);
        if *balance >= amount_sats as i64 {
            *balance -= amount_sats as i64;
            true
        } else {
            false
        }
    }
}

/// The payment gate: invoicing, settlement observation, credit handling.
pub struct PaymentGate {
    gateway: Arc<dyn PaymentGateway>,
    poll_interval: Duration,
    deadline: Duration,
    retry_backoff: Duration,
    records: Mutex<HashMap<String, PaymentRecord>>,
    balances: BalanceLedger,
}

const INVOICE_ATTEMPTS: u32 = 3;

impl PaymentGate {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        poll_interval: Duration,
        deadline: Duration,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            gateway,
            poll_interval,
            deadline,
            retry_backoff,
            records: Mutex::new(HashMap::new()),
            balances: BalanceLedger::new(),
        }
    }

    pub fn balances(&self) -> &BalanceLedger {
        &self.balances
    }

    /// Request an invoice, retrying transient gateway failures a bounded
    /// number of times with backoff. The final failure is surfaced, not
    /// swallowed.
    pub async fn request_invoice(
        &self,
        job_id: &str,
        amount_sats: u64,
        memo: &str,
    ) -> Result<Invoice, GatewayError> {
        let mut last_error = GatewayError::Unavailable("no attempt made".into());
        for attempt in 1..=INVOICE_ATTEMPTS {
            match self.gateway.create_invoice(amount_sats, memo).await {
                Ok(invoice) => {
                    info!(job = %job_id, amount_sats, "invoice created");
                    let record = PaymentRecord {
                        job_id: job_id.to_string(),
                        invoice: invoice.clone(),
                        deadline: Utc::now()
                            + chrono::Duration::from_std(self.deadline)
                                .unwrap_or_else(|_| chrono::Duration::minutes(15)),
                        settled: false,
                    };
                    self.records
                        .lock()
                        .await
                        .insert(job_id.to_string(), record);
                    return Ok(invoice);
                }
                Err(e) => {
                    warn!(job = %job_id, attempt, "invoice creation failed: {e}");
                    last_error = e;
                    if attempt < INVOICE_ATTEMPTS {
                        sleep(self.retry_backoff * attempt).await;
                    }
                }
            }
        }
        Err(last_error)
    }

    /// Wait for settlement of `job_id`'s invoice until the deadline.
    ///
    /// Resolves early when `observed` fires (a value-transfer event for the
    /// job was seen on the network). Poll errors are logged and retried on
    /// the next tick; only the deadline ends the wait.
    pub async fn await_settlement(&self, job_id: &str, observed: Arc<Notify>) -> Settlement {
        let invoice = {
            let records = self.records.lock().await;
            records.get(job_id).map(|r| r.invoice.clone())
        };
        let Some(invoice) = invoice else {
            // No record means nothing to wait for.
            return Settlement::Expired;
        };

        let outcome = timeout(self.deadline, async {
            loop {
                tokio::select! {
                    _ = observed.notified() => {
                        debug!(job = %job_id, "settlement observed on network");
                        return;
                    }
                    _ = sleep(self.poll_interval) => {
                        match self.gateway.check_settlement(&invoice).await {
                            Ok(true) => return,
                            Ok(false) => {}
                            Err(e) => debug!(job = %job_id, "settlement check failed: {e}"),
                        }
                    }
                }
            }
        })
        .await;

        let mut records = self.records.lock().await;
        match outcome {
            Ok(()) => {
                if let Some(record) = records.get_mut(job_id) {
                    record.settled = true;
                }
                Settlement::Settled
            }
            Err(_) => {
                // Deadline passed; the record is dead weight now.
                records.remove(job_id);
                Settlement::Expired
            }
        }
    }

    /// Drop the record for a terminated job.
    pub async fn finish(&self, job_id: &str) {
        self.records.lock().await.remove(job_id);
    }

    /// Number of outstanding records (for introspection and tests).
    pub async fn outstanding(&self) -> usize {
        self.records.lock().await.len()
    }
}
