//! Provider configuration.
//!
//! One [`ProviderConfig`] per worker identity, immutable after construction
//! and shared read-only by every component of the engine.

use std::env;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {name}: {reason}")]
    InvalidVar { name: &'static str, reason: String },
}

/// Worker identity and operating parameters.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Hex secret key of the worker identity
    pub secret_key: String,
    /// Relays the provider listens and publishes on
    pub relays: Vec<String>,
    /// LNbits-style gateway endpoint, if payments are configured
    pub lnbits_url: Option<String>,
    /// Invoice key for the gateway
    pub lnbits_invoice_key: Option<String>,
    /// Bounded wait for relay queries
    pub relay_timeout: Duration,
    /// How long a requester has to settle an invoice
    pub payment_deadline: Duration,
    /// Interval between settlement checks against the gateway
    pub settlement_poll: Duration,
    /// Base backoff between invoice-creation retries
    pub gateway_retry_backoff: Duration,
    /// Soft ceiling on task execution; `None` leaves tasks unbounded
    pub execution_ceiling: Option<Duration>,
    /// How long terminal jobs stay in the ledger for duplicate suppression
    pub job_retention: Duration,
}

impl ProviderConfig {
    /// A config with the stock timeouts.
    pub fn new(secret_key: impl Into<String>, relays: Vec<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            relays,
            lnbits_url: None,
            lnbits_invoice_key: None,
            relay_timeout: Duration::from_secs(10),
            payment_deadline: Duration::from_secs(15 * 60),
            settlement_poll: Duration::from_secs(5),
            gateway_retry_backoff: Duration::from_secs(1),
            execution_ceiling: Some(Duration::from_secs(10 * 60)),
            job_retention: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Build from the environment.
    ///
    /// `DVM_SECRET_KEY` and `DVM_RELAYS` (comma separated) are required;
    /// `LNBITS_URL`/`LNBITS_INVOICE_KEY` enable the payment gateway; the
    /// timeout knobs fall back to the stock values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret_key =
            env::var("DVM_SECRET_KEY").map_err(|_| ConfigError::MissingVar("DVM_SECRET_KEY"))?;
        let relays: Vec<String> = env::var("DVM_RELAYS")
            .map_err(|_| ConfigError::MissingVar("DVM_RELAYS"))?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if relays.is_empty() {
            return Err(ConfigError::InvalidVar {
                name: "DVM_RELAYS",
                reason: "no relay urls given".into(),
            });
        }

        let mut config = Self::new(secret_key, relays);
        config.lnbits_url = env::var("LNBITS_URL").ok().filter(|s| !s.is_empty());
        config.lnbits_invoice_key = env::var("LNBITS_INVOICE_KEY")
            .ok()
            .filter(|s| !s.is_empty());

        if let Some(secs) = read_secs("DVM_RELAY_TIMEOUT_SECS")? {
            config.relay_timeout = secs;
        }
        if let Some(secs) = read_secs("DVM_PAYMENT_DEADLINE_SECS")? {
            config.payment_deadline = secs;
        }
        if let Some(secs) = read_secs("DVM_SETTLEMENT_POLL_SECS")? {
            config.settlement_poll = secs;
        }
        if let Some(secs) = read_secs("DVM_EXECUTION_CEILING_SECS")? {
            // 0 disables the ceiling entirely.
            config.execution_ceiling = (!secs.is_zero()).then_some(secs);
        }

        Ok(config)
    }
}

fn read_secs(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|e| ConfigError::InvalidVar {
                name,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
