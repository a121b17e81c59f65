//! Job envelope codec.
//!
//! Parses inbound job-request events into a typed [`JobRequest`] and builds
//! the outbound direction: [`JobResult`] payloads and [`JobFeedback`] status
//! events. Parsing is lenient about tag shapes it does not recognize — an
//! unknown tag is skipped, never fatal — but strict about the envelope
//! itself (kind range, id, author).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::{Event, EventTemplate};
use crate::kinds::{self, KIND_JOB_FEEDBACK};

/// Errors raised while parsing an inbound job request.
///
/// A parse failure means no valid job id could be extracted; the event is
/// dropped and no feedback is possible.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("kind {0} is not a job request")]
    NotAJobRequest(u16),

    #[error("malformed event id: {0}")]
    InvalidId(String),

    #[error("malformed requester key: {0}")]
    InvalidRequester(String),
}

/// How a job input should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    /// Literal text
    Text,
    /// URL to fetch
    Url,
    /// Referenced network event
    Event,
    /// Output of a previous job
    Job,
}

impl InputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputKind::Text => "text",
            InputKind::Url => "url",
            InputKind::Event => "event",
            InputKind::Job => "job",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Some(InputKind::Text),
            "url" => Some(InputKind::Url),
            "event" => Some(InputKind::Event),
            "job" => Some(InputKind::Job),
            _ => None,
        }
    }
}

/// A typed input reference from an `i` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInput {
    pub data: String,
    pub kind: InputKind,
    /// Relay hint for event/job references
    pub relay: Option<String>,
    /// Marker distinguishing how the input is used
    pub marker: Option<String>,
}

/// One occurrence of a named parameter from a `param` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParam {
    pub name: String,
    pub value: String,
}

/// A validated inbound job request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    /// Content address of the originating event; unique per engine run
    pub id: String,
    /// Public key of the requester
    pub requester: String,
    /// Task-type selector (5000-5999)
    pub kind: u16,
    /// Parameters in arrival order; repeats are preserved, not overwritten
    pub params: Vec<JobParam>,
    /// Ordered input references
    pub inputs: Vec<JobInput>,
    /// Requested output format, if any
    pub output: Option<String>,
    /// Amount the requester is willing to pay, in sats
    pub bid_sats: Option<u64>,
    /// Whether the request payload is encrypted
    pub encrypted: bool,
}

impl JobRequest {
    /// Parse a raw event into a typed request.
    pub fn from_event(event: &Event) -> Result<Self, ParseError> {
        if !kinds::is_job_request_kind(event.kind) {
            return Err(ParseError::NotAJobRequest(event.kind));
        }
        if !is_hex_of_len(&event.id, 64) {
            return Err(ParseError::InvalidId(event.id.clone()));
        }
        if !is_hex_of_len(&event.pubkey, 64) {
            return Err(ParseError::InvalidRequester(event.pubkey.clone()));
        }

        let mut request = Self {
            id: event.id.clone(),
            requester: event.pubkey.clone(),
            kind: event.kind,
            params: Vec::new(),
            inputs: Vec::new(),
            output: None,
            bid_sats: None,
            encrypted: false,
        };

        for tag in &event.tags {
            match tag.first().map(String::as_str) {
                Some("param") if tag.len() >= 3 => {
                    // ["param", name, value...] — each trailing value is one
                    // occurrence, kept in arrival order.
                    for value in &tag[2..] {
                        request.params.push(JobParam {
                            name: tag[1].clone(),
                            value: value.clone(),
                        });
                    }
                }
                Some("i") if tag.len() >= 3 => {
                    let Some(kind) = InputKind::parse(&tag[2]) else {
                        continue;
                    };
                    request.inputs.push(JobInput {
                        data: tag[1].clone(),
                        kind,
                        relay: tag.get(3).filter(|s| !s.is_empty()).cloned(),
                        marker: tag.get(4).filter(|s| !s.is_empty()).cloned(),
                    });
                }
                Some("output") if tag.len() >= 2 => {
                    request.output = Some(tag[1].clone());
                }
                Some("bid") if tag.len() >= 2 => {
                    request.bid_sats = tag[1].parse().ok();
                }
                Some("encrypted") => {
                    request.encrypted = true;
                }
                // Unknown or short tags are ignored, not fatal.
                _ => {}
            }
        }

        Ok(request)
    }

    /// First occurrence of a parameter, the scalar read policy.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// All occurrences of a parameter, in arrival order.
    pub fn param_values(&self, name: &str) -> Vec<&str> {
        self.params
            .iter()
            .filter(|p| p.name == name)
            .map(|p| p.value.as_str())
            .collect()
    }

    /// The result kind paired with this request.
    pub fn result_kind(&self) -> u16 {
        self.kind + 1000
    }
}

/// Builder for an outbound result event.
#[derive(Debug, Clone)]
pub struct JobResult {
    request_id: String,
    requester: String,
    result_kind: u16,
    payload: String,
    amount_sats: Option<u64>,
    bolt11: Option<String>,
}

impl JobResult {
    /// Build a result for `request` carrying `payload`.
    pub fn for_request(request: &JobRequest, payload: impl Into<String>) -> Self {
        Self {
            request_id: request.id.clone(),
            requester: request.requester.clone(),
            result_kind: request.result_kind(),
            payload: payload.into(),
            amount_sats: None,
            bolt11: None,
        }
    }

    /// Attach the amount owed (sats) and an optional invoice.
    pub fn with_amount(mut self, amount_sats: u64, bolt11: Option<String>) -> Self {
        self.amount_sats = Some(amount_sats);
        self.bolt11 = bolt11;
        self
    }

    /// Produce the unsigned wire event.
    pub fn to_template(&self, created_at: u64) -> EventTemplate {
        let mut tags = vec![
            vec!["e".to_string(), self.request_id.clone()],
            vec!["p".to_string(), self.requester.clone()],
        ];
        if let Some(amount) = self.amount_sats {
            tags.push(amount_tag(amount, self.bolt11.as_deref()));
        }
        EventTemplate::new(created_at, self.result_kind, tags, self.payload.clone())
    }
}

/// Status vocabulary for feedback events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedbackStatus {
    PaymentRequired,
    Processing,
    Error,
    Success,
}

impl FeedbackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackStatus::PaymentRequired => "payment-required",
            FeedbackStatus::Processing => "processing",
            FeedbackStatus::Error => "error",
            FeedbackStatus::Success => "success",
        }
    }
}

/// Builder for an outbound feedback event (kind 7000).
#[derive(Debug, Clone)]
pub struct JobFeedback {
    request_id: String,
    requester: String,
    status: FeedbackStatus,
    detail: Option<String>,
    amount_sats: Option<u64>,
    bolt11: Option<String>,
}

impl JobFeedback {
    pub fn for_request(request: &JobRequest, status: FeedbackStatus) -> Self {
        Self {
            request_id: request.id.clone(),
            requester: request.requester.clone(),
            status,
            detail: None,
            amount_sats: None,
            bolt11: None,
        }
    }

    /// Human-readable detail appended to the status tag.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach the amount due (sats) and an optional invoice; used with
    /// [`FeedbackStatus::PaymentRequired`].
    pub fn with_amount(mut self, amount_sats: u64, bolt11: Option<String>) -> Self {
        self.amount_sats = Some(amount_sats);
        self.bolt11 = bolt11;
        self
    }

    /// Produce the unsigned wire event.
    pub fn to_template(&self, created_at: u64) -> EventTemplate {
        let mut status_tag = vec!["status".to_string(), self.status.as_str().to_string()];
        if let Some(detail) = &self.detail {
            status_tag.push(detail.clone());
        }

        let mut tags = vec![
            status_tag,
            vec!["e".to_string(), self.request_id.clone()],
            vec!["p".to_string(), self.requester.clone()],
        ];
        if let Some(amount) = self.amount_sats {
            tags.push(amount_tag(amount, self.bolt11.as_deref()));
        }
        EventTemplate::new(created_at, KIND_JOB_FEEDBACK, tags, String::new())
    }
}

/// `amount` tags carry millisats on the wire.
fn amount_tag(amount_sats: u64, bolt11: Option<&str>) -> Vec<String> {
    let mut tag = vec!["amount".to_string(), (amount_sats * 1000).to_string()];
    if let Some(bolt11) = bolt11 {
        tag.push(bolt11.to_string());
    }
    tag
}

fn is_hex_of_len(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit())
}
