//! NIP-01 relay protocol frames.
//!
//! Client → relay: `["EVENT", <event>]`, `["REQ", <sub>, <filter>...]`,
//! `["CLOSE", <sub>]`. Relay → client: `EVENT`, `OK`, `EOSE`, `NOTICE`,
//! `CLOSED`. Frames this provider has no use for are surfaced as
//! [`MessageError::Unknown`] and skipped by callers.

use dvm_protocol::Event;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unknown frame type: {0}")]
    Unknown(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Frames sent to a relay.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Event(Event),
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    Close {
        subscription_id: String,
    },
}

impl ClientMessage {
    pub fn to_json(&self) -> std::result::Result<String, MessageError> {
        let frame = match self {
            ClientMessage::Event(event) => json!(["EVENT", event]),
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut frame = vec![json!("REQ"), json!(subscription_id)];
                for filter in filters {
                    frame.push(serde_json::to_value(filter)?);
                }
                Value::Array(frame)
            }
            ClientMessage::Close { subscription_id } => json!(["CLOSE", subscription_id]),
        };
        Ok(frame.to_string())
    }
}

/// Frames received from a relay.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    Event {
        subscription_id: String,
        event: Event,
    },
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    Eose {
        subscription_id: String,
    },
    Notice {
        message: String,
    },
    Closed {
        subscription_id: String,
        message: String,
    },
}

impl RelayMessage {
    pub fn from_json(raw: &str) -> std::result::Result<Self, MessageError> {
        let frame: Vec<Value> = serde_json::from_str(raw)?;
        let kind = frame
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| MessageError::Malformed("missing frame type".into()))?;

        match kind {
            "EVENT" => Ok(RelayMessage::Event {
                subscription_id: str_at(&frame, 1)?,
                event: serde_json::from_value(
                    frame
                        .get(2)
                        .cloned()
                        .ok_or_else(|| MessageError::Malformed("missing event".into()))?,
                )?,
            }),
            "OK" => Ok(RelayMessage::Ok {
                event_id: str_at(&frame, 1)?,
                accepted: frame
                    .get(2)
                    .and_then(Value::as_bool)
                    .ok_or_else(|| MessageError::Malformed("OK flag not a bool".into()))?,
                message: frame
                    .get(3)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            "EOSE" => Ok(RelayMessage::Eose {
                subscription_id: str_at(&frame, 1)?,
            }),
            "NOTICE" => Ok(RelayMessage::Notice {
                message: str_at(&frame, 1)?,
            }),
            "CLOSED" => Ok(RelayMessage::Closed {
                subscription_id: str_at(&frame, 1)?,
                message: frame
                    .get(2)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            other => Err(MessageError::Unknown(other.to_string())),
        }
    }
}

fn str_at(frame: &[Value], index: usize) -> std::result::Result<String, MessageError> {
    frame
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| MessageError::Malformed(format!("field {index} is not a string")))
}

/// Subscription filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Tag queries, keyed as `#<letter>`
    #[serde(flatten, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, Vec<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn author(mut self, pubkey: impl Into<String>) -> Self {
        self.authors.get_or_insert_with(Vec::new).push(pubkey.into());
        self
    }

    pub fn kind(mut self, kind: u16) -> Self {
        self.kinds.get_or_insert_with(Vec::new).push(kind);
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds.get_or_insert_with(Vec::new).extend(kinds);
        self
    }

    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = Some(timestamp);
        self
    }

    pub fn until(mut self, timestamp: u64) -> Self {
        self.until = Some(timestamp);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Add a `#<letter>` tag query.
    pub fn tag(mut self, letter: char, value: impl Into<String>) -> Self {
        self.tags
            .entry(format!("#{letter}"))
            .or_default()
            .push(value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event_json() -> &'static str {
        r#"{"id":"abc","pubkey":"def","created_at":10,"kind":1,"tags":[],"content":"hi","sig":"00"}"#
    }

    #[test]
    fn req_frame_shape() {
        let msg = ClientMessage::Req {
            subscription_id: "sub1".into(),
            filters: vec![Filter::new().kind(5301).limit(1)],
        };
        let json = msg.to_json().unwrap();
        assert!(json.starts_with(r#"["REQ","sub1","#));
        assert!(json.contains(r#""kinds":[5301]"#));
        assert!(json.contains(r#""limit":1"#));
    }

    #[test]
    fn close_frame_shape() {
        let msg = ClientMessage::Close {
            subscription_id: "sub1".into(),
        };
        assert_eq!(msg.to_json().unwrap(), r#"["CLOSE","sub1"]"#);
    }

    #[test]
    fn event_frame_roundtrip() {
        let raw = format!(r#"["EVENT","sub1",{}]"#, sample_event_json());
        match RelayMessage::from_json(&raw).unwrap() {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                assert_eq!(subscription_id, "sub1");
                assert_eq!(event.id, "abc");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn ok_frame() {
        match RelayMessage::from_json(r#"["OK","abc",false,"blocked: spam"]"#).unwrap() {
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => {
                assert_eq!(event_id, "abc");
                assert!(!accepted);
                assert!(message.contains("spam"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn eose_and_notice() {
        assert!(matches!(
            RelayMessage::from_json(r#"["EOSE","s"]"#).unwrap(),
            RelayMessage::Eose { .. }
        ));
        assert!(matches!(
            RelayMessage::from_json(r#"["NOTICE","slow down"]"#).unwrap(),
            RelayMessage::Notice { .. }
        ));
    }

    #[test]
    fn unknown_frames_are_errors_not_panics() {
        assert!(matches!(
            RelayMessage::from_json(r#"["AUTH","challenge"]"#),
            Err(MessageError::Unknown(_))
        ));
        assert!(RelayMessage::from_json("[]").is_err());
        assert!(RelayMessage::from_json("garbage").is_err());
    }

    #[test]
    fn filter_serialization_omits_unset_fields() {
        let filter = Filter::new().author("abc").since(100).limit(1);
        let json = serde_json::to_string(&filter).unwrap();
        assert!(json.contains(r#""authors":["abc"]"#));
        assert!(json.contains(r#""since":100"#));
        assert!(!json.contains("until"));
        assert!(!json.contains("ids"));
    }

    #[test]
    fn filter_tag_queries() {
        let filter = Filter::new().kind(9735).tag('p', "ourkey");
        let json = serde_json::to_string(&filter).unwrap();
        assert!(json.contains(r##""#p":["ourkey"]"##));
    }
}
