//! Service announcements.
//!
//! A provider advertises each task it offers with an addressable event
//! (kind 31990) keyed by a stable `d` tag. The JSON content describes the
//! task and its accepted parameters so clients can discover and render it.
//! Announcements are republished only on explicit admin command.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::EventTemplate;
use crate::kinds::KIND_ANNOUNCEMENT;

/// Schema of one accepted parameter, as shown to clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// A discoverable description of one offered task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAnnouncement {
    /// Stable per-task identifier (the `d` tag)
    #[serde(skip)]
    pub identifier: String,
    /// Job request kind this task serves (the `k` tag)
    #[serde(skip)]
    pub kind: u16,

    pub name: String,
    pub about: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(rename = "encryptionSupported")]
    pub accepts_encrypted: bool,
    #[serde(rename = "lightningSupported")]
    pub accepts_lightning: bool,
    /// Accepted parameters, keyed by name (ordered for stable JSON)
    #[serde(rename = "nip90Params", default)]
    pub params: BTreeMap<String, ParamSpec>,
}

impl ServiceAnnouncement {
    pub fn new(identifier: impl Into<String>, kind: u16, name: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            kind,
            name: name.into(),
            about: String::new(),
            image: String::new(),
            accepts_encrypted: false,
            accepts_lightning: true,
            params: BTreeMap::new(),
        }
    }

    pub fn with_about(mut self, about: impl Into<String>) -> Self {
        self.about = about.into();
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn accepts_encrypted(mut self, yes: bool) -> Self {
        self.accepts_encrypted = yes;
        self
    }

    /// Declare an accepted parameter.
    pub fn with_param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.params.insert(name.into(), spec);
        self
    }

    /// Produce the unsigned announcement event.
    ///
    /// The result is addressable: relays keep only the newest event per
    /// author and `d` tag, so republishing is idempotent.
    pub fn to_template(&self, created_at: u64) -> EventTemplate {
        let tags = vec![
            vec!["d".to_string(), self.identifier.clone()],
            vec!["k".to_string(), self.kind.to_string()],
        ];
        // Serialization of the struct fields cannot fail.
        let content = serde_json::to_string(self).unwrap_or_default();
        EventTemplate::new(created_at, KIND_ANNOUNCEMENT, tags, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_has_stable_identifier() {
        let announcement = ServiceAnnouncement::new("inactive_follows", 5301, "Bygones")
            .with_about("Finds follows that have gone quiet")
            .with_param(
                "since_days",
                ParamSpec {
                    required: false,
                    values: vec![],
                    description: "Days without activity to count as inactive".into(),
                },
            );

        let template = announcement.to_template(1_700_000_000);
        assert_eq!(template.kind, KIND_ANNOUNCEMENT);
        assert!(template
            .tags
            .iter()
            .any(|t| t[0] == "d" && t[1] == "inactive_follows"));
        assert!(template.tags.iter().any(|t| t[0] == "k" && t[1] == "5301"));

        let content: serde_json::Value = serde_json::from_str(&template.content).unwrap();
        assert_eq!(content["name"], "Bygones");
        assert_eq!(content["lightningSupported"], true);
        assert!(content["nip90Params"]["since_days"].is_object());
    }

    #[test]
    fn identifier_stays_out_of_content() {
        let template =
            ServiceAnnouncement::new("ident", 5300, "X").to_template(1_700_000_000);
        let content: serde_json::Value = serde_json::from_str(&template.content).unwrap();
        assert!(content.get("identifier").is_none());
    }
}
