//! Inactive-follows discovery.
//!
//! Finds the identities a user follows that have published nothing within a
//! window. The follow list easily runs to hundreds or thousands of keys, so
//! the check fans out over the concurrent scan subsystem with one short-lived
//! relay connection per chunk.
//!
//! Params: `user` (defaults to the requester), `since_days` (default 90).
//! Output: a JSON list of `["p", <pubkey>]` tags, or mention lines when
//! `output=text/plain` is requested.

use async_trait::async_trait;

use dvm_protocol::{
    kinds, newest_event, parse_contact_list, unix_now, JobRequest, ParamSpec,
    ServiceAnnouncement,
};
use dvm_relay::Filter;

use crate::executor::{ExecutionContext, ExecutionError, TaskExecutor};
use crate::payment::CostModel;
use crate::scan::{scan_activity, ScanOptions};

const DEFAULT_SINCE_DAYS: u64 = 90;
const FIX_COST_SATS: u64 = 50;

pub struct InactiveFollows;

impl InactiveFollows {
    pub fn new() -> Self {
        Self
    }
}

impl Default for InactiveFollows {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskExecutor for InactiveFollows {
    fn kind(&self) -> u16 {
        kinds::KIND_JOB_PEOPLE_DISCOVERY
    }

    fn task(&self) -> &str {
        "inactive-follows"
    }

    fn cost(&self) -> CostModel {
        CostModel::fixed(FIX_COST_SATS)
    }

    fn announcement(&self) -> ServiceAnnouncement {
        ServiceAnnouncement::new("inactive-follows", self.kind(), "Inactive Follows")
            .with_about("Finds the people you follow who have gone quiet")
            .with_param(
                "user",
                ParamSpec {
                    required: false,
                    values: vec![],
                    description: "Run the discovery for another user".into(),
                },
            )
            .with_param(
                "since_days",
                ParamSpec {
                    required: false,
                    values: vec![],
                    description: "Days without activity before a follow counts as inactive"
                        .into(),
                },
            )
    }

    // No inputs needed; everything comes from params.
    fn is_input_supported(&self, _request: &JobRequest) -> bool {
        true
    }

    async fn process(
        &self,
        request: &JobRequest,
        ctx: &ExecutionContext,
    ) -> Result<String, ExecutionError> {
        let user = request.param("user").unwrap_or(&request.requester).to_string();
        let since_days: u64 = request
            .param("since_days")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SINCE_DAYS);

        // Newest contact list for the user.
        let client = ctx.connector.open(&ctx.relays).await?;
        let fetched = client
            .fetch(
                vec![Filter::new()
                    .author(user.clone())
                    .kind(kinds::KIND_CONTACTS)
                    .limit(1)],
                ctx.relay_timeout,
            )
            .await;
        client.disconnect().await;
        let contact_events = fetched?;

        let Some(contact_list) = newest_event(&contact_events) else {
            return Err(ExecutionError::failed(format!(
                "no contact list found for {user}"
            )));
        };
        let follows = parse_contact_list(contact_list)
            .map_err(|e| ExecutionError::failed(e.to_string()))?;

        // Relays may repeat p tags; scan each identity once, keeping order.
        let mut identities: Vec<String> = Vec::with_capacity(follows.len());
        let mut seen = std::collections::HashSet::new();
        for follow in follows {
            if seen.insert(follow.pubkey.clone()) {
                identities.push(follow.pubkey);
            }
        }
        if identities.is_empty() {
            return Ok("The contact list is empty.".to_string());
        }

        let since = unix_now().saturating_sub(since_days * 24 * 60 * 60);
        let activity = scan_activity(
            ctx.connector.clone(),
            ctx.relays.clone(),
            identities.clone(),
            since,
            ScanOptions {
                timeout: ctx.relay_timeout,
                ..ScanOptions::default()
            },
        )
        .await?;

        let inactive: Vec<Vec<String>> = identities
            .iter()
            .filter(|id| !activity.get(*id).copied().unwrap_or(false))
            .map(|id| vec!["p".to_string(), id.clone()])
            .collect();

        if inactive.is_empty() {
            return Ok("No inactive follows found on the configured relays.".to_string());
        }
        serde_json::to_string(&inactive).map_err(|e| ExecutionError::failed(e.to_string()))
    }

    /// Render the tag list as mention lines when plain text is requested.
    fn post_process(&self, raw: String, request: &JobRequest) -> String {
        if request.output.as_deref() != Some("text/plain") {
            return raw;
        }
        match serde_json::from_str::<Vec<Vec<String>>>(&raw) {
            Ok(tags) => tags
                .iter()
                .filter(|tag| tag.len() >= 2 && tag[0] == "p")
                .map(|tag| format!("nostr:{}", tag[1]))
                .collect::<Vec<_>>()
                .join("\n"),
            // Human-readable messages pass through untouched.
            Err(_) => raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvm_protocol::Event;

    fn request(tags: Vec<Vec<String>>) -> JobRequest {
        let event = Event {
            id: "aa".repeat(32),
            pubkey: "bb".repeat(32),
            created_at: 0,
            kind: kinds::KIND_JOB_PEOPLE_DISCOVERY,
            tags,
            content: String::new(),
            sig: String::new(),
        };
        JobRequest::from_event(&event).unwrap()
    }

    #[test]
    fn fixed_cost_is_fifty_sats() {
        let executor = InactiveFollows::new();
        assert_eq!(executor.cost().quote(executor.units(&request(vec![]))), 50);
    }

    #[test]
    fn post_process_renders_mentions_for_plain_text() {
        let executor = InactiveFollows::new();
        let request = request(vec![vec!["output".into(), "text/plain".into()]]);
        let raw = r#"[["p","abc"],["p","def"]]"#.to_string();
        assert_eq!(
            executor.post_process(raw, &request),
            "nostr:abc\nnostr:def"
        );
    }

    #[test]
    fn post_process_leaves_other_outputs_alone() {
        let executor = InactiveFollows::new();
        let raw = r#"[["p","abc"]]"#.to_string();
        assert_eq!(executor.post_process(raw.clone(), &request(vec![])), raw);
    }

    #[test]
    fn post_process_passes_messages_through() {
        let executor = InactiveFollows::new();
        let request = request(vec![vec!["output".into(), "text/plain".into()]]);
        let message = "No inactive follows found on the configured relays.".to_string();
        assert_eq!(executor.post_process(message.clone(), &request), message);
    }

    #[test]
    fn announcement_declares_params() {
        let announcement = InactiveFollows::new().announcement();
        assert_eq!(announcement.kind, kinds::KIND_JOB_PEOPLE_DISCOVERY);
        assert!(announcement.params.contains_key("user"));
        assert!(announcement.params.contains_key("since_days"));
    }
}
