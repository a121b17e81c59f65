//! Contact list (kind 3) parsing.
//!
//! Discovery tasks need the set of identities a user follows: each `p` tag
//! of the newest kind-3 event, with its optional relay hint.

use thiserror::Error;

use crate::event::Event;
use crate::kinds::KIND_CONTACTS;

#[derive(Debug, Error)]
pub enum ContactsError {
    #[error("expected kind {KIND_CONTACTS}, got {0}")]
    WrongKind(u16),
}

/// One followed identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Follow {
    pub pubkey: String,
    pub relay: Option<String>,
}

/// Extract follows from a contact-list event, in tag order.
///
/// Tags that are not well-formed `p` entries are skipped.
pub fn parse_contact_list(event: &Event) -> Result<Vec<Follow>, ContactsError> {
    if event.kind != KIND_CONTACTS {
        return Err(ContactsError::WrongKind(event.kind));
    }

    Ok(event
        .tags_named("p")
        .filter(|t| t.len() >= 2 && !t[1].is_empty())
        .map(|t| Follow {
            pubkey: t[1].clone(),
            relay: t.get(2).filter(|s| !s.is_empty()).cloned(),
        })
        .collect())
}

/// The newest event of a fetched set, by `created_at`.
///
/// Relays may return several historical copies of a replaceable event; only
/// the latest one is authoritative.
pub fn newest_event(events: &[Event]) -> Option<&Event> {
    events.iter().max_by_key(|e| e.created_at)
}
