//! Wire types and codecs for the NIP-90 job marketplace protocol.
//!
//! This crate covers the protocol surface a service provider needs:
//! - Signed events: structure, canonical serialization, schnorr signing
//! - Kind registry for job requests, results, and feedback
//! - Job envelope codec: typed `JobRequest` parsing plus result/feedback
//!   builders (the inverse direction)
//! - NIP-89-style service announcements
//! - Contact list (kind 3) parsing for discovery tasks
//!
//! Raw tag arrays never escape this crate: inbound events are parsed into
//! strongly-typed values at the boundary.

mod announcement;
mod contacts;
mod envelope;
mod event;
pub mod kinds;

pub use announcement::{ParamSpec, ServiceAnnouncement};
pub use contacts::{newest_event, parse_contact_list, ContactsError, Follow};
pub use envelope::{
    FeedbackStatus, InputKind, JobFeedback, JobInput, JobParam, JobRequest, JobResult, ParseError,
};
pub use event::{unix_now, Event, EventError, EventTemplate, Keys};
