//! Relay client errors.

use thiserror::Error;

use crate::message::MessageError;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid relay url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("connection closed")]
    Closed,

    #[error("no configured relay was reachable")]
    NoRelaysReachable,

    #[error("no relay accepted the event")]
    AllRelaysRejected,

    #[error(transparent)]
    Message(#[from] MessageError),
}
