//! Relay network client.
//!
//! The transport layer under the job engine:
//! - NIP-01 client/relay frames and subscription filters
//! - [`RelayClient`]: the trait boundary the engine consumes (publish,
//!   bounded fetch, live subscriptions)
//! - [`RelayConnection`]: one websocket to one relay
//! - [`RelayPool`]: a `RelayClient` over the configured relay list that
//!   tolerates individual relays being slow or unreachable
//! - [`RelayConnector`]: factory for the independent short-lived connections
//!   the concurrent scan subsystem opens per chunk worker
//!
//! Delivery is at-least-once with possible duplicates; consumers dedup by
//! event id.

mod client;
mod connection;
mod connector;
mod error;
mod message;
mod pool;

pub use client::RelayClient;
pub use connection::RelayConnection;
pub use connector::{RelayConnector, WsConnector};
pub use error::{RelayError, Result};
pub use message::{ClientMessage, Filter, MessageError, RelayMessage};
pub use pool::RelayPool;

/// Generate a fresh subscription id.
pub fn subscription_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}
