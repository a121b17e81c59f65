//! The client trait the engine consumes.

use std::time::Duration;

use async_trait::async_trait;
use dvm_protocol::Event;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::message::Filter;

/// A connection (or pool of connections) to the relay network.
///
/// Implementations must tolerate individual relays being slow, unreachable,
/// or returning duplicate events. Delivery is at-least-once; callers dedup
/// by event id.
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Publish a signed event. Returns how many relays accepted it; errors
    /// only when none did.
    async fn publish(&self, event: Event) -> Result<usize>;

    /// One-shot bounded query: collect stored events matching `filters`
    /// until every reachable relay reports end-of-stored-events or `wait`
    /// elapses, whichever comes first.
    async fn fetch(&self, filters: Vec<Filter>, wait: Duration) -> Result<Vec<Event>>;

    /// Open a standing subscription; matching events arrive on
    /// [`RelayClient::events`]. Returns the subscription id.
    async fn subscribe(&self, filters: Vec<Filter>) -> Result<String>;

    /// The live event stream shared by all standing subscriptions.
    fn events(&self) -> broadcast::Receiver<Event>;

    /// Close all connections.
    async fn disconnect(&self);
}
