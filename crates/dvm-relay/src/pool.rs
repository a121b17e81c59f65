//! A `RelayClient` over the configured relay list.
//!
//! The pool connects to every reachable relay at startup and treats the
//! unreachable ones as absent. Publishes fan out to all connections and
//! succeed when at least one relay accepts; fetches merge per-relay results
//! and dedup by event id; live subscriptions funnel every connection's
//! events into one stream.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use dvm_protocol::Event;

use crate::client::RelayClient;
use crate::connection::RelayConnection;
use crate::error::{RelayError, Result};
use crate::message::{Filter, RelayMessage};
use crate::subscription_id;

const EVENT_BUFFER: usize = 1024;

pub struct RelayPool {
    connections: Vec<Arc<RelayConnection>>,
    events_tx: broadcast::Sender<Event>,
    op_timeout: Duration,
    forwarders: StdMutex<Vec<JoinHandle<()>>>,
}

impl RelayPool {
    /// Connect to `relays`, skipping the unreachable ones.
    ///
    /// Fails only when no relay at all could be reached.
    pub async fn connect(relays: &[String], op_timeout: Duration) -> Result<Self> {
        let mut connections = Vec::new();
        for url in relays {
            match RelayConnection::connect(url, op_timeout).await {
                Ok(conn) => {
                    info!(relay = %url, "connected");
                    connections.push(Arc::new(conn));
                }
                Err(e) => warn!(relay = %url, "unreachable: {e}"),
            }
        }
        if connections.is_empty() {
            return Err(RelayError::NoRelaysReachable);
        }

        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
        let mut forwarders = Vec::new();
        for conn in &connections {
            let mut rx = conn.messages();
            let tx = events_tx.clone();
            forwarders.push(tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(RelayMessage::Event { event, .. }) => {
                            let _ = tx.send(event);
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!("forwarder lagged by {n} frames");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }

        Ok(Self {
            connections,
            events_tx,
            op_timeout,
            forwarders: StdMutex::new(forwarders),
        })
    }

    /// How many relays this pool is connected to.
    pub fn relay_count(&self) -> usize {
        self.connections.len()
    }
}

#[async_trait]
impl RelayClient for RelayPool {
    async fn publish(&self, event: Event) -> Result<usize> {
        let results = join_all(
            self.connections
                .iter()
                .map(|conn| conn.publish(&event, self.op_timeout)),
        )
        .await;

        let accepted = results
            .iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();
        if accepted == 0 {
            return Err(RelayError::AllRelaysRejected);
        }
        debug!(event = %event.id, accepted, "published");
        Ok(accepted)
    }

    async fn fetch(&self, filters: Vec<Filter>, wait: Duration) -> Result<Vec<Event>> {
        let results = join_all(
            self.connections
                .iter()
                .map(|conn| conn.fetch(filters.clone(), wait)),
        )
        .await;

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        let mut errors = 0;
        for result in results {
            match result {
                Ok(events) => {
                    for event in events {
                        if seen.insert(event.id.clone()) {
                            merged.push(event);
                        }
                    }
                }
                Err(e) => {
                    errors += 1;
                    debug!("fetch failed on one relay: {e}");
                }
            }
        }

        // Partial relay failure degrades coverage, it does not fail the query.
        if errors == self.connections.len() {
            return Err(RelayError::NoRelaysReachable);
        }
        Ok(merged)
    }

    async fn subscribe(&self, filters: Vec<Filter>) -> Result<String> {
        let sub_id = subscription_id();
        let results = join_all(
            self.connections
                .iter()
                .map(|conn| conn.req(&sub_id, filters.clone())),
        )
        .await;

        if results.iter().all(|r| r.is_err()) {
            return Err(RelayError::NoRelaysReachable);
        }
        Ok(sub_id)
    }

    fn events(&self) -> broadcast::Receiver<Event> {
        self.events_tx.subscribe()
    }

    async fn disconnect(&self) {
        let forwarders = {
            let mut guard = self.forwarders.lock().expect("forwarder lock poisoned");
            std::mem::take(&mut *guard)
        };
        for handle in forwarders {
            handle.abort();
        }
        for conn in &self.connections {
            conn.disconnect().await;
        }
    }
}
