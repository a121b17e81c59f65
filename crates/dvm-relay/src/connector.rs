//! Factory for independent short-lived connections.
//!
//! The concurrent scan subsystem opens one connection per chunk worker, with
//! its own timeout and lifetime, and never shares it. This trait is the seam
//! that lets tests hand the scanner an in-memory network instead.

use std::time::Duration;

use async_trait::async_trait;

use crate::client::RelayClient;
use crate::error::Result;
use crate::pool::RelayPool;

#[async_trait]
pub trait RelayConnector: Send + Sync {
    /// Open a fresh, caller-owned connection to `relays`.
    async fn open(&self, relays: &[String]) -> Result<Box<dyn RelayClient>>;
}

/// Production connector: a fresh websocket pool per call.
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl RelayConnector for WsConnector {
    async fn open(&self, relays: &[String]) -> Result<Box<dyn RelayClient>> {
        let pool = RelayPool::connect(relays, self.connect_timeout).await?;
        Ok(Box::new(pool))
    }
}
