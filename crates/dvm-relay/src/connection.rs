//! A single websocket connection to one relay.
//!
//! Deliberately thin: connect with a timeout, fan inbound frames out on a
//! broadcast channel from a background reader task, and offer bounded
//! publish/fetch primitives on top. There is no reconnection machinery —
//! scan connections are short-lived by design, and the pool treats a dead
//! relay as absent rather than nursing it back.

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use dvm_protocol::Event;

use crate::error::{RelayError, Result};
use crate::message::{ClientMessage, Filter, RelayMessage};
use crate::subscription_id;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

const INCOMING_BUFFER: usize = 1024;

/// One live relay connection.
pub struct RelayConnection {
    url: String,
    writer: Mutex<WsSink>,
    incoming: broadcast::Sender<RelayMessage>,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConnection")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl RelayConnection {
    /// Connect to `url` (ws:// or wss://), waiting at most `connect_timeout`.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self> {
        let parsed = url::Url::parse(url).map_err(|e| RelayError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(RelayError::InvalidUrl {
                url: url.to_string(),
                reason: format!("scheme must be ws or wss, got {}", parsed.scheme()),
            });
        }

        let (stream, _response) = timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| RelayError::ConnectTimeout(url.to_string()))?
            .map_err(|e| RelayError::WebSocket(e.to_string()))?;

        let (writer, mut read) = stream.split();
        let (incoming, _) = broadcast::channel(INCOMING_BUFFER);

        let frames = incoming.clone();
        let reader_url = url.to_string();
        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match RelayMessage::from_json(text.as_str()) {
                        Ok(msg) => {
                            let _ = frames.send(msg);
                        }
                        Err(e) => debug!(relay = %reader_url, "skipping frame: {e}"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(relay = %reader_url, "read error: {e}");
                        break;
                    }
                }
            }
            debug!(relay = %reader_url, "reader finished");
        });

        Ok(Self {
            url: url.to_string(),
            writer: Mutex::new(writer),
            incoming,
            reader: StdMutex::new(Some(reader)),
        })
    }

    /// The relay url this connection targets.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Subscribe to the raw inbound frame stream.
    pub fn messages(&self) -> broadcast::Receiver<RelayMessage> {
        self.incoming.subscribe()
    }

    async fn send(&self, message: &ClientMessage) -> Result<()> {
        let json = message.to_json()?;
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| RelayError::WebSocket(e.to_string()))
    }

    /// Publish an event and wait up to `wait` for the relay's OK verdict.
    ///
    /// Returns whether the relay accepted; a relay that stays silent counts
    /// as not accepting.
    pub async fn publish(&self, event: &Event, wait: Duration) -> Result<bool> {
        let mut rx = self.incoming.subscribe();
        self.send(&ClientMessage::Event(event.clone())).await?;

        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(relay = %self.url, event = %event.id, "no OK before deadline");
                return Ok(false);
            }
            match timeout(remaining, rx.recv()).await {
                Ok(Ok(RelayMessage::Ok {
                    event_id,
                    accepted,
                    message,
                })) if event_id == event.id => {
                    if !accepted {
                        debug!(relay = %self.url, event = %event.id, "rejected: {message}");
                    }
                    return Ok(accepted);
                }
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => return Err(RelayError::Closed),
                Err(_) => return Ok(false),
            }
        }
    }

    /// Issue a REQ and collect stored events until EOSE or `wait` elapses.
    pub async fn fetch(&self, filters: Vec<Filter>, wait: Duration) -> Result<Vec<Event>> {
        let sub_id = subscription_id();
        let mut rx = self.incoming.subscribe();
        self.send(&ClientMessage::Req {
            subscription_id: sub_id.clone(),
            filters,
        })
        .await?;

        let mut events = Vec::new();
        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, rx.recv()).await {
                Ok(Ok(RelayMessage::Event {
                    subscription_id,
                    event,
                })) if subscription_id == sub_id => events.push(event),
                Ok(Ok(RelayMessage::Eose { subscription_id })) if subscription_id == sub_id => {
                    break;
                }
                Ok(Ok(RelayMessage::Closed {
                    subscription_id,
                    message,
                })) if subscription_id == sub_id => {
                    debug!(relay = %self.url, "subscription closed early: {message}");
                    break;
                }
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => break,
                Err(_) => break,
            }
        }

        // Best effort; the relay drops the subscription with the socket anyway.
        let _ = self
            .send(&ClientMessage::Close {
                subscription_id: sub_id,
            })
            .await;

        Ok(events)
    }

    /// Open a standing subscription with the given id.
    pub async fn req(&self, subscription_id: &str, filters: Vec<Filter>) -> Result<()> {
        self.send(&ClientMessage::Req {
            subscription_id: subscription_id.to_string(),
            filters,
        })
        .await
    }

    /// Close the connection and stop the reader task.
    pub async fn disconnect(&self) {
        if let Some(reader) = self.reader.lock().expect("reader lock poisoned").take() {
            reader.abort();
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.send(Message::Close(None)).await;
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().ok().and_then(|mut r| r.take()) {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_websocket_urls() {
        let err = RelayConnection::connect("https://relay.example.com", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidUrl { .. }));

        let err = RelayConnection::connect("not a url", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidUrl { .. }));
    }
}
