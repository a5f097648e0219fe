//! Push channel capability and event decoding.
//!
//! A [`PushTransport`] opens one [`PushSession`] per scope. Sessions yield raw
//! named events; [`PushEvent::decode`] turns them into store operations.
//! [`WsPushTransport`] speaks JSON over a WebSocket.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Result, SyncError};
use crate::normalizer::{canonical_id, normalize_at};
use crate::record::{NotificationRecord, Role, Scope};

pub const EVENT_NEW: &str = "notifications:new";
pub const EVENT_UPDATED: &str = "notifications:updated";
pub const EVENT_BULK_READ: &str = "notifications:bulk-read";

/// Opens push sessions scoped to a viewer.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Establish a connection for `scope`.
    async fn connect(&self, scope: &Scope) -> Result<Box<dyn PushSession>>;
}

/// One live push connection.
#[async_trait]
pub trait PushSession: Send {
    /// Next event; `Ok(None)` when the server closed the connection.
    async fn receive(&mut self) -> Result<Option<RawPushEvent>>;

    /// Close the connection. Must be safe to call more than once.
    async fn disconnect(&mut self) -> Result<()>;
}

/// A named event as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPushEvent {
    pub event: String,
    #[serde(default, alias = "payload")]
    pub data: Value,
}

impl RawPushEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Parse a text frame: `{"event": .., "data": ..}` or `["event", data]`.
    pub fn from_frame(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        match value {
            Value::Array(mut parts) if !parts.is_empty() => {
                let data = if parts.len() > 1 {
                    parts.swap_remove(1)
                } else {
                    Value::Null
                };
                match parts.swap_remove(0) {
                    Value::String(event) => Ok(Self { event, data }),
                    _ => Err(SyncError::protocol("event name is not a string")),
                }
            }
            Value::Object(_) => Ok(serde_json::from_value(value)?),
            _ => Err(SyncError::protocol("unrecognized frame shape")),
        }
    }
}

/// A decoded push event.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// `notifications:new` / `notifications:updated`
    Upsert(NotificationRecord),
    /// `notifications:bulk-read`
    BulkRead {
        role: Option<Role>,
        recipient_id: Option<String>,
        ids: Vec<String>,
    },
}

impl PushEvent {
    /// Decode a raw event. Unknown events and malformed payloads yield `None`.
    pub fn decode(raw: &RawPushEvent, now: DateTime<Utc>) -> Option<Self> {
        match raw.event.as_str() {
            EVENT_NEW | EVENT_UPDATED => normalize_at(&raw.data, now).map(PushEvent::Upsert),
            EVENT_BULK_READ => {
                let obj = raw.data.as_object()?;
                let ids = obj
                    .get("ids")
                    .or_else(|| obj.get("notificationIds"))
                    .and_then(Value::as_array)?
                    .iter()
                    .filter_map(canonical_id)
                    .collect();
                Some(PushEvent::BulkRead {
                    role: obj.get("role").and_then(Value::as_str).map(Role::from),
                    recipient_id: obj
                        .get("recipientId")
                        .or_else(|| obj.get("recipient_id"))
                        .and_then(canonical_id),
                    ids,
                })
            }
            other => {
                trace!(event = other, "Ignoring unknown push event");
                None
            }
        }
    }

    /// Whether this event belongs to `scope`.
    pub fn in_scope(&self, scope: &Scope) -> bool {
        match self {
            PushEvent::Upsert(record) => {
                // No role on the payload: trust the connection's scoping.
                let role = (!record.role.is_unspecified()).then_some(&record.role);
                scope.accepts(role, record.recipient_id.as_deref())
            }
            PushEvent::BulkRead {
                role, recipient_id, ..
            } => scope.accepts(role.as_ref(), recipient_id.as_deref()),
        }
    }
}

/// Settings for [`WsPushTransport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsConfig {
    /// Push endpoint, e.g. `wss://dashboard.example.com/notifications/ws`.
    #[serde(default = "default_ws_url")]
    pub url: String,
    /// Interval between client pings in seconds; 0 disables them.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
}

fn default_ws_url() -> String {
    "ws://localhost:5000/notifications/ws".to_string()
}

fn default_heartbeat() -> u64 {
    25
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: default_ws_url(),
            heartbeat_secs: default_heartbeat(),
        }
    }
}

/// JSON-over-WebSocket push transport.
#[derive(Debug, Clone)]
pub struct WsPushTransport {
    config: WsConfig,
}

impl WsPushTransport {
    pub fn new(config: WsConfig) -> Self {
        Self { config }
    }

    /// Endpoint with the scope encoded as query parameters.
    pub fn scoped_url(&self, scope: &Scope) -> Result<Url> {
        let mut url = Url::parse(&self.config.url)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("role", scope.role.as_str());
            if let Some(recipient_id) = &scope.recipient_id {
                query.append_pair("recipientId", recipient_id);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl PushTransport for WsPushTransport {
    async fn connect(&self, scope: &Scope) -> Result<Box<dyn PushSession>> {
        crate::http::install_rustls_provider();

        let url = self.scoped_url(scope)?;
        let connection_id = format!("notifications-{}-{}", scope, uuid::Uuid::new_v4());
        debug!(%url, %connection_id, "Connecting push WebSocket");

        let (stream, _) = connect_async(url.as_str()).await?;
        info!(%connection_id, "Push WebSocket connected");

        let heartbeat = (self.config.heartbeat_secs > 0).then(|| {
            let period = Duration::from_secs(self.config.heartbeat_secs);
            let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            timer
        });

        Ok(Box::new(WsPushSession {
            connection_id,
            stream: Some(stream),
            heartbeat,
        }))
    }
}

struct WsPushSession {
    connection_id: String,
    stream: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    heartbeat: Option<Interval>,
}

impl WsPushSession {
    async fn tick(heartbeat: &mut Option<Interval>) {
        match heartbeat {
            Some(timer) => {
                timer.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[async_trait]
impl PushSession for WsPushSession {
    async fn receive(&mut self) -> Result<Option<RawPushEvent>> {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Ok(None);
            };

            tokio::select! {
                _ = Self::tick(&mut self.heartbeat) => {
                    stream.send(Message::Ping(Default::default())).await?;
                    trace!(connection_id = %self.connection_id, "Sent heartbeat");
                }
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => match RawPushEvent::from_frame(text.as_str()) {
                        Ok(event) => return Ok(Some(event)),
                        Err(e) => warn!(connection_id = %self.connection_id, "Failed to decode push frame: {}", e),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        debug!(connection_id = %self.connection_id, ?frame, "Push WebSocket closed by server");
                        self.stream = None;
                        return Ok(None);
                    }
                    // Pings are answered by tungstenite; binary frames are not part of the protocol.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.stream = None;
                        return Err(e.into());
                    }
                    None => {
                        self.stream = None;
                        return Ok(None);
                    }
                },
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            debug!(connection_id = %self.connection_id, "Closing push WebSocket");
            let _ = stream.close(None).await;
        }
        Ok(())
    }
}
