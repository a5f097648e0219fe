//! Notification sync: keeps a per-viewer notification list consistent across a
//! pollable snapshot endpoint and a push event stream, with optimistic read
//! state.
//!
//! ## Core Types
//!
//! - [`NotificationEngine`] - Owns one active scope and publishes a [`NotificationView`]
//! - [`NotificationRecord`] - A single normalized notification
//! - [`Scope`] - The viewer a list belongs to (role plus optional recipient)
//! - [`NotificationStore`] - Ordered, bounded, deduplicated record set
//!
//! ## Transports
//!
//! - [`HttpClient`] / [`ReqwestHttpClient`] - Snapshot and mutation calls
//! - [`PushTransport`] / [`WsPushTransport`] - Live push events over a WebSocket
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use notification_sync::{
//!     EngineConfig, HttpConfig, NotificationEngine, ReqwestHttpClient, Scope, WsConfig,
//!     WsPushTransport,
//! };
//!
//! # async fn run() -> notification_sync::Result<()> {
//! let http = Arc::new(ReqwestHttpClient::new(&HttpConfig::default())?);
//! let push = Arc::new(WsPushTransport::new(WsConfig::default()));
//! let engine = NotificationEngine::new(EngineConfig::default(), http, push);
//!
//! engine.start(Scope::new("student", Some("42"))).await;
//! let mut views = engine.subscribe();
//! while views.changed().await.is_ok() {
//!     let view = views.borrow().clone();
//!     println!("{} unread", view.unread_count);
//! }
//! engine.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod mutation;
pub mod normalizer;
pub mod push;
pub mod record;
pub mod store;
pub mod subscriber;

pub use config::{EngineConfig, ReconnectPolicy};
pub use engine::{NotificationEngine, NotificationView};
pub use error::{EngineError, ErrorKind, Result, SyncError};
pub use fetcher::{FetchRequest, SnapshotFetcher};
pub use http::{HttpClient, HttpConfig, ReqwestHttpClient, install_rustls_provider};
pub use mutation::ReadMutations;
pub use normalizer::{normalize, normalize_at};
pub use push::{PushEvent, PushSession, PushTransport, RawPushEvent, WsConfig, WsPushTransport};
pub use record::{NotificationRecord, Role, Scope};
pub use store::{NotificationStore, SnapshotReadPolicy, SnapshotTicket};
pub use subscriber::{ConnectionState, LiveSubscriber};
