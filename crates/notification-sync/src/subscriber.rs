//! Live event subscriber.
//!
//! Runs the push connection state machine for one scope:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (drop) Reconnecting{n} -> Connected
//!                                                        |
//!                                     (budget exhausted) +-> Disconnected
//! ```
//!
//! Every successful connection, first or not, is reported with
//! [`SubscriberSignal::Connected`] so the owner can refetch the snapshot and
//! close the gap left while no events were flowing.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ReconnectPolicy;
use crate::error::SyncError;
use crate::push::{PushEvent, PushSession, PushTransport};
use crate::record::Scope;

/// Push connection state as seen by consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting {
        attempt: u32,
    },
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (#{attempt})"),
        }
    }
}

/// Signals sent from the subscriber task to its owner.
#[derive(Debug)]
pub enum SubscriberSignal {
    State(ConnectionState),
    /// A connection was established; `reconnect` is false for the first one.
    Connected { reconnect: bool },
    Event(PushEvent),
    /// Connecting failed or an established connection dropped.
    Failed(SyncError),
}

/// Why the receive loop ended.
enum SessionEnd {
    Cancelled,
    Lost(SyncError),
    OwnerGone,
}

/// Drives one push connection for a scope until cancelled.
pub struct LiveSubscriber {
    transport: Arc<dyn PushTransport>,
    scope: Scope,
    policy: ReconnectPolicy,
}

impl LiveSubscriber {
    pub fn new(transport: Arc<dyn PushTransport>, scope: Scope, policy: ReconnectPolicy) -> Self {
        Self {
            transport,
            scope,
            policy,
        }
    }

    /// Spawn the state machine on the runtime.
    pub fn spawn(
        self,
        signal_tx: mpsc::Sender<SubscriberSignal>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(signal_tx, cancel))
    }

    /// Run until cancelled, the attempt budget is spent, or the owner goes away.
    pub async fn run(self, signal_tx: mpsc::Sender<SubscriberSignal>, cancel: CancellationToken) {
        let mut attempt: u32 = 0;
        let mut has_connected = false;

        if !emit(&signal_tx, SubscriberSignal::State(ConnectionState::Connecting)).await {
            return;
        }

        loop {
            let connect_result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.transport.connect(&self.scope) => result,
            };

            match connect_result {
                Ok(mut session) => {
                    info!(scope = %self.scope, reconnect = has_connected, "Push channel connected");
                    attempt = 0;

                    let announced = emit(&signal_tx, SubscriberSignal::State(ConnectionState::Connected)).await
                        && emit(&signal_tx, SubscriberSignal::Connected { reconnect: has_connected }).await;
                    has_connected = true;

                    let end = if announced {
                        self.pump(session.as_mut(), &signal_tx, &cancel).await
                    } else {
                        SessionEnd::OwnerGone
                    };
                    if let Err(e) = session.disconnect().await {
                        debug!(scope = %self.scope, "Error while closing push session: {}", e);
                    }

                    match end {
                        SessionEnd::Cancelled | SessionEnd::OwnerGone => break,
                        SessionEnd::Lost(e) => {
                            warn!(scope = %self.scope, "Push channel lost: {}", e);
                            if !emit(&signal_tx, SubscriberSignal::Failed(e)).await {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(scope = %self.scope, attempt, "Push channel connection failed: {}", e);
                    if !emit(&signal_tx, SubscriberSignal::Failed(e)).await {
                        return;
                    }
                }
            }

            attempt += 1;
            if !self.policy.should_retry(attempt) {
                error!(scope = %self.scope, "Max reconnect attempts reached");
                break;
            }

            let delay = self.policy.delay_for(attempt);
            debug!(scope = %self.scope, attempt, delay_ms = delay.as_millis() as u64, "Scheduling push reconnect");
            if !emit(&signal_tx, SubscriberSignal::State(ConnectionState::Reconnecting { attempt })).await {
                return;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let _ = signal_tx
            .send(SubscriberSignal::State(ConnectionState::Disconnected))
            .await;
        debug!(scope = %self.scope, "Push subscriber stopped");
    }

    /// Forward events from an open session until it ends.
    async fn pump(
        &self,
        session: &mut dyn PushSession,
        signal_tx: &mpsc::Sender<SubscriberSignal>,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                received = session.receive() => received,
            };

            match received {
                Ok(Some(raw)) => {
                    let Some(event) = PushEvent::decode(&raw, Utc::now()) else {
                        debug!(scope = %self.scope, event = %raw.event, "Dropped undecodable push event");
                        continue;
                    };
                    if !emit(signal_tx, SubscriberSignal::Event(event)).await {
                        return SessionEnd::OwnerGone;
                    }
                }
                Ok(None) => return SessionEnd::Lost(SyncError::connection("closed by server")),
                Err(e) => return SessionEnd::Lost(e),
            }
        }
    }
}

async fn emit(tx: &mpsc::Sender<SubscriberSignal>, signal: SubscriberSignal) -> bool {
    tx.send(signal).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::push::{EVENT_NEW, RawPushEvent};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Each connect pops a script: `Some(events)` connects and plays them then
    /// drops; `None` fails to connect.
    struct ScriptedTransport {
        scripts: Mutex<VecDeque<Option<Vec<RawPushEvent>>>>,
        connects: AtomicU32,
        disconnects: Arc<AtomicU32>,
    }

    impl ScriptedTransport {
        fn new(scripts: Vec<Option<Vec<RawPushEvent>>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                connects: AtomicU32::new(0),
                disconnects: Arc::new(AtomicU32::new(0)),
            })
        }
    }

    struct ScriptedSession {
        events: VecDeque<RawPushEvent>,
        hold_open: bool,
        disconnects: Arc<AtomicU32>,
    }

    #[async_trait]
    impl PushTransport for ScriptedTransport {
        async fn connect(&self, _scope: &Scope) -> Result<Box<dyn PushSession>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let next = self.scripts.lock().pop_front();
            match next {
                Some(Some(events)) => Ok(Box::new(ScriptedSession {
                    events: events.into(),
                    hold_open: false,
                    disconnects: self.disconnects.clone(),
                })),
                Some(None) => Err(SyncError::connection("refused")),
                // Script exhausted: stay connected forever.
                None => Ok(Box::new(ScriptedSession {
                    events: VecDeque::new(),
                    hold_open: true,
                    disconnects: self.disconnects.clone(),
                })),
            }
        }
    }

    #[async_trait]
    impl PushSession for ScriptedSession {
        async fn receive(&mut self) -> Result<Option<RawPushEvent>> {
            if let Some(event) = self.events.pop_front() {
                return Ok(Some(event));
            }
            if self.hold_open {
                std::future::pending::<()>().await;
            }
            Ok(None)
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 2,
            use_jitter: false,
        }
    }

    async fn next(rx: &mut mpsc::Receiver<SubscriberSignal>) -> SubscriberSignal {
        tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for signal")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_reconnect_reports_connected_again() {
        let transport = ScriptedTransport::new(vec![
            Some(vec![RawPushEvent::new(EVENT_NEW, json!({"id": 1}))]),
            None,
        ]);
        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let handle = LiveSubscriber::new(
            transport.clone(),
            Scope::new("student", Some("42")),
            fast_policy(3),
        )
        .spawn(tx, cancel.clone());

        assert!(matches!(next(&mut rx).await, SubscriberSignal::State(ConnectionState::Connecting)));
        assert!(matches!(next(&mut rx).await, SubscriberSignal::State(ConnectionState::Connected)));
        assert!(matches!(next(&mut rx).await, SubscriberSignal::Connected { reconnect: false }));
        assert!(matches!(next(&mut rx).await, SubscriberSignal::Event(PushEvent::Upsert(_))));
        // Server closes the first session.
        assert!(matches!(next(&mut rx).await, SubscriberSignal::Failed(_)));
        assert!(matches!(
            next(&mut rx).await,
            SubscriberSignal::State(ConnectionState::Reconnecting { attempt: 1 })
        ));
        // Second connect is refused.
        assert!(matches!(next(&mut rx).await, SubscriberSignal::Failed(_)));
        assert!(matches!(
            next(&mut rx).await,
            SubscriberSignal::State(ConnectionState::Reconnecting { attempt: 2 })
        ));
        // Third connect holds open.
        assert!(matches!(next(&mut rx).await, SubscriberSignal::State(ConnectionState::Connected)));
        assert!(matches!(next(&mut rx).await, SubscriberSignal::Connected { reconnect: true }));

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(transport.connects.load(Ordering::SeqCst), 3);
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let transport = ScriptedTransport::new(vec![None, None, None, None]);
        let (tx, mut rx) = mpsc::channel(64);
        let handle = LiveSubscriber::new(transport.clone(), Scope::role_only("admin"), fast_policy(2))
            .spawn(tx, CancellationToken::new());

        handle.await.unwrap();

        let mut last_state = None;
        let mut failures = 0;
        while let Ok(signal) = rx.try_recv() {
            match signal {
                SubscriberSignal::State(state) => last_state = Some(state),
                SubscriberSignal::Failed(_) => failures += 1,
                _ => {}
            }
        }
        assert_eq!(failures, 3);
        assert_eq!(last_state, Some(ConnectionState::Disconnected));
        assert_eq!(transport.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancel_disconnects_open_session() {
        let transport = ScriptedTransport::new(vec![]);
        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let handle = LiveSubscriber::new(transport.clone(), Scope::role_only("admin"), fast_policy(2))
            .spawn(tx, cancel.clone());

        loop {
            if let SubscriberSignal::Connected { .. } = next(&mut rx).await {
                break;
            }
        }
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
    }
}
