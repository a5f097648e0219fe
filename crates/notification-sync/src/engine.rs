//! The reconciliation engine.
//!
//! One [`NotificationEngine`] serves one active scope at a time and fans its
//! state out to any number of observers through a `watch` channel. Per scope
//! it owns:
//! - a [`Session`]: the store plus loading/error/connection flags, guarded by
//!   a short-lived mutex and tied to a `CancellationToken`
//! - a subscriber task running the push connection state machine
//! - a driver task applying subscriber signals and the optional poll timer
//!
//! Every spawned task re-checks the session token under the state lock before
//! publishing, so nothing from a torn-down scope can reach a newer view.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, ErrorKind, Result};
use crate::fetcher::{FetchRequest, SnapshotFetcher};
use crate::http::HttpClient;
use crate::mutation::{PendingReads, ReadMutations};
use crate::push::{PushEvent, PushTransport};
use crate::record::{NotificationRecord, Scope};
use crate::store::{NotificationStore, SnapshotTicket};
use crate::subscriber::{ConnectionState, LiveSubscriber, SubscriberSignal};

/// Capacity of the subscriber -> driver channel.
const SIGNAL_BUFFER: usize = 100;

/// What consumers render.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationView {
    /// Active scope, `None` while stopped.
    pub scope: Option<Scope>,
    /// Newest first.
    pub notifications: Vec<NotificationRecord>,
    pub unread_count: usize,
    pub is_loading: bool,
    /// Last error, kept until superseded or dismissed.
    pub error: Option<EngineError>,
    pub connection: ConnectionState,
}

struct SessionState {
    store: NotificationStore,
    is_loading: bool,
    error: Option<EngineError>,
    connection: ConnectionState,
    pending: PendingReads,
    fetch_generation: u64,
    fetch_cancel: Option<CancellationToken>,
}

impl SessionState {
    fn view(&self, scope: &Scope) -> NotificationView {
        NotificationView {
            scope: Some(scope.clone()),
            notifications: self.store.to_vec(),
            unread_count: self.store.unread_count(),
            is_loading: self.is_loading,
            error: self.error.clone(),
            connection: self.connection,
        }
    }

    fn set_error(&mut self, error: EngineError) {
        self.error = Some(error);
    }

    fn clear_error_kind(&mut self, kind: ErrorKind) {
        if self.error.as_ref().is_some_and(|e| e.kind == kind) {
            self.error = None;
        }
    }
}

/// Everything that belongs to one activated scope.
struct Session {
    scope: Scope,
    cancel: CancellationToken,
    runtime: Handle,
    state: Mutex<SessionState>,
}

impl Session {
    fn new(scope: Scope, capacity: usize, runtime: Handle) -> Self {
        Self {
            scope,
            cancel: CancellationToken::new(),
            runtime,
            state: Mutex::new(SessionState {
                store: NotificationStore::new(capacity),
                is_loading: false,
                error: None,
                connection: ConnectionState::Disconnected,
                pending: PendingReads::default(),
                fetch_generation: 0,
                fetch_cancel: None,
            }),
        }
    }
}

struct ActiveScope {
    session: Arc<Session>,
    tasks: Vec<JoinHandle<()>>,
}

struct Shared {
    config: EngineConfig,
    fetcher: SnapshotFetcher,
    mutations: ReadMutations,
    push: Arc<dyn PushTransport>,
    view_tx: watch::Sender<NotificationView>,
}

impl Shared {
    /// Publish under the state lock, unless the session is already torn down.
    fn publish(&self, session: &Session, state: &SessionState) -> bool {
        if session.cancel.is_cancelled() {
            return false;
        }
        self.view_tx.send_replace(state.view(&session.scope));
        true
    }

    /// Issue a snapshot fetch, superseding any fetch still in flight.
    fn refetch(self: &Arc<Self>, session: &Arc<Session>) {
        let (generation, ticket, token) = {
            let mut state = session.state.lock();
            if session.cancel.is_cancelled() {
                return;
            }
            if let Some(previous) = state.fetch_cancel.take() {
                previous.cancel();
            }
            state.fetch_generation += 1;
            let token = session.cancel.child_token();
            state.fetch_cancel = Some(token.clone());
            state.is_loading = true;
            let ticket = state.store.begin_snapshot();
            self.publish(session, &state);
            (state.fetch_generation, ticket, token)
        };

        debug!(scope = %session.scope, generation, "Fetching notification snapshot");
        let request = FetchRequest::new(session.scope.clone(), self.config.fetch_limit);
        let shared = Arc::clone(self);
        let task_session = Arc::clone(session);
        session.runtime.spawn(async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(generation, "Snapshot fetch superseded");
                    return;
                }
                result = shared.fetcher.fetch(&request) => result,
            };
            shared.complete_fetch(&task_session, generation, ticket, result);
        });
    }

    fn complete_fetch(
        &self,
        session: &Session,
        generation: u64,
        ticket: SnapshotTicket,
        result: Result<Vec<NotificationRecord>>,
    ) {
        let mut state = session.state.lock();
        if session.cancel.is_cancelled() || generation != state.fetch_generation {
            debug!(generation, "Ignoring stale snapshot result");
            return;
        }

        match result {
            Ok(records) => {
                let count = records.len();
                state
                    .store
                    .apply_snapshot(records, ticket, self.config.snapshot_read_policy);
                state.clear_error_kind(ErrorKind::Fetch);
                debug!(scope = %session.scope, count, unread = state.store.unread_count(), "Snapshot applied");
            }
            Err(e) => {
                // The previous list stays visible.
                warn!(scope = %session.scope, "Snapshot fetch failed: {}", e);
                state.set_error(EngineError::from_sync(ErrorKind::Fetch, &e));
            }
        }
        state.is_loading = false;
        state.fetch_cancel = None;
        self.publish(session, &state);
    }

    fn handle_signal(self: &Arc<Self>, session: &Arc<Session>, signal: SubscriberSignal) {
        match signal {
            SubscriberSignal::State(connection) => {
                let mut state = session.state.lock();
                state.connection = connection;
                self.publish(session, &state);
            }
            SubscriberSignal::Connected { reconnect } => {
                {
                    let mut state = session.state.lock();
                    state.clear_error_kind(ErrorKind::Connection);
                    self.publish(session, &state);
                }
                // The push channel does not replay; close the gap.
                debug!(scope = %session.scope, reconnect, "Refetching after connect");
                self.refetch(session);
            }
            SubscriberSignal::Event(event) => self.apply_event(session, event),
            SubscriberSignal::Failed(e) => {
                let mut state = session.state.lock();
                state.set_error(EngineError::from_sync(ErrorKind::Connection, &e));
                self.publish(session, &state);
            }
        }
    }

    fn apply_event(&self, session: &Session, event: PushEvent) {
        if !event.in_scope(&session.scope) {
            debug!(scope = %session.scope, ?event, "Ignoring push event for another scope");
            return;
        }

        let mut state = session.state.lock();
        match event {
            PushEvent::Upsert(mut record) => {
                debug!(id = %record.id, "Push upsert");
                record.fill_role_from(&session.scope);
                state.store.upsert(record);
            }
            PushEvent::BulkRead { ids, .. } => {
                let flipped = state.store.apply_bulk_read(ids.as_slice());
                debug!(received = ids.len(), flipped, "Push bulk-read");
            }
        }
        self.publish(session, &state);
    }

    fn spawn_mark_read(self: &Arc<Self>, session: &Arc<Session>, id: String) {
        let shared = Arc::clone(self);
        let task_session = Arc::clone(session);
        // Not tied to the session token: the server write completes even if
        // the scope is torn down meanwhile.
        session.runtime.spawn(async move {
            let result = shared.mutations.mark_read(&task_session.scope, &id).await;

            let mut state = task_session.state.lock();
            state.pending.finish_one(&id);
            if let Err(e) = result {
                // Local read state is deliberately kept.
                warn!(scope = %task_session.scope, id = %id, "Mark-as-read failed: {}", e);
                state.set_error(EngineError::from_sync(ErrorKind::Mutation, &e));
                shared.publish(&task_session, &state);
            } else if task_session.cancel.is_cancelled() {
                debug!(scope = %task_session.scope, id = %id, "Mark-as-read completed after teardown");
            }
        });
    }

    fn spawn_mark_all_read(self: &Arc<Self>, session: &Arc<Session>) {
        let shared = Arc::clone(self);
        let task_session = Arc::clone(session);
        session.runtime.spawn(async move {
            let result = shared.mutations.mark_all_read(&task_session.scope).await;

            if let Err(e) = result {
                let mut state = task_session.state.lock();
                warn!(scope = %task_session.scope, "Mark-all-as-read failed: {}", e);
                state.set_error(EngineError::from_sync(ErrorKind::Mutation, &e));
                shared.publish(&task_session, &state);
            } else if task_session.cancel.is_cancelled() {
                debug!(scope = %task_session.scope, "Mark-all-as-read completed after teardown");
            }
        });
    }
}

/// Applies subscriber signals and poll ticks for one session.
async fn drive(
    shared: Arc<Shared>,
    session: Arc<Session>,
    mut signal_rx: mpsc::Receiver<SubscriberSignal>,
    poll_interval: Option<Duration>,
) {
    let mut poll_timer = poll_interval.map(|period| {
        let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        timer
    });
    let mut subscriber_done = false;

    loop {
        tokio::select! {
            biased;

            _ = session.cancel.cancelled() => break,

            signal = signal_rx.recv(), if !subscriber_done => match signal {
                Some(signal) => shared.handle_signal(&session, signal),
                // Subscriber gave up; polling (if any) keeps the list fresh.
                None => subscriber_done = true,
            },

            _ = poll_tick(&mut poll_timer) => {
                debug!(scope = %session.scope, "Periodic refetch");
                shared.refetch(&session);
            }
        }
    }
    debug!(scope = %session.scope, "Session driver stopped");
}

async fn poll_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Keeps a notification list for one scope in sync with the server.
///
/// `start`/`stop` must run inside a Tokio runtime; the remaining methods are
/// synchronous and may be called from any thread once started.
pub struct NotificationEngine {
    shared: Arc<Shared>,
    active: Mutex<Option<ActiveScope>>,
    /// Held across a whole `start`/`stop` so they never interleave.
    lifecycle: tokio::sync::Mutex<()>,
}

impl NotificationEngine {
    pub fn new(
        config: EngineConfig,
        http: Arc<dyn HttpClient>,
        push: Arc<dyn PushTransport>,
    ) -> Self {
        let (view_tx, _) = watch::channel(NotificationView::default());
        Self {
            shared: Arc::new(Shared {
                config,
                fetcher: SnapshotFetcher::new(Arc::clone(&http)),
                mutations: ReadMutations::new(http),
                push,
                view_tx,
            }),
            active: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Activate `scope`, tearing down any previously active scope first.
    ///
    /// Serialized with [`stop`](Self::stop): concurrent calls run one after
    /// another and the last one wins.
    pub async fn start(&self, scope: Scope) {
        let _lifecycle = self.lifecycle.lock().await;
        self.teardown().await;

        info!(%scope, "Starting notification sync");
        let session = Arc::new(Session::new(
            scope.clone(),
            self.shared.config.capacity,
            Handle::current(),
        ));

        {
            let mut state = session.state.lock();
            state.connection = ConnectionState::Connecting;
            self.shared.publish(&session, &state);
        }
        self.shared.refetch(&session);

        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);
        let subscriber = LiveSubscriber::new(
            Arc::clone(&self.shared.push),
            scope,
            self.shared.config.reconnect.clone(),
        )
        .spawn(signal_tx, session.cancel.child_token());
        let driver = tokio::spawn(drive(
            Arc::clone(&self.shared),
            Arc::clone(&session),
            signal_rx,
            self.shared.config.poll_interval(),
        ));

        let displaced = self.active.lock().replace(ActiveScope {
            session,
            tasks: vec![subscriber, driver],
        });
        if let Some(displaced) = displaced {
            warn!(scope = %displaced.session.scope, "Displaced a scope that was still active");
            displaced.session.cancel.cancel();
        }
    }

    /// Tear down the active scope: cancel in-flight work, close the push
    /// connection and wait for the background tasks to finish.
    ///
    /// Server writes already issued by `mark_as_read` / `mark_all_as_read`
    /// still complete; their outcome is only logged.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.teardown().await;
    }

    async fn teardown(&self) {
        let Some(active) = self.active.lock().take() else {
            return;
        };

        {
            // Under the lock so no task can publish after this point.
            let _state = active.session.state.lock();
            active.session.cancel.cancel();
        }
        self.shared.view_tx.send_replace(NotificationView::default());
        info!(scope = %active.session.scope, "Stopped notification sync");

        for task in active.tasks {
            if let Err(e) = task.await
                && !e.is_cancelled()
            {
                warn!("Notification sync task failed: {}", e);
            }
        }
    }

    /// Currently active scope.
    pub fn scope(&self) -> Option<Scope> {
        self.session().map(|s| s.scope.clone())
    }

    /// Latest state.
    pub fn view(&self) -> NotificationView {
        self.shared.view_tx.borrow().clone()
    }

    /// Observe state changes. Any number of observers share one engine.
    pub fn subscribe(&self) -> watch::Receiver<NotificationView> {
        self.shared.view_tx.subscribe()
    }

    /// Fetch a fresh snapshot, superseding any fetch in flight.
    pub fn refetch(&self) {
        if let Some(session) = self.session() {
            self.shared.refetch(&session);
        }
    }

    /// Mark one notification read locally, then on the server.
    pub fn mark_as_read(&self, id: &str) {
        let Some(session) = self.session() else {
            return;
        };

        let issue = {
            let mut state = session.state.lock();
            if session.cancel.is_cancelled() || !state.store.mark_read(id) {
                debug!(id, "Mark-as-read is a no-op");
                return;
            }
            self.shared.publish(&session, &state);
            state.pending.begin_one(id)
        };

        if issue {
            self.shared.spawn_mark_read(&session, id.to_string());
        } else {
            debug!(id, "Mark-as-read already pending");
        }
    }

    /// Mark every notification in scope read locally, then on the server.
    pub fn mark_all_as_read(&self) {
        let Some(session) = self.session() else {
            return;
        };

        {
            let mut state = session.state.lock();
            if session.cancel.is_cancelled() {
                return;
            }
            let flipped = state.store.mark_all_read();
            if flipped.is_empty() {
                debug!("Mark-all-as-read: nothing unread");
                return;
            }
            debug!(count = flipped.len(), "Marked all read locally");
            self.shared.publish(&session, &state);
        }

        self.shared.spawn_mark_all_read(&session);
    }

    /// Dismiss the current error.
    pub fn clear_error(&self) {
        if let Some(session) = self.session() {
            let mut state = session.state.lock();
            state.error = None;
            self.shared.publish(&session, &state);
        }
    }

    fn session(&self) -> Option<Arc<Session>> {
        self.active.lock().as_ref().map(|a| Arc::clone(&a.session))
    }
}

impl Drop for NotificationEngine {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.session.cancel.cancel();
        }
    }
}
