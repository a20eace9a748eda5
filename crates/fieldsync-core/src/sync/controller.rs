//! Event-driven view refresh.
//!
//! The controller owns a fixed set of named views. A realtime event on a
//! topic a view watches schedules a re-fetch of that view through the
//! [`RequestExecutor`]. Re-fetches of one view never overlap: events that
//! arrive while a fetch is in flight collapse into a single follow-up fetch.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::api::{ApiError, HttpTransport, RequestExecutor};
use crate::auth::AuthStatus;
use crate::cache::ViewCache;
use crate::realtime::{RealtimeChannel, ServerEvent, Subscription};

use super::view::{ViewSnapshot, ViewSpec, ViewStatus};

/// Events buffered per receiver before slow receivers start lagging.
const EVENT_BUFFER: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Unknown view: {0}")]
    UnknownView(String),
}

/// Re-runs the fetch of a failed view.
#[derive(Clone)]
pub struct RetryHandle {
    view: String,
    trigger: Arc<dyn Fn(&str) -> bool + Send + Sync>,
}

impl RetryHandle {
    pub fn view(&self) -> &str {
        &self.view
    }

    /// Schedule the fetch again. Returns false if the controller is gone.
    pub fn retry(&self) -> bool {
        (self.trigger)(&self.view)
    }
}

impl std::fmt::Debug for RetryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryHandle").field("view", &self.view).finish()
    }
}

#[derive(Debug, Clone)]
pub enum SyncEvent {
    StatusChanged {
        view: String,
        status: ViewStatus,
    },
    Failed {
        view: String,
        error: ApiError,
        retry: RetryHandle,
    },
    /// A fetch found the session unrecoverable; the user has to log in again.
    /// Sent once per expiry, however many views fail on it.
    SessionExpired,
}

#[derive(Default)]
struct Schedule {
    in_flight: bool,
    rerun: bool,
}

struct ViewEntry {
    spec: ViewSpec,
    snapshot: watch::Sender<ViewSnapshot>,
    schedule: Mutex<Schedule>,
}

impl ViewEntry {
    fn schedule(&self) -> MutexGuard<'_, Schedule> {
        self.schedule.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct ControllerInner<T: HttpTransport> {
    executor: RequestExecutor<T>,
    views: HashMap<String, ViewEntry>,
    cache: Option<ViewCache>,
    events: broadcast::Sender<SyncEvent>,
    subscriptions: Mutex<Vec<Subscription>>,
    auth_status: Mutex<watch::Receiver<AuthStatus>>,
}

pub struct SyncController<T: HttpTransport> {
    inner: Arc<ControllerInner<T>>,
}

impl<T: HttpTransport> Clone for SyncController<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: HttpTransport> SyncController<T> {
    /// Build the controller. Views start from their cached payload when a
    /// cache is given and holds one.
    pub fn new(executor: RequestExecutor<T>, specs: Vec<ViewSpec>, cache: Option<ViewCache>) -> Self {
        let views = specs
            .into_iter()
            .map(|spec| {
                let seeded = cache
                    .as_ref()
                    .and_then(|cache| match cache.load::<Value>(&spec.name) {
                        Ok(cached) => cached,
                        Err(e) => {
                            warn!(view = %spec.name, error = %e, "Ignoring unreadable view cache");
                            None
                        }
                    })
                    .map(ViewSnapshot::from_cache)
                    .unwrap_or_default();
                let entry = ViewEntry {
                    snapshot: watch::channel(seeded).0,
                    schedule: Mutex::default(),
                    spec,
                };
                (entry.spec.name.clone(), entry)
            })
            .collect();

        let auth_status = Mutex::new(executor.session_store().watch_status());
        Self {
            inner: Arc::new(ControllerInner {
                executor,
                views,
                cache,
                events: broadcast::channel(EVENT_BUFFER).0,
                subscriptions: Mutex::new(Vec::new()),
                auth_status,
            }),
        }
    }

    pub fn executor(&self) -> &RequestExecutor<T> {
        &self.inner.executor
    }

    pub fn view_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.views.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn snapshot(&self, view: &str) -> Option<ViewSnapshot> {
        self.inner
            .views
            .get(view)
            .map(|entry| entry.snapshot.borrow().clone())
    }

    /// One status for all views: any error wins, then any fetch in progress.
    pub fn freshness(&self) -> ViewStatus {
        let statuses: Vec<ViewStatus> = self
            .inner
            .views
            .values()
            .map(|entry| entry.snapshot.borrow().status)
            .collect();
        if statuses.contains(&ViewStatus::Error) {
            ViewStatus::Error
        } else if statuses.contains(&ViewStatus::Loading) {
            ViewStatus::Loading
        } else {
            ViewStatus::Idle
        }
    }

    pub fn watch(&self, view: &str) -> Option<watch::Receiver<ViewSnapshot>> {
        self.inner.views.get(view).map(|entry| entry.snapshot.subscribe())
    }

    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Fetch `view` now and wait until it settles.
    ///
    /// If a fetch is already running, a follow-up fetch is queued instead and
    /// this waits for that one.
    pub async fn refresh(&self, view: &str) -> Result<ViewSnapshot, SyncError> {
        self.inner.trigger(view)?;
        self.wait_settled(view).await
    }

    pub async fn refresh_all(&self) -> Vec<(String, ViewSnapshot)> {
        let names = self.view_names();
        let results = futures::future::join_all(names.iter().map(|name| self.refresh(name))).await;
        names
            .into_iter()
            .zip(results)
            .filter_map(|(name, result)| result.ok().map(|snapshot| (name, snapshot)))
            .collect()
    }

    /// Wait until `view` is no longer loading.
    pub async fn wait_settled(&self, view: &str) -> Result<ViewSnapshot, SyncError> {
        let mut rx = self
            .watch(view)
            .ok_or_else(|| SyncError::UnknownView(view.to_string()))?;
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if snapshot.status != ViewStatus::Loading {
                return Ok(snapshot);
            }
            if rx.changed().await.is_err() {
                return Ok(snapshot);
            }
        }
    }

    /// Schedule re-fetches for every view watching the event's topic.
    pub fn handle_event(&self, event: &ServerEvent) {
        if let Some(topic) = event.topic.as_deref() {
            self.inner.on_topic(topic);
        }
    }

    /// Subscribe to every topic the views watch. Calling again replaces the
    /// previous subscriptions.
    pub fn start(&self, channel: &RealtimeChannel) {
        let topics: BTreeSet<&str> = self
            .inner
            .views
            .values()
            .flat_map(|entry| entry.spec.topics.iter().map(String::as_str))
            .collect();

        let mut subscriptions = self.inner.subscriptions();
        subscriptions.clear();
        for topic in topics {
            let weak = Arc::downgrade(&self.inner);
            subscriptions.push(channel.subscribe(topic, move |event| {
                if let (Some(inner), Some(topic)) = (weak.upgrade(), event.topic.as_deref()) {
                    inner.on_topic(topic);
                }
            }));
        }
        info!(topics = subscriptions.len(), "Sync controller started");
    }

    /// Drop all topic subscriptions. In-flight fetches still complete.
    pub fn stop(&self) {
        self.inner.subscriptions().clear();
        info!("Sync controller stopped");
    }
}

impl<T: HttpTransport> ControllerInner<T> {
    fn subscriptions(&self) -> MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn on_topic(self: &Arc<Self>, topic: &str) {
        for entry in self.views.values() {
            if entry.spec.watches(topic) {
                debug!(view = %entry.spec.name, topic = %topic, "Event invalidated view");
                self.schedule(entry);
            }
        }
    }

    fn trigger(self: &Arc<Self>, view: &str) -> Result<(), SyncError> {
        let entry = self
            .views
            .get(view)
            .ok_or_else(|| SyncError::UnknownView(view.to_string()))?;
        self.schedule(entry);
        Ok(())
    }

    /// Start a fetch, or mark one for after the running fetch.
    fn schedule(self: &Arc<Self>, entry: &ViewEntry) {
        {
            let mut schedule = entry.schedule();
            if schedule.in_flight {
                schedule.rerun = true;
                debug!(view = %entry.spec.name, "Fetch in flight, coalescing");
                return;
            }
            schedule.in_flight = true;
            let mut next = entry.snapshot.borrow().clone();
            next.status = ViewStatus::Loading;
            self.replace_snapshot(entry, next);
        }
        tokio::spawn(Arc::clone(self).drive(entry.spec.name.clone()));
    }

    async fn drive(self: Arc<Self>, view: String) {
        let Some(entry) = self.views.get(&view) else {
            return;
        };
        loop {
            let outcome = self.fetch(&entry.spec).await;
            if let (Ok(data), Some(cache)) = (&outcome, &self.cache) {
                if let Err(e) = cache.save(&view, data) {
                    warn!(view = %view, error = %e, "Failed to cache view");
                }
            }

            let again = {
                let mut schedule = entry.schedule();
                let again = outcome.is_ok() && schedule.rerun;
                schedule.rerun = false;
                schedule.in_flight = again;
                self.publish(entry, &outcome, again);
                again
            };

            if let Err(error) = outcome {
                self.report_failure(&view, error);
            }
            if !again {
                break;
            }
            debug!(view = %view, "Re-fetching after coalesced events");
        }
    }

    async fn fetch(&self, spec: &ViewSpec) -> Result<Value, ApiError> {
        let response = self
            .executor
            .execute(&spec.request, true)
            .await?
            .error_for_status()?;
        response.json()
    }

    fn publish(&self, entry: &ViewEntry, outcome: &Result<Value, ApiError>, loading: bool) {
        let mut next = entry.snapshot.borrow().clone();
        match outcome {
            Ok(data) => {
                next.data = Some(data.clone());
                next.last_updated = Some(Utc::now());
                next.error = None;
                next.status = if loading {
                    ViewStatus::Loading
                } else {
                    ViewStatus::Idle
                };
            }
            Err(error) => {
                next.status = ViewStatus::Error;
                next.error = Some(error.to_string());
            }
        }
        self.replace_snapshot(entry, next);
    }

    fn replace_snapshot(&self, entry: &ViewEntry, next: ViewSnapshot) {
        let status = next.status;
        let previous = entry.snapshot.send_replace(next);
        if previous.status != status {
            debug!(view = %entry.spec.name, from = ?previous.status, to = ?status, "View status changed");
            let _ = self.events.send(SyncEvent::StatusChanged {
                view: entry.spec.name.clone(),
                status,
            });
        }
    }

    /// True only for the first failure that observes a new session expiry.
    fn take_expiry(&self) -> bool {
        let mut status = self.auth_status.lock().unwrap_or_else(|e| e.into_inner());
        status.has_changed().unwrap_or(false) && *status.borrow_and_update() == AuthStatus::Expired
    }

    fn report_failure(self: &Arc<Self>, view: &str, error: ApiError) {
        warn!(view = %view, error = %error, "View fetch failed");
        let expired = error.requires_login() && self.take_expiry();

        let weak = Arc::downgrade(self);
        let retry = RetryHandle {
            view: view.to_string(),
            trigger: Arc::new(move |view: &str| {
                weak.upgrade()
                    .map(|inner| inner.trigger(view).is_ok())
                    .unwrap_or(false)
            }),
        };
        let _ = self.events.send(SyncEvent::Failed {
            view: view.to_string(),
            error,
            retry,
        });
        if expired {
            let _ = self.events.send(SyncEvent::SessionExpired);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::*;
    use crate::api::testing::FakeServer;
    use crate::api::RequestSpec;
    use crate::auth::{AuthStatus, Session, SessionStore};
    use crate::config::Config;

    fn logged_in() -> SessionStore {
        let store = SessionStore::in_memory();
        store.set(Session::new("valid-0".to_string(), "refresh-0".to_string()));
        store
    }

    fn dashboard() -> ViewSpec {
        ViewSpec::new("dashboard", RequestSpec::get("/dashboard"), ["alerts"])
    }

    fn controller(
        server: &Arc<FakeServer>,
        store: SessionStore,
        specs: Vec<ViewSpec>,
    ) -> SyncController<FakeServer> {
        let executor = RequestExecutor::from_shared(Arc::clone(server), store);
        SyncController::new(executor, specs, None)
    }

    fn event(text: &str) -> ServerEvent {
        ServerEvent::parse(text).unwrap()
    }

    fn statuses(events: &mut broadcast::Receiver<SyncEvent>, view: &str) -> Vec<ViewStatus> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::StatusChanged { view: v, status } = event {
                if v == view {
                    out.push(status);
                }
            }
        }
        out
    }

    #[tokio::test]
    async fn test_burst_of_events_coalesces_into_one_extra_fetch() {
        let server = FakeServer::new("valid-0");
        let gate = server.hold_fetches();
        let controller = controller(&server, logged_in(), vec![dashboard()]);
        let mut events = controller.events();

        let alert = event(r#"{"type":"alert","data":{"id":7}}"#);
        controller.handle_event(&alert);
        tokio::task::yield_now().await;
        for _ in 0..5 {
            controller.handle_event(&alert);
        }
        controller.handle_event(&event(r#"{"type":"sensor_data","data":{}}"#));
        gate.add_permits(10);

        let snapshot = controller.wait_settled("dashboard").await.unwrap();
        assert_eq!(snapshot.status, ViewStatus::Idle);
        assert_eq!(server.calls_to("/dashboard").len(), 2);
        assert_eq!(snapshot.data.unwrap()["seq"], 2);
        assert_eq!(
            statuses(&mut events, "dashboard"),
            vec![ViewStatus::Loading, ViewStatus::Idle]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_access_refreshes_once_for_concurrent_fetches() {
        let server = FakeServer::new("unused");
        let store = SessionStore::in_memory();
        let controller = controller(&server, store.clone(), vec![dashboard()]);
        controller
            .executor()
            .login("eng@example.com", "correct")
            .await
            .unwrap();
        server.revoke_access();
        let mut events = controller.events();

        let direct = RequestSpec::get("/dashboard");
        let (view, direct) = tokio::join!(
            controller.refresh("dashboard"),
            controller.executor().execute(&direct, true)
        );

        assert_eq!(server.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(direct.unwrap().status, 200);
        let view = view.unwrap();
        assert_eq!(view.status, ViewStatus::Idle);
        assert!(view.data.is_some());
        assert_eq!(store.access_token().as_deref(), Some("fresh-1"));
        assert_eq!(
            statuses(&mut events, "dashboard"),
            vec![ViewStatus::Loading, ViewStatus::Idle]
        );
    }

    #[tokio::test]
    async fn test_failure_surfaces_error_and_retry_handle() {
        let server = FakeServer::new("valid-0");
        server.respond("/api/stats", 500, "database unavailable");
        let stats = ViewSpec::new("stats", RequestSpec::get("/api/stats"), ["alerts"]);
        let controller = controller(&server, logged_in(), vec![stats]);
        let mut events = controller.events();

        let snapshot = controller.refresh("stats").await.unwrap();
        assert_eq!(snapshot.status, ViewStatus::Error);
        assert!(snapshot.error.unwrap().contains("database unavailable"));

        let retry = loop {
            match events.recv().await.unwrap() {
                SyncEvent::Failed { view, error, retry } => {
                    assert_eq!(view, "stats");
                    assert_eq!(error, ApiError::ServerError("database unavailable".to_string()));
                    break retry;
                }
                _ => continue,
            }
        };
        assert_eq!(server.calls_to("/api/stats").len(), 1);

        server.respond("/api/stats", 200, r#"{"assets":{"total":3}}"#);
        assert!(retry.retry());
        let snapshot = controller.wait_settled("stats").await.unwrap();
        assert_eq!(snapshot.status, ViewStatus::Idle);
        assert_eq!(snapshot.error, None);
        assert_eq!(snapshot.data, Some(json!({"assets": {"total": 3}})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_reports_session_expired() {
        let server = FakeServer::new("valid-0");
        server.refresh_ok.store(false, Ordering::SeqCst);
        server.revoke_access();
        let store = logged_in();
        let controller = controller(&server, store.clone(), vec![dashboard()]);
        let mut events = controller.events();

        let snapshot = controller.refresh("dashboard").await.unwrap();
        assert_eq!(snapshot.status, ViewStatus::Error);

        let mut failure = None;
        loop {
            match events.recv().await.unwrap() {
                SyncEvent::Failed { error, .. } => failure = Some(error),
                SyncEvent::SessionExpired => break,
                SyncEvent::StatusChanged { .. } => {}
            }
        }
        assert_eq!(failure, Some(ApiError::SessionExpired));
        assert_eq!(store.status(), AuthStatus::Expired);

        controller.refresh("dashboard").await.unwrap();
        assert_eq!(server.calls_to("/dashboard").last(), Some(&None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_expired_is_reported_once_per_expiry() {
        let server = FakeServer::new("valid-0");
        server.refresh_ok.store(false, Ordering::SeqCst);
        server.revoke_access();
        let controller = controller(&server, logged_in(), Config::default().view_specs());
        let mut events = controller.events();

        let expired_events = |events: &mut broadcast::Receiver<SyncEvent>| {
            let mut count = 0;
            while let Ok(event) = events.try_recv() {
                if matches!(event, SyncEvent::SessionExpired) {
                    count += 1;
                }
            }
            count
        };

        let results = controller.refresh_all().await;
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        assert!(results.iter().all(|(_, s)| s.status == ViewStatus::Error));
        assert_eq!(expired_events(&mut events), 1);

        // Already expired: later failures don't repeat it
        controller.refresh("stats").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        assert_eq!(expired_events(&mut events), 0);

        // A new session that expires again is reported again
        controller
            .executor()
            .login("ops@example.com", "correct")
            .await
            .unwrap();
        server.revoke_access();
        controller.refresh("dashboard").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        assert_eq!(expired_events(&mut events), 1);
    }

    #[tokio::test]
    async fn test_views_seed_from_cache_and_save_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ViewCache::new(dir.path().to_path_buf()).unwrap();
        cache.save("dashboard", &json!({"kpis": []})).unwrap();

        let server = FakeServer::new("valid-0");
        let executor = RequestExecutor::from_shared(Arc::clone(&server), logged_in());
        let controller = SyncController::new(executor, vec![dashboard()], Some(cache.clone()));

        let seeded = controller.snapshot("dashboard").unwrap();
        assert_eq!(seeded.status, ViewStatus::Idle);
        assert_eq!(seeded.data, Some(json!({"kpis": []})));
        assert!(seeded.last_updated.is_some());

        controller.refresh("dashboard").await.unwrap();
        let cached = cache.load::<Value>("dashboard").unwrap().unwrap();
        assert_eq!(cached.data["path"], "/dashboard");
    }

    #[tokio::test]
    async fn test_refresh_all_and_unknown_view() {
        let server = FakeServer::new("valid-0");
        let controller = controller(&server, logged_in(), Config::default().view_specs());

        let results = controller.refresh_all().await;
        let names: Vec<&str> = results.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["dashboard", "open_alerts", "stats"]);
        assert!(results.iter().all(|(_, s)| s.status == ViewStatus::Idle));
        assert_eq!(controller.freshness(), ViewStatus::Idle);

        server.respond("/api/stats", 503, "maintenance");
        controller.refresh("stats").await.unwrap();
        assert_eq!(controller.freshness(), ViewStatus::Error);

        assert_eq!(
            controller.refresh("nope").await,
            Err(SyncError::UnknownView("nope".to_string()))
        );
    }

    #[tokio::test]
    async fn test_start_subscribes_to_view_topics() {
        let server = FakeServer::new("valid-0");
        let controller = controller(&server, logged_in(), Config::default().view_specs());
        let channel = RealtimeChannel::new();

        controller.start(&channel);
        assert_eq!(
            channel.active_topics(),
            vec!["alerts".to_string(), "production".to_string()]
        );

        controller.stop();
        assert!(channel.active_topics().is_empty());
    }
}
