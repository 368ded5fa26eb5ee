//! In-memory backend for engine tests: a seeded notification store behind
//! the `NotificationApi` trait, with scripted verification results, failure
//! injection, and recorded calls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use bell_types::config::Credentials;
use bell_types::error::{ApiResult, ErrorCode, InboxError};
use bell_types::event::FeedEvent;
use bell_types::notification::{
    FeedFilter, Notification, NotificationPage, PageMeta, PageQuery, UnviewedCount,
};

use crate::api::{ApiFactory, NotificationApi, PushDelivery, PushKind, PushSink};
use crate::bus::{EventBus, Subscription};
use crate::session::{SessionManager, VerificationStatus};

pub(crate) fn recoverable_auth_error() -> InboxError {
    InboxError::new(ErrorCode::AuthenticationFailed, "token rejected")
}

#[derive(Default)]
struct BackendState {
    notifications: Vec<Notification>,
    verify_results: VecDeque<ApiResult<()>>,
    fail_next_mutation: Option<InboxError>,
    fail_next_fetch: Option<InboxError>,
    viewed_calls: Vec<DateTime<Utc>>,
    fetch_queries: Vec<PageQuery>,
    sinks: Vec<PushSink>,
    push_active: Vec<PushKind>,
    meta_enabled: bool,
    unviewed_count: u64,
    verify_delay: Option<Duration>,
    fetch_delay: Option<Duration>,
    viewed_delay: Option<Duration>,
}

/// Shared fake backend. `factory()` hands the session manager an
/// `ApiFactory` whose handles all read and mutate this state.
pub(crate) struct MockBackend {
    state: Mutex<BackendState>,
    handles_created: AtomicU32,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BackendState {
                meta_enabled: true,
                ..Default::default()
            }),
            handles_created: AtomicU32::new(0),
        })
    }

    pub fn factory(self: &Arc<Self>) -> Arc<dyn ApiFactory> {
        Arc::new(MockFactory {
            backend: Arc::clone(self),
        })
    }

    /// Replace the store. Items are kept sorted newest-first, matching the
    /// backend's default sort.
    pub fn seed(&self, mut items: Vec<Notification>) {
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.state.lock().unwrap().notifications = items;
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state.lock().unwrap().notifications.clone()
    }

    pub fn queue_verify_result(&self, result: ApiResult<()>) {
        self.state.lock().unwrap().verify_results.push_back(result);
    }

    pub fn fail_next_mutation(&self, err: InboxError) {
        self.state.lock().unwrap().fail_next_mutation = Some(err);
    }

    pub fn fail_next_fetch(&self, err: InboxError) {
        self.state.lock().unwrap().fail_next_fetch = Some(err);
    }

    pub fn set_meta_enabled(&self, enabled: bool) {
        self.state.lock().unwrap().meta_enabled = enabled;
    }

    pub fn set_unviewed_count(&self, n: u64) {
        self.state.lock().unwrap().unviewed_count = n;
    }

    /// Delay every `verify_token` resolution; drives late-resolution races
    /// under a paused clock.
    pub fn set_verify_delay(&self, delay: Duration) {
        self.state.lock().unwrap().verify_delay = Some(delay);
    }

    /// Delay page-fetch resolutions. The response is snapshotted before the
    /// delay, like a reply already in flight.
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.state.lock().unwrap().fetch_delay = Some(delay);
    }

    pub fn set_viewed_delay(&self, delay: Duration) {
        self.state.lock().unwrap().viewed_delay = Some(delay);
    }

    pub fn viewed_calls(&self) -> Vec<DateTime<Utc>> {
        self.state.lock().unwrap().viewed_calls.clone()
    }

    pub fn fetch_queries(&self) -> Vec<PageQuery> {
        self.state.lock().unwrap().fetch_queries.clone()
    }

    pub fn handles_created(&self) -> u32 {
        self.handles_created.load(Ordering::SeqCst)
    }

    pub fn push_active(&self, kind: PushKind) -> bool {
        self.state.lock().unwrap().push_active.contains(&kind)
    }

    /// Deliver notifications through the most recent handle's push sink.
    pub fn push_notifications(&self, items: Vec<Notification>) {
        let sink = self.state.lock().unwrap().sinks.last().cloned();
        if let Some(sink) = sink {
            sink(PushDelivery::Notifications(items));
        }
    }

    /// Deliver a count snapshot through the most recent handle's push sink.
    pub fn push_count(&self, n: u64) {
        let sink = self.state.lock().unwrap().sinks.last().cloned();
        if let Some(sink) = sink {
            sink(PushDelivery::Count(n));
        }
    }
}

struct MockFactory {
    backend: Arc<MockBackend>,
}

impl ApiFactory for MockFactory {
    fn create(&self, _credentials: &Credentials, sink: PushSink) -> Arc<dyn NotificationApi> {
        self.backend.handles_created.fetch_add(1, Ordering::SeqCst);
        self.backend.state.lock().unwrap().sinks.push(sink);
        Arc::new(MockApi {
            backend: Arc::clone(&self.backend),
        })
    }
}

struct MockApi {
    backend: Arc<MockBackend>,
}

impl MockApi {
    fn take_mutation_failure(&self) -> ApiResult<()> {
        match self.backend.state.lock().unwrap().fail_next_mutation.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl NotificationApi for MockApi {
    async fn verify_token(&self) -> ApiResult<()> {
        let delay = self.backend.state.lock().unwrap().verify_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.backend
            .state
            .lock()
            .unwrap()
            .verify_results
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn fetch_page(&self, query: PageQuery) -> ApiResult<NotificationPage> {
        let (result, delay) = {
            let mut state = self.backend.state.lock().unwrap();
            state.fetch_queries.push(query.clone());
            let delay = state.fetch_delay;
            if let Some(err) = state.fail_next_fetch.take() {
                (Err(err), delay)
            } else {
                let matching: Vec<Notification> = state
                    .notifications
                    .iter()
                    .filter(|n| query.filter != FeedFilter::Unread || !n.is_read)
                    .filter(|n| query.end.map_or(true, |end| n.created_at < end))
                    .filter(|n| query.start.map_or(true, |start| n.created_at > start))
                    .cloned()
                    .collect();
                let data: Vec<Notification> = matching.iter().take(query.size).cloned().collect();
                let meta = state.meta_enabled.then(|| PageMeta {
                    last: matching.len() <= query.size,
                });
                (Ok(NotificationPage { data, meta }), delay)
            }
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn fetch_unviewed_count(&self) -> ApiResult<UnviewedCount> {
        Ok(UnviewedCount {
            unviewed_count: self.backend.state.lock().unwrap().unviewed_count,
        })
    }

    async fn mark_read_by_id(&self, id: &str) -> ApiResult<()> {
        self.take_mutation_failure()?;
        let mut state = self.backend.state.lock().unwrap();
        for n in &mut state.notifications {
            if n.id == id {
                n.is_read = true;
            }
        }
        Ok(())
    }

    async fn mark_read_by_date(
        &self,
        until: DateTime<Utc>,
        _category: Option<&str>,
    ) -> ApiResult<()> {
        self.take_mutation_failure()?;
        let mut state = self.backend.state.lock().unwrap();
        for n in &mut state.notifications {
            if n.created_at <= until {
                n.is_read = true;
            }
        }
        Ok(())
    }

    async fn delete_by_id(&self, id: &str) -> ApiResult<()> {
        self.take_mutation_failure()?;
        let mut state = self.backend.state.lock().unwrap();
        state.notifications.retain(|n| n.id != id);
        Ok(())
    }

    async fn delete_by_date(&self, until: DateTime<Utc>, _category: Option<&str>) -> ApiResult<()> {
        self.take_mutation_failure()?;
        let mut state = self.backend.state.lock().unwrap();
        state.notifications.retain(|n| n.created_at > until);
        Ok(())
    }

    async fn mark_all_viewed(&self, until: DateTime<Utc>) -> ApiResult<()> {
        let delay = self.backend.state.lock().unwrap().viewed_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.take_mutation_failure()?;
        self.backend.state.lock().unwrap().viewed_calls.push(until);
        Ok(())
    }

    async fn start_push(&self, kind: PushKind, _query: PageQuery) {
        let mut state = self.backend.state.lock().unwrap();
        if !state.push_active.contains(&kind) {
            state.push_active.push(kind);
        }
    }

    async fn stop_push(&self, kind: PushKind) {
        self.backend
            .state
            .lock()
            .unwrap()
            .push_active
            .retain(|k| *k != kind);
    }
}

/// A bus plus a session already configured and verified against `backend`.
pub(crate) async fn mounted_session(
    backend: &Arc<MockBackend>,
) -> (EventBus, Arc<SessionManager>) {
    let bus = EventBus::new();
    let session = SessionManager::new(bus.clone(), backend.factory(), None);
    session
        .configure(Some(Credentials::new("t", "r")))
        .await;
    let mut rx = session.watch_status();
    rx.wait_for(|s| *s != VerificationStatus::Pending)
        .await
        .expect("status channel closed");
    (bus, session)
}

/// Record every event published on `channel`. The caller holds the
/// subscription for as long as it wants to keep recording.
pub(crate) fn record_channel(
    bus: &EventBus,
    channel: &str,
) -> (Arc<Mutex<Vec<FeedEvent>>>, Subscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = Arc::clone(&seen);
    let sub = bus.subscribe(channel, move |event| {
        seen2.lock().unwrap().push(event.clone());
    });
    (seen, sub)
}
