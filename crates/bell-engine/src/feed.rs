//! Feed reconciler — the in-memory ordered notification collection for one
//! mounted widget view.
//!
//! The feed merges three inputs: reset fetches (`load_initial`), cursor
//! pagination (`load_more`, upper-bounded by the oldest held timestamp), and
//! push deltas arriving as bus events. Ordering invariant: descending
//! `created_at`, ties broken by insertion order — push-delivered items win
//! head position. Identifiers are unique within the feed.
//!
//! All mutation flows through confirmed backend state: the panel's own
//! fetches, or events published by the action gateway / session manager.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use bell_types::error::{ApiResult, InboxError};
use bell_types::event::FeedEvent;
use bell_types::notification::{FeedFilter, Notification, NotificationPage, PageQuery, SortOrder};

use crate::actions::ActionGateway;
use crate::api::PushKind;
use crate::bus::{EventBus, Subscription};
use crate::session::{ErrorCallback, SessionManager, VerificationStatus};

/// Observable feed state. `error` replaces the list in the UI; it never
/// blocks a later `load_initial`.
#[derive(Debug, Clone)]
pub struct FeedState {
    pub items: Vec<Notification>,
    pub loading: bool,
    pub end_reached: bool,
    pub error: Option<InboxError>,
    pub filter: FeedFilter,
}

impl Default for FeedState {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            loading: false,
            end_reached: false,
            error: None,
            filter: FeedFilter::All,
        }
    }
}

struct FeedInner {
    session: Arc<SessionManager>,
    actions: ActionGateway,
    on_error: Option<ErrorCallback>,
    page_size: usize,
    state: Mutex<FeedState>,
    /// Bumped on every reset/close; an async fetch resolving under a stale
    /// epoch discards its result instead of updating a reused or closed feed.
    epoch: AtomicU64,
    closed: AtomicBool,
    subscription: Mutex<Option<Subscription>>,
}

/// Handle to one mounted feed. Cloning shares the same feed.
#[derive(Clone)]
pub struct FeedPanel {
    inner: Arc<FeedInner>,
}

impl FeedPanel {
    /// Mount a feed: subscribes to this instance's list channel. No fetch
    /// happens until `load_initial`.
    pub fn mount(
        bus: &EventBus,
        session: Arc<SessionManager>,
        actions: ActionGateway,
        page_size: usize,
        on_error: Option<ErrorCallback>,
    ) -> Self {
        let inner = Arc::new(FeedInner {
            session: Arc::clone(&session),
            actions,
            on_error,
            page_size,
            state: Mutex::new(FeedState::default()),
            epoch: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            subscription: Mutex::new(None),
        });
        let weak = Arc::downgrade(&inner);
        let sub = bus.subscribe(&session.list_channel(), move |event| {
            if let Some(inner) = weak.upgrade() {
                apply_event(&inner, event);
            }
        });
        *inner.subscription.lock().unwrap() = Some(sub);
        Self { inner }
    }

    pub fn state(&self) -> FeedState {
        self.inner.state.lock().unwrap().clone()
    }

    /// Reset fetch: replaces the feed contents with the first page for
    /// `filter`. Waits for verification to settle first; a failed session
    /// becomes a feed-level error. On success the notification push stream
    /// is (re)started with the refreshed cursor and the newest item is
    /// marked viewed.
    pub async fn load_initial(&self, filter: FeedFilter) -> ApiResult<()> {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut state = self.inner.state.lock().unwrap();
            state.filter = filter;
            state.error = None;
            state.end_reached = false;
            state.loading = true;
        }

        let status = self.await_verified().await;
        if status != VerificationStatus::Success {
            let err = InboxError::invalid_credentials();
            self.fail(epoch, err.clone());
            return Err(err);
        }
        let api = match self.inner.session.api() {
            Some(api) => api,
            None => {
                let err = InboxError::no_session();
                self.fail(epoch, err.clone());
                return Err(err);
            }
        };

        let query = PageQuery::first_page(self.inner.page_size, filter);
        let result = api.fetch_page(query).await;
        if self.stale(epoch) {
            debug!("initial fetch resolved after reset, discarding");
            return Ok(());
        }
        let page = match result {
            Ok(page) => page,
            Err(err) => {
                self.fail(epoch, err.clone());
                return Err(err);
            }
        };

        let newest = page.data.first().map(|n| n.created_at);
        let end_reached = end_of_feed(&page, self.inner.page_size);
        {
            let mut state = self.inner.state.lock().unwrap();
            state.items = page.data;
            state.loading = false;
            state.end_reached = end_reached;
        }

        if let Some(until) = newest {
            self.mark_viewed(until).await;
        }

        // A close or reset racing the awaits above owns the stream now.
        if self.stale(epoch) {
            return Ok(());
        }

        // Restart the push stream from the refreshed head so deliveries are
        // strictly newer than anything held.
        let push_query = PageQuery {
            size: self.inner.page_size,
            start: Some(newest.unwrap_or_else(Utc::now)),
            end: None,
            filter,
            sort: SortOrder::Desc,
        };
        api.start_push(PushKind::Notifications, push_query).await;
        Ok(())
    }

    /// Append fetch: next page below the oldest held timestamp. No-op while
    /// loading, at end of feed, or on an empty feed. Never marks viewed.
    pub async fn load_more(&self) -> ApiResult<()> {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let (cursor, filter) = {
            let mut state = self.inner.state.lock().unwrap();
            if state.loading || state.end_reached {
                return Ok(());
            }
            let oldest = match state.items.last() {
                Some(n) => n.created_at,
                None => return Ok(()),
            };
            state.loading = true;
            (oldest, state.filter)
        };

        let api = match self.inner.session.api() {
            Some(api) => api,
            None => {
                let err = InboxError::no_session();
                self.fail(epoch, err.clone());
                return Err(err);
            }
        };
        let query = PageQuery {
            size: self.inner.page_size,
            start: None,
            end: Some(cursor),
            filter,
            sort: SortOrder::Desc,
        };
        let result = api.fetch_page(query).await;
        if self.stale(epoch) {
            debug!("page fetch resolved after reset, discarding");
            return Ok(());
        }
        match result {
            Ok(page) => {
                let end_reached = end_of_feed(&page, self.inner.page_size);
                let mut state = self.inner.state.lock().unwrap();
                for item in page.data {
                    if !state.items.iter().any(|n| n.id == item.id) {
                        state.items.push(item);
                    }
                }
                state.loading = false;
                state.end_reached = end_reached;
                Ok(())
            }
            Err(err) => {
                self.fail(epoch, err.clone());
                Err(err)
            }
        }
    }

    /// Clear-all: delete-by-date at the newest held timestamp. The action
    /// gateway publishes `DeleteAll` on success so sibling views of the same
    /// instance converge; locally the feed empties and ends.
    pub async fn clear_all(&self) -> ApiResult<()> {
        let newest = match self.inner.state.lock().unwrap().items.first() {
            Some(n) => n.created_at,
            None => return Ok(()),
        };
        match self.inner.actions.delete_by_date(newest, None).await {
            Ok(()) => {
                // An in-flight page fetch must not repopulate the emptied feed.
                self.inner.epoch.fetch_add(1, Ordering::SeqCst);
                let mut state = self.inner.state.lock().unwrap();
                state.items.clear();
                state.end_reached = true;
                state.loading = false;
                state.error = None;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Unmount: stop the notification push, unsubscribe from the bus, clear
    /// the feed, and mark everything up to now viewed so the badge reflects
    /// what was on screen.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(sub) = self.inner.subscription.lock().unwrap().take() {
            sub.cancel();
        }
        if let Some(api) = self.inner.session.api() {
            api.stop_push(PushKind::Notifications).await;
        }
        self.inner.state.lock().unwrap().items.clear();
        self.mark_viewed(Utc::now()).await;
    }

    async fn await_verified(&self) -> VerificationStatus {
        let mut rx = self.inner.session.watch_status();
        let status = match rx.wait_for(|s| *s != VerificationStatus::Pending).await {
            Ok(status) => *status,
            Err(_) => VerificationStatus::Failed,
        };
        status
    }

    async fn mark_viewed(&self, until: DateTime<Utc>) {
        if let Err(err) = self.inner.actions.mark_all_viewed(until).await {
            warn!(code = %err.code, "mark viewed failed");
        }
    }

    fn stale(&self, epoch: u64) -> bool {
        self.inner.epoch.load(Ordering::SeqCst) != epoch || self.inner.closed.load(Ordering::SeqCst)
    }

    fn fail(&self, epoch: u64, err: InboxError) {
        if !self.stale(epoch) {
            let mut state = self.inner.state.lock().unwrap();
            state.loading = false;
            state.end_reached = true;
            state.error = Some(err.clone());
        }
        self.report(&err);
    }

    fn report(&self, err: &InboxError) {
        if let Some(cb) = &self.inner.on_error {
            cb(err);
        }
    }
}

/// The one end-of-feed rule: explicit last-page marker, or a short page
/// (which covers the zero-item case).
fn end_of_feed(page: &NotificationPage, requested: usize) -> bool {
    page.meta.as_ref().map(|m| m.last).unwrap_or(false) || page.data.len() < requested
}

/// Apply one bus event to the feed. Runs synchronously inside publish.
fn apply_event(inner: &Arc<FeedInner>, event: &FeedEvent) {
    match event {
        FeedEvent::NewItems { items } => {
            let newest = {
                let mut state = inner.state.lock().unwrap();
                // Push delivers strictly newer items; drop any id we already
                // hold, then prepend preserving delivery order.
                state.items.retain(|n| !items.iter().any(|i| i.id == n.id));
                state.items.splice(0..0, items.iter().cloned());
                state.items.first().map(|n| n.created_at)
            };
            if let Some(until) = newest {
                let actions = inner.actions.clone();
                tokio::spawn(async move {
                    if let Err(err) = actions.mark_all_viewed(until).await {
                        warn!(code = %err.code, "mark viewed failed");
                    }
                });
            }
        }
        FeedEvent::MarkOneRead { id } => {
            let mut state = inner.state.lock().unwrap();
            for n in &mut state.items {
                if n.id == *id {
                    n.is_read = true;
                }
            }
        }
        FeedEvent::MarkAllRead => {
            let mut state = inner.state.lock().unwrap();
            for n in &mut state.items {
                n.is_read = true;
            }
        }
        FeedEvent::DeleteOne { id } => {
            let mut state = inner.state.lock().unwrap();
            state.items.retain(|n| n.id != *id);
        }
        FeedEvent::DeleteAll => {
            inner.state.lock().unwrap().items.clear();
        }
        FeedEvent::ResetFeed => {
            inner.epoch.fetch_add(1, Ordering::SeqCst);
            let mut state = inner.state.lock().unwrap();
            state.items.clear();
            state.loading = false;
            state.end_reached = false;
            state.error = None;
        }
        // Count events travel on the count channel; nothing to do here.
        FeedEvent::CountUpdate { .. } | FeedEvent::ResetCount => {}
    }
}
