//! Session manager — owns the backend-client handle and drives the token
//! verification state machine.
//!
//! One manager per widget configuration. Reconfiguring stops the previous
//! handle's push streams, resets both instance channels (so stale UI state
//! is cleared before the new session exists), then creates a fresh handle
//! and verifies it. Recoverable auth failures are retried on a fixed delay,
//! bounded by `MAX_RETRY_COUNT`; the retry timer is an explicit task handle
//! aborted on teardown so it can never fire after disposal.

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use bell_types::config::{Credentials, MAX_RETRY_COUNT, RETRY_DELAY};
use bell_types::error::InboxError;
use bell_types::event::{count_channel, list_channel, FeedEvent};

use crate::api::{ApiFactory, NotificationApi, PushDelivery, PushKind, PushSink};
use crate::bus::EventBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    Pending,
    Success,
    Failed,
}

/// External error hook: verification, feed, and action errors are all routed
/// here in addition to their typed return paths.
pub type ErrorCallback = Arc<dyn Fn(&InboxError) + Send + Sync>;

struct SessionInner {
    api: Option<Arc<dyn NotificationApi>>,
    credentials: Option<Credentials>,
    retry_count: u32,
    retry_task: Option<JoinHandle<()>>,
    /// Bumped on every configure/shutdown. A verification that resolves
    /// under an older generation belongs to a replaced or dropped handle
    /// and must not touch the state machine.
    generation: u64,
}

pub struct SessionManager {
    weak_self: Weak<SessionManager>,
    bus: EventBus,
    factory: Arc<dyn ApiFactory>,
    /// Random, collision-resistant, generated once per manager lifetime.
    /// Scopes the bus channel names so co-mounted widgets never cross-talk.
    instance_id: String,
    on_error: Option<ErrorCallback>,
    status_tx: watch::Sender<VerificationStatus>,
    inner: Mutex<SessionInner>,
}

impl SessionManager {
    pub fn new(
        bus: EventBus,
        factory: Arc<dyn ApiFactory>,
        on_error: Option<ErrorCallback>,
    ) -> Arc<Self> {
        let (status_tx, _) = watch::channel(VerificationStatus::Pending);
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            bus,
            factory,
            instance_id: Uuid::new_v4().to_string(),
            on_error,
            status_tx,
            inner: Mutex::new(SessionInner {
                api: None,
                credentials: None,
                retry_count: 0,
                retry_task: None,
                generation: 0,
            }),
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn list_channel(&self) -> String {
        list_channel(&self.instance_id)
    }

    pub fn count_channel(&self) -> String {
        count_channel(&self.instance_id)
    }

    pub fn status(&self) -> VerificationStatus {
        *self.status_tx.borrow()
    }

    /// Watch channel for verification transitions. Downstream fetchers wait
    /// on this instead of polling.
    pub fn watch_status(&self) -> watch::Receiver<VerificationStatus> {
        self.status_tx.subscribe()
    }

    /// Borrow the current backend handle, if a session exists.
    pub fn api(&self) -> Option<Arc<dyn NotificationApi>> {
        self.inner.lock().unwrap().api.clone()
    }

    /// Apply a (new) configuration. Tears down the previous handle, resets
    /// both instance channels, then verifies the new credentials. Missing or
    /// incomplete credentials fail immediately without a connection attempt.
    pub async fn configure(&self, credentials: Option<Credentials>) {
        let previous = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(task) = inner.retry_task.take() {
                task.abort();
            }
            inner.retry_count = 0;
            inner.generation += 1;
            inner.api.take()
        };
        if let Some(api) = previous {
            api.stop_push(PushKind::Notifications).await;
            api.stop_push(PushKind::UnviewedCount).await;
        }

        self.bus.publish(&self.list_channel(), &FeedEvent::ResetFeed);
        self.bus.publish(&self.count_channel(), &FeedEvent::ResetCount);

        match credentials {
            Some(creds) if creds.is_complete() => {
                self.inner.lock().unwrap().credentials = Some(creds);
                self.initialize();
            }
            _ => {
                warn!(instance = %self.instance_id, "missing credentials, verification failed");
                self.status_tx.send_replace(VerificationStatus::Failed);
                self.report(&InboxError::invalid_credentials());
            }
        }
    }

    /// Create a backend handle for the stored credentials and start a
    /// verification attempt. Called on configure and on every retry.
    fn initialize(&self) {
        let (creds, generation) = {
            let inner = self.inner.lock().unwrap();
            match inner.credentials.clone() {
                Some(creds) => (creds, inner.generation),
                None => return,
            }
        };
        let api = self.factory.create(&creds, self.push_sink());
        self.inner.lock().unwrap().api = Some(Arc::clone(&api));
        self.status_tx.send_replace(VerificationStatus::Pending);

        let weak = self.weak_self.clone();
        tokio::spawn(async move {
            let result = api.verify_token().await;
            let Some(manager) = weak.upgrade() else {
                return;
            };
            if manager.inner.lock().unwrap().generation != generation {
                debug!(instance = %manager.instance_id, "stale verification result discarded");
                return;
            }
            match result {
                Ok(()) => {
                    info!(instance = %manager.instance_id, "token verified");
                    manager.status_tx.send_replace(VerificationStatus::Success);
                }
                Err(err) => manager.on_verification_failure(err),
            }
        });
    }

    /// Sink installed on every handle: translate push deliveries into bus
    /// events on the instance channels. No merging happens here.
    fn push_sink(&self) -> PushSink {
        let bus = self.bus.clone();
        let list = self.list_channel();
        let count = self.count_channel();
        Arc::new(move |delivery| match delivery {
            PushDelivery::Notifications(items) => {
                if !items.is_empty() {
                    debug!(n = items.len(), "push delivered new notifications");
                    bus.publish(&list, &FeedEvent::NewItems { items });
                }
            }
            PushDelivery::Count(n) => {
                bus.publish(&count, &FeedEvent::CountUpdate { count: n });
            }
        })
    }

    fn on_verification_failure(&self, err: InboxError) {
        self.status_tx.send_replace(VerificationStatus::Failed);
        self.report(&err);

        let mut inner = self.inner.lock().unwrap();
        if !err.is_recoverable_auth() || inner.retry_count >= MAX_RETRY_COUNT {
            warn!(
                instance = %self.instance_id,
                code = %err.code,
                retries = inner.retry_count,
                "verification failed permanently"
            );
            return;
        }
        inner.retry_count += 1;
        info!(
            instance = %self.instance_id,
            attempt = inner.retry_count,
            max = MAX_RETRY_COUNT,
            "scheduling verification retry"
        );
        let weak = self.weak_self.clone();
        inner.retry_task = Some(tokio::spawn(async move {
            tokio::time::sleep(RETRY_DELAY).await;
            if let Some(manager) = weak.upgrade() {
                manager.initialize();
            }
        }));
    }

    fn report(&self, err: &InboxError) {
        if let Some(cb) = &self.on_error {
            cb(err);
        }
    }

    /// Tear the session down: cancel any pending retry, stop push streams,
    /// drop the handle. In-flight verification for the dropped handle is
    /// ignored when it resolves.
    pub async fn shutdown(&self) {
        let api = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(task) = inner.retry_task.take() {
                task.abort();
            }
            inner.credentials = None;
            inner.generation += 1;
            inner.api.take()
        };
        if let Some(api) = api {
            api.stop_push(PushKind::Notifications).await;
            api.stop_push(PushKind::UnviewedCount).await;
        }
        self.status_tx.send_replace(VerificationStatus::Failed);
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(task) = self.inner.lock().unwrap().retry_task.take() {
            task.abort();
        }
    }
}
