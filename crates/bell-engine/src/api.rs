//! Backend collaborator contract.
//!
//! The engine never talks HTTP directly; it borrows a `NotificationApi`
//! handle owned by the session manager. A new handle is created through the
//! `ApiFactory` seam on every (re)configuration, which is also where tests
//! inject an in-memory backend.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use bell_types::config::Credentials;
use bell_types::error::ApiResult;
use bell_types::notification::{Notification, NotificationPage, PageQuery, UnviewedCount};

/// The two push streams a backend client can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushKind {
    Notifications,
    UnviewedCount,
}

impl std::fmt::Display for PushKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Notifications => write!(f, "notifications"),
            Self::UnviewedCount => write!(f, "unviewed-count"),
        }
    }
}

/// One out-of-band delivery from the backend.
#[derive(Debug, Clone)]
pub enum PushDelivery {
    Notifications(Vec<Notification>),
    Count(u64),
}

/// Callback invoked by the client for every push delivery. The session
/// manager installs one per handle and republishes onto the event bus.
pub type PushSink = Arc<dyn Fn(PushDelivery) + Send + Sync>;

/// One backend-client handle. Exclusively owned by the session manager;
/// every other component borrows it through method calls and must tolerate
/// it being absent (no session yet).
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// Verify the configured token/recipient pair.
    async fn verify_token(&self) -> ApiResult<()>;

    async fn fetch_page(&self, query: PageQuery) -> ApiResult<NotificationPage>;

    async fn fetch_unviewed_count(&self) -> ApiResult<UnviewedCount>;

    async fn mark_read_by_id(&self, id: &str) -> ApiResult<()>;

    async fn mark_read_by_date(
        &self,
        until: DateTime<Utc>,
        category: Option<&str>,
    ) -> ApiResult<()>;

    async fn delete_by_id(&self, id: &str) -> ApiResult<()>;

    async fn delete_by_date(&self, until: DateTime<Utc>, category: Option<&str>) -> ApiResult<()>;

    /// Inform the backend that everything up to `until` has been seen. This
    /// is what zeroes the unviewed badge count server-side.
    async fn mark_all_viewed(&self, until: DateTime<Utc>) -> ApiResult<()>;

    /// Start (or restart) the given push stream. Deliveries arrive on the
    /// sink the handle was constructed with. Best-effort: missed deliveries
    /// are reconciled by the next page fetch.
    async fn start_push(&self, kind: PushKind, query: PageQuery);

    async fn stop_push(&self, kind: PushKind);
}

/// Creates backend handles. One handle per configuration lifetime.
pub trait ApiFactory: Send + Sync {
    fn create(&self, credentials: &Credentials, sink: PushSink) -> Arc<dyn NotificationApi>;
}
