//! Action gateway — user mutations as thin, event-publishing wrappers.
//!
//! Every operation calls the backend first and publishes the corresponding
//! bus event only on a confirmed success, so local state never runs ahead of
//! the backend (no optimistic-then-rollback). Subscribers on the instance
//! channels — every mounted feed and the badge — converge from the published
//! event without holding references to each other.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use bell_types::error::{ApiResult, InboxError};
use bell_types::event::FeedEvent;

use crate::api::NotificationApi;
use crate::bus::EventBus;
use crate::session::{ErrorCallback, SessionManager};

#[derive(Clone)]
pub struct ActionGateway {
    session: Arc<SessionManager>,
    bus: EventBus,
    on_error: Option<ErrorCallback>,
}

impl ActionGateway {
    pub fn new(
        session: Arc<SessionManager>,
        bus: EventBus,
        on_error: Option<ErrorCallback>,
    ) -> Self {
        Self {
            session,
            bus,
            on_error,
        }
    }

    fn api(&self) -> ApiResult<Arc<dyn NotificationApi>> {
        self.session
            .api()
            .ok_or_else(InboxError::no_session)
            .inspect_err(|e| self.report(e))
    }

    fn report(&self, err: &InboxError) {
        if let Some(cb) = &self.on_error {
            cb(err);
        }
    }

    fn publish_list(&self, event: FeedEvent) {
        self.bus.publish(&self.session.list_channel(), &event);
    }

    /// Mark one notification read.
    pub async fn mark_read_by_id(&self, id: &str) -> ApiResult<()> {
        if id.is_empty() {
            let err = InboxError::missing_parameter();
            self.report(&err);
            return Err(err);
        }
        let api = self.api()?;
        api.mark_read_by_id(id)
            .await
            .inspect_err(|e| self.report(e))?;
        self.publish_list(FeedEvent::MarkOneRead { id: id.to_string() });
        Ok(())
    }

    /// Mark everything up to `until` read, optionally scoped to a category.
    pub async fn mark_read_by_date(
        &self,
        until: DateTime<Utc>,
        category: Option<&str>,
    ) -> ApiResult<()> {
        let api = self.api()?;
        api.mark_read_by_date(until, category)
            .await
            .inspect_err(|e| self.report(e))?;
        self.publish_list(FeedEvent::MarkAllRead);
        Ok(())
    }

    /// Delete one notification. `should_publish = false` suppresses the bus
    /// event for callers that manage their own list update (the
    /// delete-animation flow removes the row after a timed delay).
    pub async fn delete_by_id(&self, id: &str, should_publish: bool) -> ApiResult<()> {
        if id.is_empty() {
            let err = InboxError::missing_parameter();
            self.report(&err);
            return Err(err);
        }
        let api = self.api()?;
        api.delete_by_id(id).await.inspect_err(|e| self.report(e))?;
        if should_publish {
            self.publish_list(FeedEvent::DeleteOne { id: id.to_string() });
        } else {
            debug!(id, "delete confirmed, publish suppressed by caller");
        }
        Ok(())
    }

    /// Delete everything up to `until` (the clear-all mutation).
    pub async fn delete_by_date(
        &self,
        until: DateTime<Utc>,
        category: Option<&str>,
    ) -> ApiResult<()> {
        let api = self.api()?;
        api.delete_by_date(until, category)
            .await
            .inspect_err(|e| self.report(e))?;
        self.publish_list(FeedEvent::DeleteAll);
        Ok(())
    }

    /// Mark everything up to `until` viewed, zeroing the badge for every
    /// subscriber on this instance.
    pub async fn mark_all_viewed(&self, until: DateTime<Utc>) -> ApiResult<()> {
        let api = self.api()?;
        api.mark_all_viewed(until)
            .await
            .inspect_err(|e| self.report(e))?;
        self.bus.publish(
            &self.session.count_channel(),
            &FeedEvent::CountUpdate { count: 0 },
        );
        Ok(())
    }
}
