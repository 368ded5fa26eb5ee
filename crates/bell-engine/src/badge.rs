//! Badge counter — the unviewed-count scalar behind the bell icon.
//!
//! Count deliveries replace the stored value verbatim; the badge never
//! increments locally. The count push runs only while the panel is closed
//! (an open panel marks items viewed as they arrive, so the badge would
//! flicker), and `display()` caps what is shown without touching the value.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use bell_types::config::MAX_BADGE_COUNT;
use bell_types::event::FeedEvent;
use bell_types::notification::{FeedFilter, PageQuery};

use crate::api::PushKind;
use crate::bus::{EventBus, Subscription};
use crate::session::SessionManager;

struct BadgeInner {
    session: Arc<SessionManager>,
    hidden: bool,
    count: AtomicU64,
    panel_open: AtomicBool,
    subscription: Mutex<Option<Subscription>>,
}

/// Handle to one mounted badge. Cloning shares the same counter.
#[derive(Clone)]
pub struct BadgeCounter {
    inner: Arc<BadgeInner>,
}

impl BadgeCounter {
    /// Mount the badge: subscribe to the count channel, fetch the current
    /// count once, and start the count push. A hidden badge subscribes to
    /// nothing and stays at zero.
    pub async fn mount(bus: &EventBus, session: Arc<SessionManager>, hidden: bool) -> Self {
        let inner = Arc::new(BadgeInner {
            session: Arc::clone(&session),
            hidden,
            count: AtomicU64::new(0),
            panel_open: AtomicBool::new(false),
            subscription: Mutex::new(None),
        });
        let badge = Self { inner };
        if hidden {
            return badge;
        }

        let weak = Arc::downgrade(&badge.inner);
        let sub = bus.subscribe(&session.count_channel(), move |event| {
            let Some(inner) = weak.upgrade() else { return };
            match event {
                FeedEvent::CountUpdate { count } => {
                    inner.count.store(*count, Ordering::SeqCst);
                }
                FeedEvent::ResetCount => {
                    inner.count.store(0, Ordering::SeqCst);
                }
                _ => {}
            }
        });
        *badge.inner.subscription.lock().unwrap() = Some(sub);

        badge.refresh().await;
        badge.start_push().await;
        badge
    }

    /// Re-fetch the count from the backend. Failures keep the last value.
    pub async fn refresh(&self) {
        if self.inner.hidden {
            return;
        }
        let Some(api) = self.inner.session.api() else {
            return;
        };
        match api.fetch_unviewed_count().await {
            Ok(count) => {
                self.inner
                    .count
                    .store(count.unviewed_count, Ordering::SeqCst);
            }
            Err(err) => warn!(code = %err.code, "unviewed count fetch failed"),
        }
    }

    /// Toggle the count push with the panel: off while open, back on (with a
    /// refresh) when it closes.
    pub async fn set_panel_open(&self, open: bool) {
        if self.inner.hidden {
            return;
        }
        let was_open = self.inner.panel_open.swap(open, Ordering::SeqCst);
        if open == was_open {
            return;
        }
        if open {
            if let Some(api) = self.inner.session.api() {
                api.stop_push(PushKind::UnviewedCount).await;
            }
        } else {
            self.refresh().await;
            self.start_push().await;
        }
    }

    pub fn count(&self) -> u64 {
        self.inner.count.load(Ordering::SeqCst)
    }

    /// Rendered badge text. Empty when hidden or zero; capped with a `+`
    /// suffix above `MAX_BADGE_COUNT` without altering the stored value.
    pub fn display(&self) -> String {
        if self.inner.hidden {
            return String::new();
        }
        match self.count() {
            0 => String::new(),
            n if n > MAX_BADGE_COUNT => format!("{MAX_BADGE_COUNT}+"),
            n => n.to_string(),
        }
    }

    /// Unmount: stop the count push and unsubscribe.
    pub async fn close(&self) {
        if let Some(sub) = self.inner.subscription.lock().unwrap().take() {
            sub.cancel();
        }
        if self.inner.hidden {
            return;
        }
        if let Some(api) = self.inner.session.api() {
            api.stop_push(PushKind::UnviewedCount).await;
        }
    }

    async fn start_push(&self) {
        if let Some(api) = self.inner.session.api() {
            api.start_push(
                PushKind::UnviewedCount,
                PageQuery::first_page(1, FeedFilter::All),
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{mounted_session, MockBackend};

    async fn mounted_badge(backend: &Arc<MockBackend>) -> (BadgeCounter, EventBus) {
        let (bus, session) = mounted_session(backend).await;
        let badge = BadgeCounter::mount(&bus, session, false).await;
        (badge, bus)
    }

    #[tokio::test]
    async fn mount_fetches_and_starts_the_count_push() {
        let backend = MockBackend::new();
        backend.set_unviewed_count(4);
        let (badge, _bus) = mounted_badge(&backend).await;
        assert_eq!(badge.count(), 4);
        assert!(backend.push_active(PushKind::UnviewedCount));
    }

    #[tokio::test]
    async fn count_deliveries_replace_the_value_verbatim() {
        let backend = MockBackend::new();
        backend.set_unviewed_count(10);
        let (badge, _bus) = mounted_badge(&backend).await;

        backend.push_count(3);
        assert_eq!(badge.count(), 3);
        backend.push_count(12);
        assert_eq!(badge.count(), 12);
    }

    #[tokio::test]
    async fn reset_event_zeroes_the_badge() {
        let backend = MockBackend::new();
        backend.set_unviewed_count(5);
        let (badge, bus) = mounted_badge(&backend).await;

        let channel = badge.inner.session.count_channel();
        bus.publish(&channel, &FeedEvent::ResetCount);
        assert_eq!(badge.count(), 0);
        assert_eq!(badge.display(), "");
    }

    #[tokio::test]
    async fn display_caps_without_altering_the_count() {
        let backend = MockBackend::new();
        let (badge, _bus) = mounted_badge(&backend).await;

        backend.push_count(99);
        assert_eq!(badge.display(), "99");
        backend.push_count(100);
        assert_eq!(badge.display(), "99+");
        assert_eq!(badge.count(), 100);
    }

    #[tokio::test]
    async fn panel_toggles_the_count_push() {
        let backend = MockBackend::new();
        let (badge, _bus) = mounted_badge(&backend).await;
        assert!(backend.push_active(PushKind::UnviewedCount));

        badge.set_panel_open(true).await;
        assert!(!backend.push_active(PushKind::UnviewedCount));

        // Closing refreshes and resumes the push.
        backend.set_unviewed_count(2);
        badge.set_panel_open(false).await;
        assert_eq!(badge.count(), 2);
        assert!(backend.push_active(PushKind::UnviewedCount));
    }

    #[tokio::test]
    async fn hidden_badge_stays_silent() {
        let backend = MockBackend::new();
        backend.set_unviewed_count(9);
        let (bus, session) = mounted_session(&backend).await;
        let badge = BadgeCounter::mount(&bus, session, true).await;

        assert!(!backend.push_active(PushKind::UnviewedCount));
        backend.push_count(9);
        assert_eq!(badge.count(), 0);
        assert_eq!(badge.display(), "");
    }

    #[tokio::test]
    async fn close_stops_push_and_detaches() {
        let backend = MockBackend::new();
        let (badge, _bus) = mounted_badge(&backend).await;
        badge.close().await;
        assert!(!backend.push_active(PushKind::UnviewedCount));

        backend.push_count(8);
        assert_eq!(badge.count(), 0);
    }
}
