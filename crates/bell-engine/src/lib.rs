//! Notification inbox engine.
//!
//! Headless synchronization core for an in-app notification widget: an
//! event bus scoped per widget instance, a session manager driving token
//! verification with bounded retry, a feed reconciler merging paginated
//! history with push deliveries, an action gateway for confirmed mutations,
//! and an unviewed-count badge. `Inbox` wires them together for one
//! configuration; everything is also usable piecemeal behind the
//! `NotificationApi` seam.

pub mod actions;
pub mod api;
pub mod badge;
pub mod bus;
pub mod feed;
pub mod http;
pub mod session;

#[cfg(test)]
pub(crate) mod testutil;

use std::sync::Arc;

use bell_types::config::InboxConfig;

pub use crate::actions::ActionGateway;
pub use crate::api::{ApiFactory, NotificationApi, PushDelivery, PushKind, PushSink};
pub use crate::badge::BadgeCounter;
pub use crate::bus::{EventBus, Subscription};
pub use crate::feed::{FeedPanel, FeedState};
pub use crate::http::HttpApiFactory;
pub use crate::session::{ErrorCallback, SessionManager, VerificationStatus};

/// One configured inbox instance: bus, session, and gateway, ready to mount
/// feeds and badges. Instances never cross-talk; each carries its own
/// instance id scoping its bus channels.
pub struct Inbox {
    config: InboxConfig,
    bus: EventBus,
    session: Arc<SessionManager>,
    actions: ActionGateway,
    on_error: Option<ErrorCallback>,
}

impl Inbox {
    /// Build and immediately configure an inbox. Verification starts in the
    /// background; mounted feeds wait for it before fetching.
    pub async fn new(
        config: InboxConfig,
        factory: Arc<dyn ApiFactory>,
        on_error: Option<ErrorCallback>,
    ) -> Self {
        let bus = EventBus::new();
        let session = SessionManager::new(bus.clone(), factory, on_error.clone());
        session.configure(Some(config.credentials.clone())).await;
        let actions = ActionGateway::new(Arc::clone(&session), bus.clone(), on_error.clone());
        Self {
            config,
            bus,
            session,
            actions,
            on_error,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn actions(&self) -> ActionGateway {
        self.actions.clone()
    }

    /// Mount a feed view. Call `load_initial` on the returned panel to fetch.
    pub fn mount_feed(&self) -> FeedPanel {
        FeedPanel::mount(
            &self.bus,
            Arc::clone(&self.session),
            self.actions.clone(),
            self.config.page_size(),
            self.on_error.clone(),
        )
    }

    /// Mount the badge counter; respects `hide_badge` from the config.
    pub async fn mount_badge(&self) -> BadgeCounter {
        BadgeCounter::mount(&self.bus, Arc::clone(&self.session), self.config.hide_badge).await
    }

    /// Swap the configuration in place. Mounted feeds observe the reset on
    /// the bus and clear; call `load_initial` again once reverified.
    pub async fn reconfigure(&mut self, config: InboxConfig) {
        self.config = config;
        self.session
            .configure(Some(self.config.credentials.clone()))
            .await;
    }

    /// Tear the session down. Mounted panels keep their handles but every
    /// further operation resolves to a no-session error.
    pub async fn shutdown(&self) {
        self.session.shutdown().await;
    }
}
