use serde::{Deserialize, Serialize};

use crate::notification::Notification;

/// Events carried over the in-process bus.
///
/// This is the single source of truth for local state changes: the session
/// manager publishes `NewItems`/`CountUpdate` from push deliveries, the
/// action gateway publishes mutation confirmations, and every mounted feed
/// or badge converges by applying these. The tag strings are the backend
/// protocol's event identifiers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action")]
pub enum FeedEvent {
    #[serde(rename = "NEW_NOTIFICATIONS")]
    NewItems { items: Vec<Notification> },
    #[serde(rename = "MARK_ITEM_AS_READ")]
    MarkOneRead { id: String },
    #[serde(rename = "MARK_ALL_AS_READ")]
    MarkAllRead,
    #[serde(rename = "DELETE_ITEM")]
    DeleteOne { id: String },
    #[serde(rename = "DELETE_ALL_ITEM")]
    DeleteAll,
    #[serde(rename = "RESET_NOTIFICATIONS")]
    ResetFeed,
    #[serde(rename = "UPDATE_NOTIFICATIONS_COUNT")]
    CountUpdate { count: u64 },
    #[serde(rename = "RESET_NOTIFICATIONS_COUNT")]
    ResetCount,
}

/// Channel carrying list deltas for one session instance.
pub fn list_channel(instance_id: &str) -> String {
    format!("NOTIFICATION_LIST_EVENT{instance_id}")
}

/// Channel carrying unviewed-count updates for one session instance.
pub fn count_channel(instance_id: &str) -> String {
    format!("NOTIFICATION_COUNT_EVENT{instance_id}")
}
