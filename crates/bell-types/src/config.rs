use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::notification::FeedFilter;

/// Page size requested from the backend is clamped to this regardless of
/// caller configuration, bounding memory and request cost.
pub const MAX_FETCH_SIZE: usize = 50;

/// Retries after a recoverable verification failure: 1 initial attempt plus
/// at most this many reinitializations.
pub const MAX_RETRY_COUNT: u32 = 3;

/// Fixed delay before a verification retry.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Largest unviewed count rendered on the badge; anything above shows as
/// "99+" while the stored count stays exact.
pub const MAX_BADGE_COUNT: u64 = 99;

/// Widget-facing credentials. Both fields are required; an incomplete pair
/// forces verification straight to `Failed` without a connection attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub user_token: String,
    pub recipient_id: String,
}

impl Credentials {
    pub fn new(user_token: impl Into<String>, recipient_id: impl Into<String>) -> Self {
        Self {
            user_token: user_token.into(),
            recipient_id: recipient_id.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.user_token.is_empty() && !self.recipient_id.is_empty()
    }
}

/// Engine configuration for one mounted inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxConfig {
    pub credentials: Credentials,
    /// Notifications requested per page fetch (clamped to `MAX_FETCH_SIZE`).
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
    /// Suppresses the badge counter entirely.
    #[serde(default)]
    pub hide_badge: bool,
    #[serde(default)]
    pub filter: FeedFilter,
}

fn default_fetch_size() -> usize {
    20
}

impl InboxConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            fetch_size: default_fetch_size(),
            hide_badge: false,
            filter: FeedFilter::All,
        }
    }

    /// Effective page size after the clamp.
    pub fn page_size(&self) -> usize {
        self.fetch_size.min(MAX_FETCH_SIZE).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_credentials_detected() {
        assert!(Credentials::new("t", "r").is_complete());
        assert!(!Credentials::new("", "r").is_complete());
        assert!(!Credentials::new("t", "").is_complete());
    }

    #[test]
    fn fetch_size_is_clamped() {
        let mut cfg = InboxConfig::new(Credentials::new("t", "r"));
        assert_eq!(cfg.page_size(), 20);
        cfg.fetch_size = 500;
        assert_eq!(cfg.page_size(), MAX_FETCH_SIZE);
        cfg.fetch_size = 0;
        assert_eq!(cfg.page_size(), 1);
    }
}
