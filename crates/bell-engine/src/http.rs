//! HTTP backend client.
//!
//! Reference `NotificationApi` over the notification service's REST API.
//! Push is implemented as background polling tasks, one per stream kind,
//! delivering onto the handle's sink and aborted on `stop_push`.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use bell_types::config::Credentials;
use bell_types::error::{ApiResult, ErrorCode, InboxError};
use bell_types::notification::{NotificationPage, PageQuery, SortOrder, UnviewedCount};

use crate::api::{ApiFactory, NotificationApi, PushDelivery, PushKind, PushSink};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

// ── Wire types ──────────────────────────────────────────────────────────

/// Every response body is wrapped in this envelope; `error` carries the
/// backend error code as a SCREAMING_SNAKE string.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireError {
    error_code: String,
    message: Option<String>,
}

impl WireError {
    fn into_error(self) -> InboxError {
        let code = ErrorCode::from_str(&self.error_code).unwrap_or(ErrorCode::Unknown);
        InboxError::new(code, self.message.unwrap_or(self.error_code))
    }
}

// ── Factory ─────────────────────────────────────────────────────────────

/// Builds `HttpApi` handles against one service instance. The reqwest client
/// (and its connection pool) is shared across handles.
pub struct HttpApiFactory {
    base_url: String,
    poll_interval: Duration,
    client: reqwest::Client,
}

impl HttpApiFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl ApiFactory for HttpApiFactory {
    fn create(&self, credentials: &Credentials, sink: PushSink) -> Arc<dyn NotificationApi> {
        Arc::new(HttpApi {
            inner: Arc::new(HttpInner {
                client: self.client.clone(),
                base_url: self.base_url.clone(),
                credentials: credentials.clone(),
                sink,
                poll_interval: self.poll_interval,
            }),
            pollers: Mutex::new(HashMap::new()),
        })
    }
}

// ── Client ──────────────────────────────────────────────────────────────

/// Request state shared with the polling tasks.
struct HttpInner {
    client: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    sink: PushSink,
    poll_interval: Duration,
}

pub struct HttpApi {
    inner: Arc<HttpInner>,
    pollers: Mutex<HashMap<PushKind, JoinHandle<()>>>,
}

impl HttpInner {
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.credentials.user_token)
            .header("x-recipient-id", &self.credentials.recipient_id)
    }

    /// Send, unwrap the envelope, map transport and backend failures.
    async fn execute<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> ApiResult<T> {
        let resp = req
            .send()
            .await
            .map_err(|e| InboxError::transport(e.to_string()))?;
        let status = resp.status();
        let envelope: Envelope<T> = resp
            .json()
            .await
            .map_err(|e| InboxError::transport(format!("HTTP {status}: {e}")))?;
        if let Some(err) = envelope.error {
            return Err(err.into_error());
        }
        envelope
            .data
            .ok_or_else(|| InboxError::transport(format!("HTTP {status}: empty response body")))
    }

    /// Like `execute` for operations whose success body carries no data.
    async fn execute_unit(&self, req: reqwest::RequestBuilder) -> ApiResult<()> {
        let resp = req
            .send()
            .await
            .map_err(|e| InboxError::transport(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| InboxError::transport(e.to_string()))?;
        if !body.is_empty() {
            if let Ok(envelope) = serde_json::from_slice::<Envelope<serde_json::Value>>(&body) {
                if let Some(err) = envelope.error {
                    return Err(err.into_error());
                }
            }
        }
        if !status.is_success() {
            return Err(InboxError::transport(format!("HTTP {status}")));
        }
        Ok(())
    }

    async fn fetch_page(&self, query: &PageQuery) -> ApiResult<NotificationPage> {
        let sort = match query.sort {
            SortOrder::Desc => "DESC",
            SortOrder::Asc => "ASC",
        };
        let mut params: Vec<(&str, String)> = vec![
            ("size", query.size.to_string()),
            ("filter", query.filter.to_string()),
            ("sort", sort.to_string()),
        ];
        if let Some(start) = query.start {
            params.push(("start", start.to_rfc3339()));
        }
        if let Some(end) = query.end {
            params.push(("end", end.to_rfc3339()));
        }
        self.execute(
            self.request(reqwest::Method::GET, "/in-app/notifications")
                .query(&params),
        )
        .await
    }

    async fn fetch_unviewed_count(&self) -> ApiResult<UnviewedCount> {
        self.execute(self.request(reqwest::Method::GET, "/in-app/notifications/unviewed/count"))
            .await
    }
}

#[async_trait]
impl NotificationApi for HttpApi {
    async fn verify_token(&self) -> ApiResult<()> {
        self.inner
            .execute_unit(self.inner.request(reqwest::Method::GET, "/in-app/recipients/verify"))
            .await
    }

    async fn fetch_page(&self, query: PageQuery) -> ApiResult<NotificationPage> {
        self.inner.fetch_page(&query).await
    }

    async fn fetch_unviewed_count(&self) -> ApiResult<UnviewedCount> {
        self.inner.fetch_unviewed_count().await
    }

    async fn mark_read_by_id(&self, id: &str) -> ApiResult<()> {
        self.inner
            .execute_unit(
                self.inner
                    .request(reqwest::Method::PATCH, &format!("/in-app/notifications/{id}/read")),
            )
            .await
    }

    async fn mark_read_by_date(
        &self,
        until: DateTime<Utc>,
        category: Option<&str>,
    ) -> ApiResult<()> {
        let mut params = vec![("until", until.to_rfc3339())];
        if let Some(category) = category {
            params.push(("category", category.to_string()));
        }
        self.inner
            .execute_unit(
                self.inner
                    .request(reqwest::Method::PATCH, "/in-app/notifications/read")
                    .query(&params),
            )
            .await
    }

    async fn delete_by_id(&self, id: &str) -> ApiResult<()> {
        self.inner
            .execute_unit(
                self.inner
                    .request(reqwest::Method::DELETE, &format!("/in-app/notifications/{id}")),
            )
            .await
    }

    async fn delete_by_date(&self, until: DateTime<Utc>, category: Option<&str>) -> ApiResult<()> {
        let mut params = vec![("until", until.to_rfc3339())];
        if let Some(category) = category {
            params.push(("category", category.to_string()));
        }
        self.inner
            .execute_unit(
                self.inner
                    .request(reqwest::Method::DELETE, "/in-app/notifications")
                    .query(&params),
            )
            .await
    }

    async fn mark_all_viewed(&self, until: DateTime<Utc>) -> ApiResult<()> {
        self.inner
            .execute_unit(
                self.inner
                    .request(reqwest::Method::PATCH, "/in-app/notifications/viewed")
                    .query(&[("until", until.to_rfc3339())]),
            )
            .await
    }

    async fn start_push(&self, kind: PushKind, query: PageQuery) {
        let task = match kind {
            PushKind::Notifications => spawn_notification_poller(Arc::clone(&self.inner), query),
            PushKind::UnviewedCount => spawn_count_poller(Arc::clone(&self.inner)),
        };
        info!(stream = %kind, "push polling started");
        if let Some(previous) = self.pollers.lock().unwrap().insert(kind, task) {
            previous.abort();
        }
    }

    async fn stop_push(&self, kind: PushKind) {
        if let Some(task) = self.pollers.lock().unwrap().remove(&kind) {
            debug!(stream = %kind, "push polling stopped");
            task.abort();
        }
    }
}

impl Drop for HttpApi {
    fn drop(&mut self) {
        for (_, task) in self.pollers.lock().unwrap().drain() {
            task.abort();
        }
    }
}

// ── Polling tasks ───────────────────────────────────────────────────────

/// Poll for notifications strictly newer than the last delivered timestamp,
/// seeded from the query's `start`. Poll failures are logged and retried on
/// the next tick; the next page fetch reconciles anything missed.
fn spawn_notification_poller(inner: Arc<HttpInner>, query: PageQuery) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_seen = query.start.unwrap_or_else(Utc::now);
        let mut ticker = tokio::time::interval(inner.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let poll = PageQuery {
                size: query.size,
                start: Some(last_seen),
                end: None,
                filter: query.filter,
                sort: SortOrder::Desc,
            };
            match inner.fetch_page(&poll).await {
                Ok(page) if !page.data.is_empty() => {
                    if let Some(newest) = page.data.first() {
                        last_seen = newest.created_at;
                    }
                    (inner.sink)(PushDelivery::Notifications(page.data));
                }
                Ok(_) => {}
                Err(err) => warn!(code = %err.code, "notification poll failed: {err}"),
            }
        }
    })
}

fn spawn_count_poller(inner: Arc<HttpInner>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(inner.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match inner.fetch_unviewed_count().await {
                Ok(count) => (inner.sink)(PushDelivery::Count(count.unviewed_count)),
                Err(err) => warn!(code = %err.code, "unviewed count poll failed: {err}"),
            }
        }
    })
}
