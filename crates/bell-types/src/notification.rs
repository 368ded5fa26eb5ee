use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One in-app notification, as the backend delivers it.
///
/// `id` is opaque and unique within a recipient's feed; `created_at` is both
/// the display timestamp and the pagination/ordering key. The message body is
/// carried verbatim and never interpreted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    pub message: NotificationMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Notification {
    /// Minimal notification with an id, a timestamp, and a header.
    /// Everything else defaults; handy for mocks and tests.
    pub fn stub(id: impl Into<String>, created_at: DateTime<Utc>, header: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at,
            is_read: false,
            message: NotificationMessage {
                header: header.into(),
                body: String::new(),
                sub_header: None,
                action_url: None,
                avatar: None,
                additional_data: None,
            },
            request_id: None,
        }
    }
}

/// Opaque display payload. The engine only moves it around.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Avatar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Avatar {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
}

/// Which notifications a page fetch asks for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedFilter {
    #[default]
    All,
    Unread,
}

impl std::fmt::Display for FeedFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "ALL"),
            Self::Unread => write!(f, "UNREAD"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortOrder {
    #[default]
    Desc,
    Asc,
}

/// Parameters for one page fetch. `end` is the exclusive upper-bound cursor:
/// "give me `size` items created strictly before this instant".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub filter: FeedFilter,
    #[serde(default)]
    pub sort: SortOrder,
}

impl PageQuery {
    pub fn first_page(size: usize, filter: FeedFilter) -> Self {
        Self {
            size,
            start: None,
            end: None,
            filter,
            sort: SortOrder::Desc,
        }
    }
}

/// A fetched page. `meta` is optional; absence falls back to the short-page
/// end-of-feed heuristic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPage {
    #[serde(default)]
    pub data: Vec<Notification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<PageMeta>,
}

/// Backend page metadata. The wire format carries `last` as the string
/// "true"/"false".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageMeta {
    #[serde(with = "bool_string")]
    pub last: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnviewedCount {
    pub unviewed_count: u64,
}

mod bool_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &bool, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(if *v { "true" } else { "false" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        let s = String::deserialize(d)?;
        Ok(s == "true")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_wire_names_are_camel_case() {
        let n = Notification::stub("n-1", Utc::now(), "hello");
        let json = serde_json::to_value(&n).unwrap();
        assert!(json.get("createdAt").is_some());
        assert!(json.get("isRead").is_some());
    }

    #[test]
    fn page_meta_last_is_a_string_on_the_wire() {
        let page = NotificationPage {
            data: vec![],
            meta: Some(PageMeta { last: true }),
        };
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["meta"]["last"], "true");

        let parsed: NotificationPage =
            serde_json::from_str(r#"{"data":[],"meta":{"last":"false"}}"#).unwrap();
        assert!(!parsed.meta.unwrap().last);
    }

    #[test]
    fn message_payload_roundtrips_untouched() {
        let raw = r#"{
            "id": "1",
            "createdAt": "2024-02-24T12:00:00Z",
            "isRead": false,
            "message": {
                "header": "New Message",
                "body": "You have a new message.",
                "subHeader": "New post",
                "actionUrl": "",
                "avatar": { "imageUrl": "", "actionUrl": "" }
            },
            "requestId": "123"
        }"#;
        let n: Notification = serde_json::from_str(raw).unwrap();
        assert_eq!(n.message.header, "New Message");
        assert_eq!(n.message.sub_header.as_deref(), Some("New post"));
        assert_eq!(n.request_id.as_deref(), Some("123"));
    }
}
