//! Typed response shapes for the Inoreader-style reader API.
//!
//! The remote returns loosely-shaped JSON; everything is validated into these
//! structs at the client boundary so internal code never touches raw values.

use serde::Deserialize;

pub const READ_STATE: &str = "user/-/state/com.google/read";
pub const STARRED_STATE: &str = "user/-/state/com.google/starred";
const LABEL_MARKER: &str = "/label/";

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionList {
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(rename = "htmlUrl", default)]
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Category {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagList {
    #[serde(default)]
    pub tags: Vec<RemoteTag>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteTag {
    pub id: String,
    #[serde(rename = "unread_count", default)]
    pub unread_count: Option<i64>,
}

impl RemoteTag {
    /// User labels look like `user/-/label/Name`; states and folders share the
    /// same namespace, so only label-suffixed ids count as tags.
    pub fn label_name(&self) -> Option<&str> {
        label_suffix(&self.id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnreadCountList {
    #[serde(default)]
    pub max: Option<i64>,
    #[serde(default)]
    pub unreadcounts: Vec<UnreadCount>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnreadCount {
    pub id: String,
    pub count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamContents {
    #[serde(default)]
    pub items: Vec<StreamItem>,
    #[serde(default)]
    pub continuation: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamItem {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// Publish time, epoch seconds.
    #[serde(default)]
    pub published: Option<i64>,
    #[serde(default)]
    pub canonical: Vec<Link>,
    #[serde(default)]
    pub alternate: Vec<Link>,
    #[serde(default)]
    pub summary: Option<ItemContent>,
    #[serde(default)]
    pub content: Option<ItemContent>,
    pub origin: Origin,
    #[serde(default)]
    pub categories: Vec<String>,
}

impl StreamItem {
    pub fn link(&self) -> Option<&str> {
        self.canonical
            .first()
            .or_else(|| self.alternate.first())
            .map(|l| l.href.as_str())
    }

    pub fn body(&self) -> &str {
        self.content
            .as_ref()
            .or(self.summary.as_ref())
            .map(|c| c.content.as_str())
            .unwrap_or("")
    }

    pub fn is_read(&self) -> bool {
        self.categories.iter().any(|c| c.ends_with("/state/com.google/read"))
    }

    pub fn is_starred(&self) -> bool {
        self.categories
            .iter()
            .any(|c| c.ends_with("/state/com.google/starred"))
    }

    /// User label names attached to this item.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().filter_map(|c| label_suffix(c))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub href: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemContent {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Origin {
    #[serde(rename = "streamId")]
    pub stream_id: String,
    #[serde(default)]
    pub title: Option<String>,
}

fn label_suffix(id: &str) -> Option<&str> {
    id.find(LABEL_MARKER)
        .map(|pos| &id[pos + LABEL_MARKER.len()..])
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stream_item_decodes_reader_shape() {
        let item: StreamItem = serde_json::from_value(json!({
            "id": "tag:google.com,2005:reader/item/0000000000000001",
            "title": "A post",
            "published": 1700000000,
            "canonical": [{"href": "https://example.com/a"}],
            "summary": {"content": "<p>hi</p>"},
            "origin": {"streamId": "feed/https://example.com/rss", "title": "Example"},
            "categories": [
                "user/12345/state/com.google/read",
                "user/12345/label/Tech"
            ]
        }))
        .unwrap();

        assert!(item.is_read());
        assert!(!item.is_starred());
        assert_eq!(item.link(), Some("https://example.com/a"));
        assert_eq!(item.body(), "<p>hi</p>");
        assert_eq!(item.labels().collect::<Vec<_>>(), vec!["Tech"]);
    }

    #[test]
    fn tag_ids_split_labels_from_states() {
        let tag = RemoteTag {
            id: "user/-/label/Reading".into(),
            unread_count: None,
        };
        assert_eq!(tag.label_name(), Some("Reading"));

        let state = RemoteTag {
            id: "user/-/state/com.google/starred".into(),
            unread_count: None,
        };
        assert_eq!(state.label_name(), None);
    }

    #[test]
    fn item_body_prefers_full_content() {
        let item: StreamItem = serde_json::from_value(json!({
            "id": "i",
            "content": {"content": "full"},
            "summary": {"content": "partial"},
            "origin": {"streamId": "feed/x"}
        }))
        .unwrap();
        assert_eq!(item.body(), "full");
    }
}
