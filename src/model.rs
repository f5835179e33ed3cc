use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outbound mutation kinds carried by the sync queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueueAction {
    Read,
    Unread,
    Star,
    Unstar,
}

impl QueueAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueAction::Read => "read",
            QueueAction::Unread => "unread",
            QueueAction::Star => "star",
            QueueAction::Unstar => "unstar",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read" => Some(QueueAction::Read),
            "unread" => Some(QueueAction::Unread),
            "star" => Some(QueueAction::Star),
            "unstar" => Some(QueueAction::Unstar),
            _ => None,
        }
    }

    /// Remote stream label this action adds or removes.
    pub fn remote_label(&self) -> &'static str {
        match self {
            QueueAction::Read | QueueAction::Unread => "user/-/state/com.google/read",
            QueueAction::Star | QueueAction::Unstar => "user/-/state/com.google/starred",
        }
    }

    /// Whether the label is added (true) or removed (false) remotely.
    pub fn is_additive(&self) -> bool {
        matches!(self, QueueAction::Read | QueueAction::Star)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Scheduled,
    Manual,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::Scheduled => "scheduled",
            SyncTrigger::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Running,
    Completed,
    Partial,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Partial => "partial",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SyncStatus::Pending),
            "running" => Some(SyncStatus::Running),
            "completed" => Some(SyncStatus::Completed),
            "partial" => Some(SyncStatus::Partial),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

/// Counters accumulated over one sync pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncMetrics {
    #[serde(rename = "newArticles")]
    pub new_articles: i64,
    #[serde(rename = "updatedArticles")]
    pub updated_articles: i64,
    #[serde(rename = "deletedArticles")]
    pub deleted_articles: i64,
    #[serde(rename = "newTags")]
    pub new_tags: i64,
    #[serde(rename = "failedFeeds")]
    pub failed_feeds: i64,
    #[serde(rename = "totalFeeds")]
    pub total_feeds: i64,
    #[serde(rename = "duration")]
    pub duration_ms: i64,
}

/// Structured result of one orchestrator pass.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    #[serde(rename = "syncId")]
    pub sync_id: String,
    pub status: SyncStatus,
    pub metrics: SyncMetrics,
    /// Remote retry hint when the pass was deferred by a rate limit.
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncOutcome {
    pub fn is_rate_limited(&self) -> bool {
        self.retry_after.is_some()
    }
}

/// Per-zone remote quota snapshot captured from response headers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiUsage {
    pub zone1_usage: i64,
    pub zone1_limit: i64,
    pub zone2_usage: i64,
    pub zone2_limit: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: i64,
    pub remote_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: i64,
    pub remote_id: String,
    pub title: String,
    pub site_url: Option<String>,
    pub folder_id: Option<i64>,
    pub is_partial_content: bool,
    pub unread_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub remote_id: Option<String>,
    pub name: String,
    pub slug: String,
    pub color: Option<String>,
    pub description: Option<String>,
    pub article_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub remote_id: String,
    pub feed_id: i64,
    pub title: String,
    pub author: Option<String>,
    pub url: Option<String>,
    pub content: String,
    pub full_content: Option<String>,
    pub ai_summary: Option<String>,
    pub is_read: bool,
    pub is_starred: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub last_local_update: Option<DateTime<Utc>>,
    pub last_sync_update: Option<DateTime<Utc>>,
}

/// Derive a URL-safe slug from a tag name.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            for lower in ch.to_lowercase() {
                slug.push(lower);
            }
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_action_round_trips() {
        for action in [
            QueueAction::Read,
            QueueAction::Unread,
            QueueAction::Star,
            QueueAction::Unstar,
        ] {
            assert_eq!(QueueAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(QueueAction::parse("bogus"), None);
    }

    #[test]
    fn read_actions_share_remote_label() {
        assert_eq!(
            QueueAction::Read.remote_label(),
            QueueAction::Unread.remote_label()
        );
        assert!(QueueAction::Read.is_additive());
        assert!(!QueueAction::Unread.is_additive());
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Tech News"), "tech-news");
        assert_eq!(slugify("  Rust & Systems!  "), "rust-systems");
        assert_eq!(slugify("already-slugged"), "already-slugged");
    }
}
