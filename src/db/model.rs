//! Database view models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use chrono::{DateTime, Utc};

use crate::model::{QueueAction, SyncMetrics, SyncStatus};

/// Article fields supplied by the importer; everything else is bookkeeping.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub remote_id: String,
    pub feed_id: i64,
    pub title: String,
    pub author: Option<String>,
    pub url: Option<String>,
    pub content: String,
    pub is_read: bool,
    pub is_starred: bool,
    pub published_at: Option<DateTime<Utc>>,
}

/// Outcome of an idempotent article upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArticleUpsert {
    Created(i64),
    Updated(i64),
    Unchanged(i64),
}

impl ArticleUpsert {
    pub fn article_id(&self) -> i64 {
        match self {
            ArticleUpsert::Created(id)
            | ArticleUpsert::Updated(id)
            | ArticleUpsert::Unchanged(id) => *id,
        }
    }
}

/// Queue slice used by the drain step when pushing a mutation batch.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub queue_id: i64,
    pub article_id: i64,
    pub article_remote_id: String,
    pub action: QueueAction,
    pub attempt: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

/// Diagnostic counts over the sync queue.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct QueueCounts {
    pub pending: i64,
    pub retrying: i64,
    pub abandoned: i64,
}

/// One persisted sync pass, backing the status endpoint.
#[derive(Debug, Clone)]
pub struct SyncRunRow {
    pub id: String,
    pub triggered_by: String,
    pub status: SyncStatus,
    pub metrics: SyncMetrics,
    pub error: Option<String>,
    pub retry_after_secs: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
