use super::model::{ArticleUpsert, NewArticle, PendingMutation, QueueCounts, SyncRunRow};
use crate::model::{slugify, Article, Feed, Folder, QueueAction, SyncMetrics, SyncStatus, Tag};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Folders / feeds / tags
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn upsert_folder(pool: &Pool, remote_id: &str, name: &str) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO folders (remote_id, name) VALUES (?, ?) \
         ON CONFLICT(remote_id) DO UPDATE SET name = excluded.name, updated_at = CURRENT_TIMESTAMP \
         RETURNING id",
    )
    .bind(remote_id)
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn upsert_feed(
    pool: &Pool,
    remote_id: &str,
    title: &str,
    site_url: Option<&str>,
    folder_id: Option<i64>,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO feeds (remote_id, title, site_url, folder_id) VALUES (?, ?, ?, ?) \
         ON CONFLICT(remote_id) DO UPDATE SET \
            title = excluded.title, \
            site_url = excluded.site_url, \
            folder_id = excluded.folder_id, \
            updated_at = CURRENT_TIMESTAMP \
         RETURNING id",
    )
    .bind(remote_id)
    .bind(title)
    .bind(site_url)
    .bind(folder_id)
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn set_feed_unread_count(pool: &Pool, feed_id: i64, unread: i64) -> Result<()> {
    sqlx::query("UPDATE feeds SET unread_count = ? WHERE id = ?")
        .bind(unread)
        .bind(feed_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_feed_partial_content(pool: &Pool, feed_id: i64, partial: bool) -> Result<()> {
    sqlx::query("UPDATE feeds SET is_partial_content = ? WHERE id = ?")
        .bind(partial)
        .bind(feed_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn feed_id_by_remote(pool: &Pool, remote_id: &str) -> Result<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>("SELECT id FROM feeds WHERE remote_id = ?")
        .bind(remote_id)
        .fetch_optional(pool)
        .await?;
    Ok(id)
}

/// Upsert a remote label as a tag. Returns (tag id, newly created).
#[instrument(skip_all)]
pub async fn upsert_tag(pool: &Pool, remote_id: Option<&str>, name: &str) -> Result<(i64, bool)> {
    let mut existing = match remote_id {
        Some(rid) => {
            sqlx::query_scalar::<_, i64>("SELECT id FROM tags WHERE remote_id = ?")
                .bind(rid)
                .fetch_optional(pool)
                .await?
        }
        None => None,
    };
    if existing.is_none() {
        // A tag first seen on an article has no remote id yet; adopt it.
        existing = sqlx::query_scalar::<_, i64>("SELECT id FROM tags WHERE name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await?;
    }
    if let Some(id) = existing {
        sqlx::query(
            "UPDATE tags SET remote_id = COALESCE(?, remote_id), name = ?, slug = ?, \
             updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(remote_id)
        .bind(name)
        .bind(slugify(name))
        .bind(id)
        .execute(pool)
        .await?;
        return Ok((id, false));
    }
    let rec = sqlx::query("INSERT INTO tags (remote_id, name, slug) VALUES (?, ?, ?) RETURNING id")
        .bind(remote_id)
        .bind(name)
        .bind(slugify(name))
        .fetch_one(pool)
        .await?;
    Ok((rec.get("id"), true))
}

#[instrument(skip_all)]
pub async fn link_article_tag(pool: &Pool, article_id: i64, tag_id: i64) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO article_tags (article_id, tag_id) VALUES (?, ?)")
        .bind(article_id)
        .bind(tag_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Recompute cached per-tag article counts after an import.
#[instrument(skip_all)]
pub async fn refresh_tag_counts(pool: &Pool) -> Result<()> {
    sqlx::query(
        "UPDATE tags SET article_count = \
            (SELECT COUNT(*) FROM article_tags WHERE article_tags.tag_id = tags.id)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_tags(pool: &Pool) -> Result<Vec<Tag>> {
    let rows = sqlx::query(
        "SELECT id, remote_id, name, slug, color, description, article_count \
         FROM tags ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| Tag {
            id: row.get("id"),
            remote_id: row.try_get("remote_id").ok(),
            name: row.get("name"),
            slug: row.get("slug"),
            color: row.try_get("color").ok().flatten(),
            description: row.try_get("description").ok().flatten(),
            article_count: row.get("article_count"),
        })
        .collect())
}

pub async fn list_folders(pool: &Pool) -> Result<Vec<Folder>> {
    let rows = sqlx::query(
        "SELECT id, remote_id, name, created_at, updated_at FROM folders ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| Folder {
            id: row.get("id"),
            remote_id: row.get("remote_id"),
            name: row.get("name"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
        .collect())
}

/// Feeds with their cached unread counts, for the sidebar envelope.
pub async fn list_feeds(pool: &Pool) -> Result<Vec<Feed>> {
    let rows = sqlx::query(
        "SELECT id, remote_id, title, site_url, folder_id, is_partial_content, unread_count, \
                created_at, updated_at \
         FROM feeds ORDER BY title",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| Feed {
            id: row.get("id"),
            remote_id: row.get("remote_id"),
            title: row.get("title"),
            site_url: row.try_get("site_url").ok().flatten(),
            folder_id: row.try_get("folder_id").ok().flatten(),
            is_partial_content: row.get("is_partial_content"),
            unread_count: row.get("unread_count"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Articles
// ---------------------------------------------------------------------------

fn article_from_row(row: &sqlx::sqlite::SqliteRow) -> Article {
    Article {
        id: row.get("id"),
        remote_id: row.get("remote_id"),
        feed_id: row.get("feed_id"),
        title: row.get("title"),
        author: row.try_get("author").ok().flatten(),
        url: row.try_get("url").ok().flatten(),
        content: row.get("content"),
        full_content: row.try_get("full_content").ok().flatten(),
        ai_summary: row.try_get("ai_summary").ok().flatten(),
        is_read: row.get("is_read"),
        is_starred: row.get("is_starred"),
        published_at: row.try_get("published_at").ok().flatten(),
        last_local_update: row.try_get("last_local_update").ok().flatten(),
        last_sync_update: row.try_get("last_sync_update").ok().flatten(),
    }
}

const ARTICLE_COLUMNS: &str = "id, remote_id, feed_id, title, author, url, content, \
     full_content, ai_summary, is_read, is_starred, published_at, \
     last_local_update, last_sync_update";

pub async fn get_article(pool: &Pool, id: i64) -> Result<Option<Article>> {
    let row = sqlx::query(&format!(
        "SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(article_from_row))
}

pub async fn get_article_by_remote(pool: &Pool, remote_id: &str) -> Result<Option<Article>> {
    let row = sqlx::query(&format!(
        "SELECT {ARTICLE_COLUMNS} FROM articles WHERE remote_id = ?"
    ))
    .bind(remote_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(article_from_row))
}

/// Idempotent import upsert keyed by remote identity.
///
/// Read/star state follows last-write-wins: remote values are applied only
/// when the local side has not changed since the last sync write, and every
/// sync-side state write stamps `last_sync_update` so the queue drain can
/// tell sync writes apart from user writes.
#[instrument(skip_all)]
pub async fn upsert_article(pool: &Pool, new: &NewArticle, now: DateTime<Utc>) -> Result<ArticleUpsert> {
    let mut tx = pool.begin().await?;

    let existing = sqlx::query(&format!(
        "SELECT {ARTICLE_COLUMNS} FROM articles WHERE remote_id = ?"
    ))
    .bind(&new.remote_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(existing) = existing.as_ref().map(article_from_row) else {
        let rec = sqlx::query(
            "INSERT INTO articles \
             (remote_id, feed_id, title, author, url, content, is_read, is_starred, \
              published_at, last_sync_update) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(&new.remote_id)
        .bind(new.feed_id)
        .bind(&new.title)
        .bind(&new.author)
        .bind(&new.url)
        .bind(&new.content)
        .bind(new.is_read)
        .bind(new.is_starred)
        .bind(new.published_at)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        return Ok(ArticleUpsert::Created(rec.get("id")));
    };

    // Local state wins when it is strictly newer than the last sync write.
    let local_is_newer = match (existing.last_local_update, existing.last_sync_update) {
        (Some(local), Some(sync)) => local > sync,
        (Some(_), None) => true,
        _ => false,
    };

    let state_changed = !local_is_newer
        && (existing.is_read != new.is_read || existing.is_starred != new.is_starred);
    let content_changed = existing.title != new.title
        || existing.author != new.author
        || existing.url != new.url
        || existing.content != new.content
        || existing.published_at != new.published_at;

    if !state_changed && !content_changed {
        sqlx::query("UPDATE articles SET updated_at = CURRENT_TIMESTAMP WHERE id = ?")
            .bind(existing.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        return Ok(ArticleUpsert::Unchanged(existing.id));
    }

    if content_changed {
        sqlx::query(
            "UPDATE articles SET title = ?, author = ?, url = ?, content = ?, \
             published_at = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(&new.title)
        .bind(&new.author)
        .bind(&new.url)
        .bind(&new.content)
        .bind(new.published_at)
        .bind(existing.id)
        .execute(&mut *tx)
        .await?;
    }
    if state_changed {
        sqlx::query(
            "UPDATE articles SET is_read = ?, is_starred = ?, last_sync_update = ?, \
             updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(new.is_read)
        .bind(new.is_starred)
        .bind(now)
        .bind(existing.id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(ArticleUpsert::Updated(existing.id))
}

/// User-facing read-state mutation: stamps `last_local_update` and enqueues
/// the outbound push in the same transaction.
#[instrument(skip_all)]
pub async fn set_article_read(pool: &Pool, article_id: i64, read: bool, now: DateTime<Utc>) -> Result<()> {
    let action = if read { QueueAction::Read } else { QueueAction::Unread };
    apply_local_mutation(pool, article_id, action, now).await
}

/// User-facing star-state mutation, same contract as [`set_article_read`].
#[instrument(skip_all)]
pub async fn set_article_starred(
    pool: &Pool,
    article_id: i64,
    starred: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    let action = if starred { QueueAction::Star } else { QueueAction::Unstar };
    apply_local_mutation(pool, article_id, action, now).await
}

async fn apply_local_mutation(
    pool: &Pool,
    article_id: i64,
    action: QueueAction,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM articles WHERE id = ?")
        .bind(article_id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(anyhow!("article {} not found", article_id));
    }

    let (column, value) = match action {
        QueueAction::Read => ("is_read", true),
        QueueAction::Unread => ("is_read", false),
        QueueAction::Star => ("is_starred", true),
        QueueAction::Unstar => ("is_starred", false),
    };
    sqlx::query(&format!(
        "UPDATE articles SET {column} = ?, last_local_update = ?, \
         updated_at = CURRENT_TIMESTAMP WHERE id = ?"
    ))
    .bind(value)
    .bind(now)
    .bind(article_id)
    .execute(&mut *tx)
    .await?;

    // Opposite action for the same article is superseded, not pushed.
    let opposite = match action {
        QueueAction::Read => QueueAction::Unread,
        QueueAction::Unread => QueueAction::Read,
        QueueAction::Star => QueueAction::Unstar,
        QueueAction::Unstar => QueueAction::Star,
    };
    sqlx::query("DELETE FROM sync_queue WHERE article_id = ? AND action = ?")
        .bind(article_id)
        .bind(opposite.as_str())
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "INSERT INTO sync_queue (article_id, action) VALUES (?, ?) \
         ON CONFLICT(article_id, action) DO UPDATE SET created_at = CURRENT_TIMESTAMP",
    )
    .bind(article_id)
    .bind(action.as_str())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn store_full_content(pool: &Pool, article_id: i64, content: &str) -> Result<()> {
    sqlx::query(
        "UPDATE articles SET full_content = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(content)
    .bind(article_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn store_summary(pool: &Pool, article_id: i64, summary: &str) -> Result<()> {
    sqlx::query("UPDATE articles SET ai_summary = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(summary)
        .bind(article_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn append_extraction_log(
    pool: &Pool,
    article_id: i64,
    success: bool,
    duration_ms: i64,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO extraction_log (article_id, success, duration_ms, error) VALUES (?, ?, ?, ?)",
    )
    .bind(article_id)
    .bind(success)
    .bind(duration_ms)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Sync queue
// ---------------------------------------------------------------------------

/// List queue entries eligible for a drain attempt right now.
///
/// Eligibility: attempt below the retry ceiling, the backoff window for the
/// current attempt has elapsed, and the article's local change is still newer
/// than the last sync write (loop prevention — a state the orchestrator just
/// pulled down must not be pushed straight back).
#[instrument(skip_all)]
pub async fn due_queue_entries(
    pool: &Pool,
    now: DateTime<Utc>,
    retry_base_minutes: i64,
    max_attempts: i32,
) -> Result<Vec<PendingMutation>> {
    let rows = sqlx::query(
        "SELECT q.id, q.article_id, q.action, q.attempt, q.last_attempt_at, \
                a.remote_id, a.last_local_update, a.last_sync_update \
         FROM sync_queue q JOIN articles a ON a.id = q.article_id \
         WHERE q.attempt < ? ORDER BY q.id",
    )
    .bind(max_attempts)
    .fetch_all(pool)
    .await?;

    let mut due = Vec::new();
    for row in rows {
        let attempt: i32 = row.get("attempt");
        let last_attempt: Option<DateTime<Utc>> = row.try_get("last_attempt_at").ok().flatten();
        if let Some(last) = last_attempt {
            // `attempt` counts completed failures, so the wait before the
            // Nth retry is base × 2^(N-1): 10, 20, 40 minutes.
            let exponent = (attempt - 1).clamp(0, 16);
            let window = chrono::Duration::minutes(retry_base_minutes * (1_i64 << exponent));
            if now - last < window {
                continue;
            }
        }

        let local: Option<DateTime<Utc>> = row.try_get("last_local_update").ok().flatten();
        let synced: Option<DateTime<Utc>> = row.try_get("last_sync_update").ok().flatten();
        let local_newer = match (local, synced) {
            (Some(l), Some(s)) => l > s,
            (Some(_), None) => true,
            _ => false,
        };
        if !local_newer {
            continue;
        }

        let action_str: String = row.get("action");
        let Some(action) = QueueAction::parse(&action_str) else {
            continue;
        };
        due.push(PendingMutation {
            queue_id: row.get("id"),
            article_id: row.get("article_id"),
            article_remote_id: row.get("remote_id"),
            action,
            attempt,
            last_attempt_at: last_attempt,
        });
    }
    Ok(due)
}

#[instrument(skip_all)]
pub async fn delete_queue_entries(pool: &Pool, ids: &[i64]) -> Result<()> {
    for id in ids {
        sqlx::query("DELETE FROM sync_queue WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn record_queue_failure(pool: &Pool, ids: &[i64], now: DateTime<Utc>) -> Result<()> {
    for id in ids {
        sqlx::query("UPDATE sync_queue SET attempt = attempt + 1, last_attempt_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(pool)
            .await?;
    }
    Ok(())
}

/// Diagnostic queue counts for the operator surface.
pub async fn queue_counts(pool: &Pool, max_attempts: i32) -> Result<QueueCounts> {
    let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue WHERE attempt = 0")
        .fetch_one(pool)
        .await?;
    let retrying: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue WHERE attempt > 0 AND attempt < ?")
            .bind(max_attempts)
            .fetch_one(pool)
            .await?;
    let abandoned: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue WHERE attempt >= ?")
        .bind(max_attempts)
        .fetch_one(pool)
        .await?;
    Ok(QueueCounts {
        pending,
        retrying,
        abandoned,
    })
}

pub async fn count_queue_entries(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

// ---------------------------------------------------------------------------
// Sync metadata
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn set_meta(pool: &Pool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO sync_metadata (key, value) VALUES (?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_meta(pool: &Pool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM sync_metadata WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

#[instrument(skip_all)]
pub async fn increment_meta_counter(pool: &Pool, key: &str) -> Result<i64> {
    let current = get_meta(pool, key)
        .await?
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0);
    let next = current + 1;
    set_meta(pool, key, &next.to_string()).await?;
    Ok(next)
}

// ---------------------------------------------------------------------------
// Sync runs
// ---------------------------------------------------------------------------

/// Runs older than this still marked `running` are treated as crashed and do
/// not block a new pass.
const STALE_RUN_MINUTES: i64 = 30;

/// Atomically claim the in-flight slot. Returns false when another pass is
/// already running.
#[instrument(skip_all)]
pub async fn try_begin_sync(
    pool: &Pool,
    sync_id: &str,
    triggered_by: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let stale_before = now - chrono::Duration::minutes(STALE_RUN_MINUTES);
    let result = sqlx::query(
        "INSERT INTO sync_runs (id, triggered_by, status, started_at) \
         SELECT ?, ?, 'running', ? \
         WHERE NOT EXISTS (SELECT 1 FROM sync_runs WHERE status = 'running' AND started_at > ?)",
    )
    .bind(sync_id)
    .bind(triggered_by)
    .bind(now)
    .bind(stale_before)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn finish_sync_run(
    pool: &Pool,
    sync_id: &str,
    status: SyncStatus,
    metrics: &SyncMetrics,
    error: Option<&str>,
    retry_after_secs: Option<i64>,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE sync_runs SET status = ?, new_articles = ?, updated_articles = ?, \
         deleted_articles = ?, new_tags = ?, failed_feeds = ?, total_feeds = ?, \
         duration_ms = ?, error = ?, retry_after_secs = ?, finished_at = ? WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(metrics.new_articles)
    .bind(metrics.updated_articles)
    .bind(metrics.deleted_articles)
    .bind(metrics.new_tags)
    .bind(metrics.failed_feeds)
    .bind(metrics.total_feeds)
    .bind(metrics.duration_ms)
    .bind(error)
    .bind(retry_after_secs)
    .bind(now)
    .bind(sync_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_sync_run(pool: &Pool, sync_id: &str) -> Result<Option<SyncRunRow>> {
    let row = sqlx::query(
        "SELECT id, triggered_by, status, new_articles, updated_articles, deleted_articles, \
                new_tags, failed_feeds, total_feeds, duration_ms, error, retry_after_secs, \
                started_at, finished_at \
         FROM sync_runs WHERE id = ?",
    )
    .bind(sync_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let status_str: String = row.get("status");
    let status = SyncStatus::parse(&status_str)
        .ok_or_else(|| anyhow!("sync run {} has unknown status {}", sync_id, status_str))?;

    Ok(Some(SyncRunRow {
        id: row.get("id"),
        triggered_by: row.get("triggered_by"),
        status,
        metrics: SyncMetrics {
            new_articles: row.get("new_articles"),
            updated_articles: row.get("updated_articles"),
            deleted_articles: row.get("deleted_articles"),
            new_tags: row.get("new_tags"),
            failed_feeds: row.get("failed_feeds"),
            total_feeds: row.get("total_feeds"),
            duration_ms: row.try_get::<Option<i64>, _>("duration_ms").ok().flatten().unwrap_or(0),
        },
        error: row.try_get("error").ok().flatten(),
        retry_after_secs: row.try_get("retry_after_secs").ok().flatten(),
        started_at: row.get("started_at"),
        finished_at: row.try_get("finished_at").ok().flatten(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    async fn seed_article(pool: &Pool) -> i64 {
        let feed_id = upsert_feed(pool, "feed/http://example.com/rss", "Example", None, None)
            .await
            .unwrap();
        let new = NewArticle {
            remote_id: "item/0001".into(),
            feed_id,
            title: "Hello".into(),
            author: None,
            url: Some("http://example.com/1".into()),
            content: "<p>body</p>".into(),
            is_read: false,
            is_starred: false,
            published_at: None,
        };
        upsert_article(pool, &new, Utc::now()).await.unwrap().article_id()
    }

    #[tokio::test]
    async fn upsert_article_is_idempotent() {
        let pool = setup_pool().await;
        let feed_id = upsert_feed(&pool, "feed/x", "X", None, None).await.unwrap();
        let new = NewArticle {
            remote_id: "item/1".into(),
            feed_id,
            title: "T".into(),
            author: None,
            url: None,
            content: "c".into(),
            is_read: false,
            is_starred: false,
            published_at: None,
        };
        let first = upsert_article(&pool, &new, Utc::now()).await.unwrap();
        assert!(matches!(first, ArticleUpsert::Created(_)));
        let second = upsert_article(&pool, &new, Utc::now()).await.unwrap();
        assert!(matches!(second, ArticleUpsert::Unchanged(_)));
        assert_eq!(first.article_id(), second.article_id());
    }

    #[tokio::test]
    async fn local_state_survives_sync_upsert() {
        let pool = setup_pool().await;
        let id = seed_article(&pool).await;

        // User marks read after the initial sync write.
        set_article_read(&pool, id, true, Utc::now()).await.unwrap();

        // A later sync pass still carries the remote's unread view.
        let article = get_article(&pool, id).await.unwrap().unwrap();
        let new = NewArticle {
            remote_id: article.remote_id.clone(),
            feed_id: article.feed_id,
            title: article.title.clone(),
            author: None,
            url: article.url.clone(),
            content: article.content.clone(),
            is_read: false,
            is_starred: false,
            published_at: None,
        };
        upsert_article(&pool, &new, Utc::now()).await.unwrap();

        let after = get_article(&pool, id).await.unwrap().unwrap();
        assert!(after.is_read, "newer local read state must win");
    }

    #[tokio::test]
    async fn opposite_mutation_supersedes_queue_entry() {
        let pool = setup_pool().await;
        let id = seed_article(&pool).await;

        set_article_read(&pool, id, true, Utc::now()).await.unwrap();
        set_article_read(&pool, id, false, Utc::now()).await.unwrap();

        let due = due_queue_entries(&pool, Utc::now(), 10, 3).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].action, QueueAction::Unread);
    }

    #[tokio::test]
    async fn queue_entry_past_ceiling_is_kept_but_not_due() {
        let pool = setup_pool().await;
        let id = seed_article(&pool).await;
        set_article_read(&pool, id, true, Utc::now()).await.unwrap();

        let due = due_queue_entries(&pool, Utc::now(), 10, 3).await.unwrap();
        let ids: Vec<i64> = due.iter().map(|m| m.queue_id).collect();
        for _ in 0..3 {
            record_queue_failure(&pool, &ids, Utc::now()).await.unwrap();
        }

        let later = Utc::now() + chrono::Duration::days(7);
        let due = due_queue_entries(&pool, later, 10, 3).await.unwrap();
        assert!(due.is_empty());
        assert_eq!(count_queue_entries(&pool).await.unwrap(), 1);

        let counts = queue_counts(&pool, 3).await.unwrap();
        assert_eq!(counts.abandoned, 1);
    }

    #[tokio::test]
    async fn backoff_window_doubles_per_attempt() {
        let pool = setup_pool().await;
        let id = seed_article(&pool).await;
        let start = Utc::now();
        set_article_read(&pool, id, true, start).await.unwrap();

        let due = due_queue_entries(&pool, start, 10, 3).await.unwrap();
        let ids: Vec<i64> = due.iter().map(|m| m.queue_id).collect();
        record_queue_failure(&pool, &ids, start).await.unwrap();

        // 10-minute base window: not due 5 minutes in, due after 11.
        let soon = start + chrono::Duration::minutes(5);
        assert!(due_queue_entries(&pool, soon, 10, 3).await.unwrap().is_empty());
        let later = start + chrono::Duration::minutes(11);
        assert_eq!(due_queue_entries(&pool, later, 10, 3).await.unwrap().len(), 1);

        // Second failure widens the window to 20 minutes.
        record_queue_failure(&pool, &ids, later).await.unwrap();
        let at_15 = later + chrono::Duration::minutes(15);
        assert!(due_queue_entries(&pool, at_15, 10, 3).await.unwrap().is_empty());
        let at_21 = later + chrono::Duration::minutes(21);
        assert_eq!(due_queue_entries(&pool, at_21, 10, 3).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn try_begin_sync_is_exclusive() {
        let pool = setup_pool().await;
        let now = Utc::now();
        assert!(try_begin_sync(&pool, "run-1", "manual", now).await.unwrap());
        assert!(!try_begin_sync(&pool, "run-2", "manual", now).await.unwrap());

        finish_sync_run(
            &pool,
            "run-1",
            SyncStatus::Completed,
            &SyncMetrics::default(),
            None,
            None,
            now,
        )
        .await
        .unwrap();
        assert!(try_begin_sync(&pool, "run-3", "scheduled", now).await.unwrap());
    }

    #[tokio::test]
    async fn meta_counters_accumulate() {
        let pool = setup_pool().await;
        assert_eq!(increment_meta_counter(&pool, "sync_success_count").await.unwrap(), 1);
        assert_eq!(increment_meta_counter(&pool, "sync_success_count").await.unwrap(), 2);
        assert_eq!(
            get_meta(&pool, "sync_success_count").await.unwrap().as_deref(),
            Some("2")
        );
    }
}
