//! Sync orchestration: one bounded reconciliation pass against the remote
//! reader account.
//!
//! A pass always issues its remote calls in the same order: structure, feed
//! list, unread counts, article stream, then at most one batched edit-tag
//! call. Five remote calls per pass at most, never a function of feed or
//! article counts.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{self, NewArticle, Pool};
use crate::inoreader::{FeedSource, RemoteError, StreamRequest};
use crate::model::{SyncMetrics, SyncOutcome, SyncStatus, SyncTrigger};

pub mod distribute;
pub mod drain;

pub use distribute::round_robin;
pub use drain::{drain_queue, DrainStats};

/// Sync metadata keys. The orchestrator is the only writer.
pub mod meta {
    pub const LAST_SYNC_TIME: &str = "last_sync_time";
    pub const SUCCESS_COUNT: &str = "sync_success_count";
    pub const FAILURE_COUNT: &str = "sync_failure_count";
    pub const LAST_ERROR: &str = "last_sync_error";
    pub const API_USAGE: &str = "api_usage";
}

/// Policy knobs lifted out of the config so the orchestrator does not depend
/// on the whole config tree.
#[derive(Debug, Clone)]
pub struct SyncPolicy {
    pub max_articles: usize,
    pub max_articles_per_feed: usize,
    pub queue_batch_size: usize,
    pub retry_base_minutes: i64,
    pub max_retry_attempts: i32,
    /// Daily call budgets per remote quota zone; the remote's own limit
    /// headers take precedence when present.
    pub zone1_daily_limit: i64,
    pub zone2_daily_limit: i64,
}

impl From<&crate::config::Sync> for SyncPolicy {
    fn from(cfg: &crate::config::Sync) -> Self {
        Self {
            max_articles: cfg.max_articles,
            max_articles_per_feed: cfg.max_articles_per_feed,
            queue_batch_size: cfg.queue_batch_size,
            retry_base_minutes: cfg.retry_base_minutes,
            max_retry_attempts: cfg.max_retry_attempts,
            zone1_daily_limit: cfg.zone1_daily_limit,
            zone2_daily_limit: cfg.zone2_daily_limit,
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync already in progress")]
    AlreadyRunning,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

enum PassEnd {
    Clean,
    RateLimited(Option<u64>),
}

pub struct Orchestrator {
    pool: Pool,
    source: Arc<dyn FeedSource>,
    policy: SyncPolicy,
}

impl Orchestrator {
    pub fn new(pool: Pool, source: Arc<dyn FeedSource>, policy: SyncPolicy) -> Self {
        Self {
            pool,
            source,
            policy,
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    /// Execute one full reconciliation pass.
    ///
    /// Fails fast with [`SyncError::AlreadyRunning`] when another pass holds
    /// the in-flight slot; every other failure mode is folded into the
    /// structured outcome rather than propagated.
    pub async fn run_sync(&self, trigger: SyncTrigger) -> Result<SyncOutcome, SyncError> {
        let sync_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let started = std::time::Instant::now();

        let claimed = db::try_begin_sync(&self.pool, &sync_id, trigger.as_str(), started_at)
            .await
            .map_err(SyncError::Internal)?;
        if !claimed {
            return Err(SyncError::AlreadyRunning);
        }
        info!(sync_id, trigger = trigger.as_str(), "sync pass started");

        let mut metrics = SyncMetrics::default();
        let end = self.run_pass(&mut metrics).await;
        metrics.duration_ms = started.elapsed().as_millis() as i64;
        let finished_at = Utc::now();

        let (status, error, retry_after) = match end {
            Ok(PassEnd::Clean) => {
                let status = if metrics.failed_feeds > 0 {
                    SyncStatus::Partial
                } else {
                    SyncStatus::Completed
                };
                (status, None, None)
            }
            Ok(PassEnd::RateLimited(retry_after)) => (SyncStatus::Partial, None, retry_after),
            Err(err) => (SyncStatus::Failed, Some(sanitize_error(&err)), None),
        };

        self.record_metadata(status, error.as_deref(), retry_after, finished_at)
            .await
            .map_err(SyncError::Internal)?;
        db::finish_sync_run(
            &self.pool,
            &sync_id,
            status,
            &metrics,
            error.as_deref(),
            retry_after.map(|s| s as i64),
            finished_at,
        )
        .await
        .map_err(SyncError::Internal)?;

        info!(
            sync_id,
            status = status.as_str(),
            new_articles = metrics.new_articles,
            failed_feeds = metrics.failed_feeds,
            duration_ms = metrics.duration_ms,
            "sync pass finished"
        );
        Ok(SyncOutcome {
            sync_id,
            status,
            metrics,
            retry_after,
            error,
        })
    }

    /// Steps 1–6, fixed order. Structural failures (steps 1–3) abort the
    /// pass; a rate limit anywhere in steps 1–4 defers the rest of it.
    async fn run_pass(&self, metrics: &mut SyncMetrics) -> Result<PassEnd> {
        let now = Utc::now();

        // 1. Folder/tag structure.
        let tags = match self.source.tag_list().await {
            Ok(t) => t,
            Err(RemoteError::RateLimited { retry_after }) => {
                return Ok(PassEnd::RateLimited(retry_after))
            }
            Err(err) => return Err(err.into()),
        };

        // 2. Feed subscription list.
        let subs = match self.source.subscriptions().await {
            Ok(s) => s,
            Err(RemoteError::RateLimited { retry_after }) => {
                return Ok(PassEnd::RateLimited(retry_after))
            }
            Err(err) => return Err(err.into()),
        };

        // 3. Unread-count snapshot.
        let counts = match self.source.unread_counts().await {
            Ok(c) => c,
            Err(RemoteError::RateLimited { retry_after }) => {
                return Ok(PassEnd::RateLimited(retry_after))
            }
            Err(err) => return Err(err.into()),
        };

        // Upsert structure before articles; items reference feeds, feeds
        // reference folders.
        for tag in &tags.tags {
            if let Some(name) = tag.label_name() {
                let (_, created) = db::upsert_tag(&self.pool, Some(&tag.id), name).await?;
                if created {
                    metrics.new_tags += 1;
                }
            }
        }

        metrics.total_feeds = subs.subscriptions.len() as i64;
        let mut feed_ids: HashMap<String, i64> = HashMap::new();
        for sub in &subs.subscriptions {
            let mut folder_id = None;
            if let Some(cat) = sub.categories.first() {
                let name = cat.label.as_deref().unwrap_or(&cat.id);
                folder_id = Some(db::upsert_folder(&self.pool, &cat.id, name).await?);
            }
            match db::upsert_feed(
                &self.pool,
                &sub.id,
                &sub.title,
                sub.html_url.as_deref(),
                folder_id,
            )
            .await
            {
                Ok(id) => {
                    feed_ids.insert(sub.id.clone(), id);
                }
                Err(err) => {
                    warn!(feed = %sub.id, %err, "feed import failed; continuing pass");
                    metrics.failed_feeds += 1;
                }
            }
        }

        for uc in &counts.unreadcounts {
            if let Some(&feed_id) = feed_ids.get(&uc.id) {
                db::set_feed_unread_count(&self.pool, feed_id, uc.count).await?;
            }
        }

        // 4. Article stream since the last successful pass, unread only.
        let since = self.last_sync_epoch().await?;
        let stream = match self
            .source
            .stream_contents(&StreamRequest {
                since,
                limit: self.policy.max_articles,
                continuation: None,
                exclude_read: true,
            })
            .await
        {
            Ok(s) => s,
            Err(RemoteError::RateLimited { retry_after }) => {
                return Ok(PassEnd::RateLimited(retry_after))
            }
            Err(err) => return Err(err.into()),
        };

        let picked = round_robin(
            stream.items,
            |item| item.origin.stream_id.clone(),
            self.policy.max_articles,
            self.policy.max_articles_per_feed,
        );

        // 5. Idempotent article upserts.
        let mut unknown_feeds: HashSet<String> = HashSet::new();
        for item in picked {
            let feed_id = match feed_ids.get(&item.origin.stream_id).copied() {
                Some(id) => id,
                // Feed may exist from an earlier pass even if its
                // subscription entry failed this time.
                None => match db::feed_id_by_remote(&self.pool, &item.origin.stream_id).await? {
                    Some(id) => id,
                    None => {
                        unknown_feeds.insert(item.origin.stream_id.clone());
                        continue;
                    }
                },
            };

            let new = NewArticle {
                remote_id: item.id.clone(),
                feed_id,
                title: item.title.clone().unwrap_or_else(|| "(untitled)".into()),
                author: item.author.clone(),
                url: item.link().map(str::to_string),
                content: item.body().to_string(),
                is_read: item.is_read(),
                is_starred: item.is_starred(),
                published_at: item
                    .published
                    .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
            };
            let upsert = db::upsert_article(&self.pool, &new, now).await?;
            match upsert {
                db::ArticleUpsert::Created(_) => metrics.new_articles += 1,
                db::ArticleUpsert::Updated(_) => metrics.updated_articles += 1,
                db::ArticleUpsert::Unchanged(_) => {}
            }

            for label in item.labels() {
                let (tag_id, created) = db::upsert_tag(&self.pool, None, label).await?;
                if created {
                    metrics.new_tags += 1;
                }
                db::link_article_tag(&self.pool, upsert.article_id(), tag_id).await?;
            }
        }
        metrics.failed_feeds += unknown_feeds.len() as i64;
        db::refresh_tag_counts(&self.pool).await?;

        // 6. Drain local mutations back to the remote.
        let stats = drain_queue(&self.pool, self.source.as_ref(), &self.policy, Utc::now()).await?;
        if stats.failed > 0 {
            info!(failed = stats.failed, "some queued mutations deferred to next pass");
        }

        Ok(PassEnd::Clean)
    }

    async fn last_sync_epoch(&self) -> Result<Option<i64>> {
        let last = db::get_meta(&self.pool, meta::LAST_SYNC_TIME).await?;
        Ok(last
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|dt| dt.timestamp()))
    }

    async fn record_metadata(
        &self,
        status: SyncStatus,
        error: Option<&str>,
        retry_after: Option<u64>,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        match status {
            SyncStatus::Failed => {
                db::increment_meta_counter(&self.pool, meta::FAILURE_COUNT).await?;
                if let Some(msg) = error {
                    db::set_meta(&self.pool, meta::LAST_ERROR, msg).await?;
                }
            }
            _ => {
                db::increment_meta_counter(&self.pool, meta::SUCCESS_COUNT).await?;
                db::set_meta(&self.pool, meta::LAST_ERROR, "").await?;
                // A rate-limited pass is deferred, not successful enough to
                // advance the stream cursor.
                if retry_after.is_none() {
                    db::set_meta(&self.pool, meta::LAST_SYNC_TIME, &finished_at.to_rfc3339())
                        .await?;
                }
            }
        }
        let usage = self.source.usage();
        self.warn_on_quota(&usage);
        db::set_meta(&self.pool, meta::API_USAGE, &serde_json::to_string(&usage)?).await?;
        Ok(())
    }

    fn warn_on_quota(&self, usage: &crate::model::ApiUsage) {
        let zones = [
            ("zone1", usage.zone1_usage, usage.zone1_limit, self.policy.zone1_daily_limit),
            ("zone2", usage.zone2_usage, usage.zone2_limit, self.policy.zone2_daily_limit),
        ];
        for (zone, used, reported_limit, configured_limit) in zones {
            let limit = if reported_limit > 0 { reported_limit } else { configured_limit };
            if limit > 0 && used * 10 >= limit * 8 {
                warn!(zone, used, limit, "remote call quota nearing exhaustion");
            }
        }
    }
}

/// Keep error text bounded and free of anything resembling a credential.
fn sanitize_error(err: &anyhow::Error) -> String {
    let mut msg = format!("{err:#}");
    if let Some(pos) = msg.find("Bearer ") {
        msg.truncate(pos);
        msg.push_str("Bearer [redacted]");
    }
    if msg.len() > 500 {
        // Remote response bodies are arbitrary UTF-8; cut on a char boundary.
        let mut cut = 500;
        while !msg.is_char_boundary(cut) {
            cut -= 1;
        }
        msg.truncate(cut);
    }
    msg
}
