//! Sync queue drain: pushes locally-originated read/star mutations back to
//! the remote source in batched edit-tag calls.
//!
//! Failures here are silent by design — a batch that fails is re-queued with
//! a widened backoff window and retried on a later pass, never surfaced to
//! the reading flow. Entries past the retry ceiling stay in the table for
//! diagnostics but are excluded from automatic retry.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::db::{self, Pool};
use crate::inoreader::FeedSource;
use crate::model::QueueAction;

use super::SyncPolicy;

/// Counters from one drain step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub pushed: usize,
    pub failed: usize,
    pub remote_calls: usize,
}

/// Push due queue entries remotely: at most one batched edit-tag call per
/// pass, covering one action kind (the remainder waits for the next pass).
pub async fn drain_queue(
    pool: &Pool,
    source: &dyn FeedSource,
    policy: &SyncPolicy,
    now: DateTime<Utc>,
) -> Result<DrainStats> {
    let due = db::due_queue_entries(
        pool,
        now,
        policy.retry_base_minutes,
        policy.max_retry_attempts,
    )
    .await?;
    if due.is_empty() {
        return Ok(DrainStats::default());
    }

    let mut by_action: HashMap<QueueAction, Vec<&db::PendingMutation>> = HashMap::new();
    for entry in &due {
        by_action.entry(entry.action).or_default().push(entry);
    }

    let mut stats = DrainStats::default();
    // One batched call per pass keeps the overall call ceiling a fixed
    // constant; other action kinds wait for the next pass. Deterministic
    // order keeps the choice of kind reproducible.
    for action in [
        QueueAction::Read,
        QueueAction::Unread,
        QueueAction::Star,
        QueueAction::Unstar,
    ] {
        let Some(entries) = by_action.get(&action) else {
            continue;
        };
        let batch: Vec<&db::PendingMutation> =
            entries.iter().take(policy.queue_batch_size).copied().collect();
        let item_ids: Vec<String> = batch.iter().map(|m| m.article_remote_id.clone()).collect();
        let queue_ids: Vec<i64> = batch.iter().map(|m| m.queue_id).collect();

        let (add, remove) = if action.is_additive() {
            (Some(action.remote_label()), None)
        } else {
            (None, Some(action.remote_label()))
        };

        stats.remote_calls += 1;
        match source.edit_tag(&item_ids, add, remove).await {
            Ok(()) => {
                db::delete_queue_entries(pool, &queue_ids).await?;
                stats.pushed += queue_ids.len();
                info!(action = action.as_str(), count = queue_ids.len(), "pushed mutation batch");
            }
            Err(err) => {
                // Includes 429s: outbound pushes self-heal on a later pass.
                warn!(action = action.as_str(), count = queue_ids.len(), %err, "mutation batch failed; backing off");
                db::record_queue_failure(pool, &queue_ids, now).await?;
                stats.failed += queue_ids.len();
            }
        }
        break;
    }
    Ok(stats)
}
