//! HTTP request handlers.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::db;
use crate::extract::FetchContentError;
use crate::model::{SyncMetrics, SyncStatus, SyncTrigger, Tag};
use crate::summarize::{self, SummaryError};
use crate::sync::{meta, SyncError};

use super::server::AppContext;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SidebarEnvelope {
    folders: Vec<FolderEntry>,
    feeds: Vec<FeedCount>,
    tags: Vec<Tag>,
}

#[derive(Debug, Serialize)]
pub struct FolderEntry {
    id: i64,
    name: String,
}

#[derive(Debug, Serialize)]
pub struct FeedCount {
    #[serde(rename = "feedId")]
    feed_id: i64,
    title: String,
    #[serde(rename = "folderId", skip_serializing_if = "Option::is_none")]
    folder_id: Option<i64>,
    unread: i64,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    #[serde(rename = "syncId")]
    sync_id: String,
    status: SyncStatus,
    metrics: SyncMetrics,
    sidebar: SidebarEnvelope,
}

#[derive(Debug, Serialize)]
pub struct SyncStatusResponse {
    status: SyncStatus,
    #[serde(rename = "triggeredBy")]
    triggered_by: String,
    metrics: SyncMetrics,
    #[serde(rename = "startedAt")]
    started_at: String,
    #[serde(rename = "finishedAt", skip_serializing_if = "Option::is_none")]
    finished_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LastSyncResponse {
    #[serde(rename = "lastSyncTime")]
    last_sync_time: Option<String>,
    source: &'static str,
}

#[derive(Debug, Deserialize, Default)]
pub struct FetchContentParams {
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct SummarizeBody {
    #[serde(default)]
    regenerate: bool,
}

// ============================================================================
// Handlers
// ============================================================================

fn internal_error(err: impl std::fmt::Display) -> (StatusCode, Json<serde_json::Value>) {
    error!(%err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal error" })),
    )
}

pub async fn run_sync(State(ctx): State<AppContext>) -> impl IntoResponse {
    match ctx.orchestrator.run_sync(SyncTrigger::Manual).await {
        Ok(outcome) if outcome.is_rate_limited() => {
            let retry_after = outcome.retry_after.unwrap_or(0);
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                headers.insert(header::RETRY_AFTER, value);
            }
            (
                StatusCode::TOO_MANY_REQUESTS,
                headers,
                Json(json!({
                    "syncId": outcome.sync_id,
                    "status": outcome.status,
                    "retryAfter": retry_after,
                })),
            )
                .into_response()
        }
        Ok(outcome) => {
            let sidebar = match sidebar_envelope(&ctx).await {
                Ok(s) => s,
                Err(err) => return internal_error(err).into_response(),
            };
            Json(SyncResponse {
                sync_id: outcome.sync_id,
                status: outcome.status,
                metrics: outcome.metrics,
                sidebar,
            })
            .into_response()
        }
        Err(SyncError::AlreadyRunning) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "sync already in progress" })),
        )
            .into_response(),
        Err(SyncError::Internal(err)) => internal_error(err).into_response(),
    }
}

async fn sidebar_envelope(ctx: &AppContext) -> anyhow::Result<SidebarEnvelope> {
    let folders = db::list_folders(&ctx.pool)
        .await?
        .into_iter()
        .map(|f| FolderEntry {
            id: f.id,
            name: f.name,
        })
        .collect();
    let feeds = db::list_feeds(&ctx.pool)
        .await?
        .into_iter()
        .map(|f| FeedCount {
            feed_id: f.id,
            title: f.title,
            folder_id: f.folder_id,
            unread: f.unread_count,
        })
        .collect();
    let tags = db::list_tags(&ctx.pool).await?;
    Ok(SidebarEnvelope {
        folders,
        feeds,
        tags,
    })
}

pub async fn sync_status(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match db::get_sync_run(&ctx.pool, &id).await {
        Ok(Some(run)) => Json(SyncStatusResponse {
            status: run.status,
            triggered_by: run.triggered_by,
            metrics: run.metrics,
            started_at: run.started_at.to_rfc3339(),
            finished_at: run.finished_at.map(|t| t.to_rfc3339()),
            error: run.error,
        })
        .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "unknown sync id" })),
        )
            .into_response(),
        Err(err) => internal_error(err).into_response(),
    }
}

pub async fn last_sync(State(ctx): State<AppContext>) -> impl IntoResponse {
    match db::get_meta(&ctx.pool, meta::LAST_SYNC_TIME).await {
        Ok(value) => Json(LastSyncResponse {
            last_sync_time: value.filter(|v| !v.is_empty()),
            source: "sync_metadata",
        })
        .into_response(),
        Err(err) => internal_error(err).into_response(),
    }
}

/// Operator diagnostics for the silent bidirectional-sync failures.
pub async fn queue_diagnostics(State(ctx): State<AppContext>) -> impl IntoResponse {
    match db::queue_counts(&ctx.pool, ctx.max_retry_attempts).await {
        Ok(counts) => Json(counts).into_response(),
        Err(err) => internal_error(err).into_response(),
    }
}

pub async fn fetch_content(
    State(ctx): State<AppContext>,
    Path(id): Path<i64>,
    Query(params): Query<FetchContentParams>,
) -> impl IntoResponse {
    match ctx.extract.fetch_content(&ctx.pool, id, params.force).await {
        Ok(outcome) if outcome.timed_out => {
            (StatusCode::REQUEST_TIMEOUT, Json(outcome)).into_response()
        }
        Ok(outcome) => Json(outcome).into_response(),
        Err(FetchContentError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "unknown article" })),
        )
            .into_response(),
        Err(FetchContentError::InFlight(_)) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "extraction already in progress" })),
        )
            .into_response(),
        Err(FetchContentError::Db(err)) => internal_error(err).into_response(),
    }
}

pub async fn summarize(
    State(ctx): State<AppContext>,
    Path(id): Path<i64>,
    body: Option<Json<SummarizeBody>>,
) -> impl IntoResponse {
    let regenerate = body.map(|Json(b)| b.regenerate).unwrap_or(false);
    match summarize::summarize_article(&ctx.pool, ctx.summarizer.as_ref(), id, regenerate).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => summary_error_response(err),
    }
}

fn summary_error_response(err: SummaryError) -> axum::response::Response {
    let (status, message) = match &err {
        SummaryError::NotFound(_) => (StatusCode::NOT_FOUND, "unknown article"),
        SummaryError::NoContent => (StatusCode::BAD_REQUEST, "no content to summarize"),
        SummaryError::MissingApiKey => (StatusCode::SERVICE_UNAVAILABLE, "summarizer key missing"),
        SummaryError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "summarizer rate limited"),
        SummaryError::Unreachable(_) => (StatusCode::SERVICE_UNAVAILABLE, "summarizer unreachable"),
        SummaryError::Api { .. } => (StatusCode::BAD_GATEWAY, "summarizer error"),
        SummaryError::Db(inner) => return internal_error(inner).into_response(),
    };
    (status, Json(json!({ "error": message }))).into_response()
}

pub async fn mark_read(State(ctx): State<AppContext>, Path(id): Path<i64>) -> impl IntoResponse {
    set_read_state(&ctx, id, true).await
}

pub async fn mark_unread(State(ctx): State<AppContext>, Path(id): Path<i64>) -> impl IntoResponse {
    set_read_state(&ctx, id, false).await
}

pub async fn mark_starred(State(ctx): State<AppContext>, Path(id): Path<i64>) -> impl IntoResponse {
    set_star_state(&ctx, id, true).await
}

pub async fn mark_unstarred(
    State(ctx): State<AppContext>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    set_star_state(&ctx, id, false).await
}

async fn set_read_state(ctx: &AppContext, id: i64, read: bool) -> axum::response::Response {
    match article_exists(ctx, id).await {
        Ok(true) => {}
        Ok(false) => return not_found_article(),
        Err(err) => return internal_error(err).into_response(),
    }
    match db::set_article_read(&ctx.pool, id, read, Utc::now()).await {
        Ok(()) => Json(json!({ "queued": true })).into_response(),
        Err(err) => internal_error(err).into_response(),
    }
}

async fn set_star_state(ctx: &AppContext, id: i64, starred: bool) -> axum::response::Response {
    match article_exists(ctx, id).await {
        Ok(true) => {}
        Ok(false) => return not_found_article(),
        Err(err) => return internal_error(err).into_response(),
    }
    match db::set_article_starred(&ctx.pool, id, starred, Utc::now()).await {
        Ok(()) => Json(json!({ "queued": true })).into_response(),
        Err(err) => internal_error(err).into_response(),
    }
}

async fn article_exists(ctx: &AppContext, id: i64) -> anyhow::Result<bool> {
    Ok(db::get_article(&ctx.pool, id).await?.is_some())
}

fn not_found_article() -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "unknown article" })),
    )
        .into_response()
}
