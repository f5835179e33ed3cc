//! On-demand content extraction through the external readability service.
//!
//! Extraction failure is never fatal to the read experience: every failure
//! path answers with the stored feed content and a fallback flag. Each
//! attempt, success or not, lands in the extraction log.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::{self, Pool};

#[derive(Debug, Error)]
pub enum FetchContentError {
    #[error("article {0} not found")]
    NotFound(i64),
    #[error("extraction already in progress for article {0}")]
    InFlight(i64),
    #[error(transparent)]
    Db(#[from] anyhow::Error),
}

/// Envelope answered by the fetch-content operation.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractOutcome {
    pub success: bool,
    pub fallback: bool,
    #[serde(rename = "timedOut")]
    pub timed_out: bool,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// External readability engine seam.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<String>;
}

/// HTTP client for a hosted readability service: POST `{ "url": ... }`,
/// answer `{ "content": ... }`.
pub struct ReadabilityClient {
    http: Client,
    service_url: Url,
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct ExtractResponse {
    content: String,
}

impl ReadabilityClient {
    pub fn new(service_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("feedsync/0.1")
            .build()
            .expect("reqwest client");
        Self { http, service_url }
    }
}

#[async_trait]
impl ContentExtractor for ReadabilityClient {
    async fn extract(&self, url: &str) -> Result<String> {
        let res = self
            .http
            .post(self.service_url.clone())
            .json(&ExtractRequest { url })
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            anyhow::bail!("readability service error {status}: {body}");
        }
        let payload: ExtractResponse = res.json().await?;
        if payload.content.trim().is_empty() {
            anyhow::bail!("readability service returned empty content");
        }
        Ok(payload.content)
    }
}

/// Per-article single-flight wrapper around an extractor.
#[derive(Clone)]
pub struct ExtractService {
    extractor: Arc<dyn ContentExtractor>,
    in_flight: Arc<Mutex<HashSet<i64>>>,
    timeout: Duration,
}

struct FlightGuard {
    set: Arc<Mutex<HashSet<i64>>>,
    id: i64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.set.lock().expect("in-flight lock").remove(&self.id);
    }
}

impl ExtractService {
    pub fn new(extractor: Arc<dyn ContentExtractor>, timeout: Duration) -> Self {
        Self {
            extractor,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            timeout,
        }
    }

    fn try_claim(&self, article_id: i64) -> Option<FlightGuard> {
        let mut set = self.in_flight.lock().expect("in-flight lock");
        if !set.insert(article_id) {
            return None;
        }
        Some(FlightGuard {
            set: Arc::clone(&self.in_flight),
            id: article_id,
        })
    }

    /// Extract readable content for one article, persisting on success.
    ///
    /// Cached full content is served without an external call unless `force`
    /// is set. At most one extraction per article is in flight at a time.
    pub async fn fetch_content(
        &self,
        pool: &Pool,
        article_id: i64,
        force: bool,
    ) -> Result<ExtractOutcome, FetchContentError> {
        let article = db::get_article(pool, article_id)
            .await?
            .ok_or(FetchContentError::NotFound(article_id))?;

        if !force {
            if let Some(full) = article.full_content.as_deref().filter(|c| !c.is_empty()) {
                return Ok(ExtractOutcome {
                    success: true,
                    fallback: false,
                    timed_out: false,
                    content: full.to_string(),
                    error: None,
                });
            }
        }

        let Some(url) = article.url.as_deref().filter(|u| !u.is_empty()) else {
            db::append_extraction_log(pool, article_id, false, 0, Some("article has no source URL"))
                .await?;
            return Ok(fallback_outcome(
                article.content,
                false,
                "article has no source URL",
            ));
        };

        let _guard = self
            .try_claim(article_id)
            .ok_or(FetchContentError::InFlight(article_id))?;

        let started = std::time::Instant::now();
        let attempt = tokio::time::timeout(self.timeout, self.extractor.extract(url)).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        match attempt {
            Ok(Ok(content)) => {
                db::store_full_content(pool, article_id, &content).await?;
                db::append_extraction_log(pool, article_id, true, duration_ms, None).await?;
                info!(article_id, duration_ms, "content extracted");
                Ok(ExtractOutcome {
                    success: true,
                    fallback: false,
                    timed_out: false,
                    content,
                    error: None,
                })
            }
            Ok(Err(err)) => {
                let msg = format!("{err:#}");
                db::append_extraction_log(pool, article_id, false, duration_ms, Some(&msg)).await?;
                warn!(article_id, %msg, "extraction failed; serving feed content");
                Ok(fallback_outcome(article.content, false, &msg))
            }
            Err(_) => {
                db::append_extraction_log(pool, article_id, false, duration_ms, Some("timeout"))
                    .await?;
                warn!(article_id, duration_ms, "extraction timed out; serving feed content");
                Ok(fallback_outcome(article.content, true, "extraction timed out"))
            }
        }
    }
}

fn fallback_outcome(content: String, timed_out: bool, error: &str) -> ExtractOutcome {
    ExtractOutcome {
        success: false,
        fallback: true,
        timed_out,
        content,
        error: Some(error.to_string()),
    }
}
