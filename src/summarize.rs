//! On-demand AI summarization with a persistent per-article cache.
//!
//! Repeated requests without the regenerate flag serve the cached summary
//! and consume no external calls. Failure modes stay distinct so callers can
//! decide whether a retry makes sense.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::{self, Pool};

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("article {0} not found")]
    NotFound(i64),
    #[error("article has no content to summarize")]
    NoContent,
    #[error("summarizer API key missing or rejected")]
    MissingApiKey,
    #[error("summarizer rate limited")]
    RateLimited,
    #[error("summarizer unreachable: {0}")]
    Unreachable(String),
    #[error("summarizer API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error(transparent)]
    Db(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryResult {
    pub summary: String,
    pub cached: bool,
}

/// Hosted LLM seam.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String, SummaryError>;
}

/// Client for an Anthropic-style messages API.
pub struct MessagesApiClient {
    http: Client,
    base_url: Url,
    api_key: String,
    model: String,
    max_tokens: u32,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<MessageParam<'a>>,
}

#[derive(Serialize)]
struct MessageParam<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

impl MessagesApiClient {
    pub fn new(
        base_url: Url,
        api_key: String,
        model: String,
        max_tokens: u32,
        timeout: Duration,
    ) -> Self {
        let http = Client::builder()
            .user_agent("feedsync/0.1")
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            api_key,
            model,
            max_tokens,
        }
    }
}

#[async_trait]
impl Summarizer for MessagesApiClient {
    async fn summarize(&self, text: &str) -> Result<String, SummaryError> {
        if self.api_key.trim().is_empty() {
            return Err(SummaryError::MissingApiKey);
        }
        let url = self
            .base_url
            .join("v1/messages")
            .map_err(|e| SummaryError::Unreachable(e.to_string()))?;

        let prompt = format!(
            "Summarize the following article in a few short sentences. \
             Answer with the summary only.\n\n{text}"
        );
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![MessageParam {
                role: "user",
                content: &prompt,
            }],
        };

        let res = self
            .http
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    SummaryError::Unreachable(e.to_string())
                } else {
                    SummaryError::Api {
                        status: 0,
                        message: e.to_string(),
                    }
                }
            })?;

        match res.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(SummaryError::RateLimited),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(SummaryError::MissingApiKey)
            }
            status if !status.is_success() => {
                let message = res.text().await.unwrap_or_default();
                warn!(status = status.as_u16(), "summarizer API error");
                return Err(SummaryError::Api {
                    status: status.as_u16(),
                    message,
                });
            }
            _ => {}
        }

        let payload: MessagesResponse = res.json().await.map_err(|e| SummaryError::Api {
            status: 0,
            message: format!("invalid summarizer response: {e}"),
        })?;
        let summary: String = payload
            .content
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("");
        if summary.trim().is_empty() {
            return Err(SummaryError::Api {
                status: 0,
                message: "summarizer returned no text".into(),
            });
        }
        Ok(summary)
    }
}

/// Summarize one article's best-available content, caching the result.
///
/// Prefers extracted full content over raw feed content. Without the
/// `regenerate` flag a cached summary is served as-is.
pub async fn summarize_article(
    pool: &Pool,
    summarizer: &dyn Summarizer,
    article_id: i64,
    regenerate: bool,
) -> Result<SummaryResult, SummaryError> {
    let article = db::get_article(pool, article_id)
        .await?
        .ok_or(SummaryError::NotFound(article_id))?;

    if !regenerate {
        if let Some(cached) = article.ai_summary.filter(|s| !s.trim().is_empty()) {
            return Ok(SummaryResult {
                summary: cached,
                cached: true,
            });
        }
    }

    let text = article
        .full_content
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or(&article.content);
    if text.trim().is_empty() {
        return Err(SummaryError::NoContent);
    }

    let summary = summarizer.summarize(text).await?;
    db::store_summary(pool, article_id, &summary).await?;
    info!(article_id, regenerate, "summary generated");
    Ok(SummaryResult {
        summary,
        cached: false,
    })
}
