use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use feedsync::db::{self, NewArticle};
use feedsync::extract::{ContentExtractor, ExtractService, FetchContentError};
use feedsync::summarize::{self, Summarizer, SummaryError};

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

async fn seed_article(pool: &sqlx::SqlitePool, url: Option<&str>) -> i64 {
    let feed_id = db::upsert_feed(pool, "feed/s", "services feed", None, None)
        .await
        .unwrap();
    let new = NewArticle {
        remote_id: "item/s1".into(),
        feed_id,
        title: "service test".into(),
        author: None,
        url: url.map(str::to_string),
        content: "<p>feed body</p>".into(),
        is_read: false,
        is_starred: false,
        published_at: None,
    };
    db::upsert_article(pool, &new, Utc::now())
        .await
        .unwrap()
        .article_id()
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

struct ScriptedExtractor {
    calls: AtomicUsize,
    behaviour: Behaviour,
}

enum Behaviour {
    Succeed(String),
    Fail,
    Hang,
}

impl ScriptedExtractor {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            behaviour,
        })
    }
}

#[async_trait]
impl ContentExtractor for ScriptedExtractor {
    async fn extract(&self, _url: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::Succeed(content) => Ok(content.clone()),
            Behaviour::Fail => anyhow::bail!("boilerplate detector exploded"),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!()
            }
        }
    }
}

#[tokio::test]
async fn successful_extraction_is_persisted_and_cached() {
    let pool = setup_pool().await;
    let id = seed_article(&pool, Some("https://example.com/a")).await;

    let extractor = ScriptedExtractor::new(Behaviour::Succeed("<article>clean</article>".into()));
    let service = ExtractService::new(extractor.clone(), Duration::from_secs(10));

    let outcome = service.fetch_content(&pool, id, false).await.unwrap();
    assert!(outcome.success);
    assert!(!outcome.fallback);
    assert_eq!(outcome.content, "<article>clean</article>");

    // Second request is served from the store, no external call.
    let outcome = service.fetch_content(&pool, id, false).await.unwrap();
    assert!(outcome.success);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);

    // Force refresh extracts again.
    service.fetch_content(&pool, id, true).await.unwrap();
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn extractor_failure_falls_back_to_feed_content() {
    let pool = setup_pool().await;
    let id = seed_article(&pool, Some("https://example.com/a")).await;

    let service = ExtractService::new(
        ScriptedExtractor::new(Behaviour::Fail),
        Duration::from_secs(10),
    );
    let outcome = service.fetch_content(&pool, id, false).await.unwrap();

    assert!(!outcome.success);
    assert!(outcome.fallback);
    assert_eq!(outcome.content, "<p>feed body</p>");
    assert!(outcome.error.is_some());

    // Stored feed content is unchanged and nothing was persisted as full content.
    let article = db::get_article(&pool, id).await.unwrap().unwrap();
    assert_eq!(article.content, "<p>feed body</p>");
    assert!(article.full_content.is_none());

    // The attempt landed in the extraction log.
    let logged: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM extraction_log WHERE article_id = ? AND success = 0",
    )
    .bind(id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(logged, 1);
}

#[tokio::test]
async fn extraction_timeout_is_reported_as_such() {
    let pool = setup_pool().await;
    let id = seed_article(&pool, Some("https://example.com/a")).await;

    let service = ExtractService::new(
        ScriptedExtractor::new(Behaviour::Hang),
        Duration::from_millis(50),
    );
    let outcome = service.fetch_content(&pool, id, false).await.unwrap();

    assert!(!outcome.success);
    assert!(outcome.fallback);
    assert!(outcome.timed_out);
    assert_eq!(outcome.content, "<p>feed body</p>");
}

#[tokio::test]
async fn article_without_url_gets_fallback_without_external_call() {
    let pool = setup_pool().await;
    let id = seed_article(&pool, None).await;

    let extractor = ScriptedExtractor::new(Behaviour::Succeed("unused".into()));
    let service = ExtractService::new(extractor.clone(), Duration::from_secs(10));
    let outcome = service.fetch_content(&pool, id, false).await.unwrap();

    assert!(outcome.fallback);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_article_is_a_typed_error() {
    let pool = setup_pool().await;
    let service = ExtractService::new(
        ScriptedExtractor::new(Behaviour::Fail),
        Duration::from_secs(10),
    );
    let err = service.fetch_content(&pool, 999, false).await.unwrap_err();
    assert!(matches!(err, FetchContentError::NotFound(999)));
}

// ---------------------------------------------------------------------------
// Summarization
// ---------------------------------------------------------------------------

struct CountingSummarizer {
    calls: AtomicUsize,
    fail_with: Option<fn() -> SummaryError>,
}

impl CountingSummarizer {
    fn ok() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_with: None,
        }
    }

    fn failing(f: fn() -> SummaryError) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_with: Some(f),
        }
    }
}

#[async_trait]
impl Summarizer for CountingSummarizer {
    async fn summarize(&self, text: &str) -> Result<String, SummaryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(f) = self.fail_with {
            return Err(f());
        }
        Ok(format!("summary of {} bytes", text.len()))
    }
}

#[tokio::test]
async fn second_summarize_call_is_served_from_cache() {
    let pool = setup_pool().await;
    let id = seed_article(&pool, None).await;
    let summarizer = CountingSummarizer::ok();

    let first = summarize::summarize_article(&pool, &summarizer, id, false)
        .await
        .unwrap();
    assert!(!first.cached);

    let second = summarize::summarize_article(&pool, &summarizer, id, false)
        .await
        .unwrap();
    assert!(second.cached);
    assert_eq!(second.summary, first.summary);
    assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn regenerate_overwrites_the_cached_summary() {
    let pool = setup_pool().await;
    let id = seed_article(&pool, None).await;
    let summarizer = CountingSummarizer::ok();

    summarize::summarize_article(&pool, &summarizer, id, false)
        .await
        .unwrap();
    let again = summarize::summarize_article(&pool, &summarizer, id, true)
        .await
        .unwrap();
    assert!(!again.cached);
    assert_eq!(summarizer.calls.load(Ordering::SeqCst), 2);

    let article = db::get_article(&pool, id).await.unwrap().unwrap();
    assert_eq!(article.ai_summary.as_deref(), Some(again.summary.as_str()));
}

#[tokio::test]
async fn extracted_content_is_preferred_over_feed_content() {
    let pool = setup_pool().await;
    let id = seed_article(&pool, None).await;
    db::store_full_content(&pool, id, &"x".repeat(500)).await.unwrap();

    let summarizer = CountingSummarizer::ok();
    let result = summarize::summarize_article(&pool, &summarizer, id, false)
        .await
        .unwrap();
    assert_eq!(result.summary, "summary of 500 bytes");
}

#[tokio::test]
async fn empty_article_yields_no_content_error() {
    let pool = setup_pool().await;
    let feed_id = db::upsert_feed(&pool, "feed/e", "empty", None, None).await.unwrap();
    let new = NewArticle {
        remote_id: "item/e1".into(),
        feed_id,
        title: "empty".into(),
        author: None,
        url: None,
        content: "".into(),
        is_read: false,
        is_starred: false,
        published_at: None,
    };
    let id = db::upsert_article(&pool, &new, Utc::now())
        .await
        .unwrap()
        .article_id();

    let summarizer = CountingSummarizer::ok();
    let err = summarize::summarize_article(&pool, &summarizer, id, false)
        .await
        .unwrap_err();
    assert!(matches!(err, SummaryError::NoContent));
    assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn summarizer_failures_stay_distinct() {
    let pool = setup_pool().await;
    let id = seed_article(&pool, None).await;

    let rate_limited = CountingSummarizer::failing(|| SummaryError::RateLimited);
    let err = summarize::summarize_article(&pool, &rate_limited, id, false)
        .await
        .unwrap_err();
    assert!(matches!(err, SummaryError::RateLimited));

    let no_key = CountingSummarizer::failing(|| SummaryError::MissingApiKey);
    let err = summarize::summarize_article(&pool, &no_key, id, false)
        .await
        .unwrap_err();
    assert!(matches!(err, SummaryError::MissingApiKey));

    // Failures never cache anything.
    let article = db::get_article(&pool, id).await.unwrap().unwrap();
    assert!(article.ai_summary.is_none());
}
