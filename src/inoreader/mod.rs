use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::ApiUsage;

pub mod model;

pub use model::{
    StreamContents, StreamItem, SubscriptionList, TagList, UnreadCountList, READ_STATE,
    STARRED_STATE,
};

/// Typed failures from the remote reader API.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("rate limited by remote (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },
    #[error("remote API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("failed to reach remote: {0}")]
    Http(#[from] reqwest::Error),
}

/// Parameters for one stream-contents call.
#[derive(Debug, Clone, Default)]
pub struct StreamRequest {
    /// Only items newer than this epoch-seconds timestamp.
    pub since: Option<i64>,
    /// Item ceiling for this call.
    pub limit: usize,
    /// Continuation token from a previous page.
    pub continuation: Option<String>,
    /// Exclude items already carrying the remote read state.
    pub exclude_read: bool,
}

/// Remote feed source seam; the orchestrator only talks through this trait so
/// tests can substitute recorded fakes.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn subscriptions(&self) -> Result<SubscriptionList, RemoteError>;
    async fn tag_list(&self) -> Result<TagList, RemoteError>;
    async fn unread_counts(&self) -> Result<UnreadCountList, RemoteError>;
    async fn stream_contents(&self, req: &StreamRequest) -> Result<StreamContents, RemoteError>;
    /// Batched edit-tag call: adds/removes one state label on many items.
    async fn edit_tag(
        &self,
        item_ids: &[String],
        add: Option<&str>,
        remove: Option<&str>,
    ) -> Result<(), RemoteError>;

    /// Latest per-zone quota snapshot, when the source tracks one.
    fn usage(&self) -> ApiUsage {
        ApiUsage::default()
    }
}

#[derive(Clone)]
pub struct InoreaderClient {
    http: Client,
    base_url: Url,
    token: String,
    app_id: String,
    app_key: String,
    usage: Arc<Mutex<ApiUsage>>,
}

impl fmt::Debug for InoreaderClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InoreaderClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl InoreaderClient {
    pub fn new(base_url: Url, token: String, app_id: String, app_key: String) -> Self {
        let http = Client::builder()
            .user_agent("feedsync/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            token,
            app_id,
            app_key,
            usage: Arc::new(Mutex::new(ApiUsage::default())),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        self.base_url.join(path).map_err(|e| RemoteError::Api {
            status: 0,
            message: format!("invalid endpoint {path}: {e}"),
        })
    }

    /// Pull the zone usage headers off every response; quota tracking needs
    /// them even when the call itself fails.
    fn capture_usage(&self, res: &Response) {
        fn header_i64(res: &Response, name: &str) -> Option<i64> {
            res.headers()
                .get(name)?
                .to_str()
                .ok()?
                .trim()
                .parse()
                .ok()
        }
        let mut usage = self.usage.lock().expect("usage lock");
        if let Some(v) = header_i64(res, "X-Reader-Zone1-Usage") {
            usage.zone1_usage = v;
        }
        if let Some(v) = header_i64(res, "X-Reader-Zone1-Limit") {
            usage.zone1_limit = v;
        }
        if let Some(v) = header_i64(res, "X-Reader-Zone2-Usage") {
            usage.zone2_usage = v;
        }
        if let Some(v) = header_i64(res, "X-Reader-Zone2-Limit") {
            usage.zone2_limit = v;
        }
    }

    async fn check(&self, res: Response) -> Result<Response, RemoteError> {
        self.capture_usage(&res);
        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = res
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            warn!(?retry_after, "rate limited by remote reader API");
            return Err(RemoteError::RateLimited { retry_after });
        }
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let message = res.text().await.unwrap_or_default();
            warn!(status, "remote reader API error");
            return Err(RemoteError::Api { status, message });
        }
        Ok(res)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, RemoteError> {
        let url = self.endpoint(path)?;
        debug!(%url, "remote GET");
        let res = self
            .http
            .get(url)
            .query(query)
            .bearer_auth(&self.token)
            .header("AppId", &self.app_id)
            .header("AppKey", &self.app_key)
            .send()
            .await?;
        let res = self.check(res).await?;
        Ok(res.json::<T>().await?)
    }
}

#[async_trait]
impl FeedSource for InoreaderClient {
    async fn subscriptions(&self) -> Result<SubscriptionList, RemoteError> {
        self.get_json("subscription/list", &[]).await
    }

    async fn tag_list(&self) -> Result<TagList, RemoteError> {
        self.get_json("tag/list", &[]).await
    }

    async fn unread_counts(&self) -> Result<UnreadCountList, RemoteError> {
        self.get_json("unread-count", &[]).await
    }

    async fn stream_contents(&self, req: &StreamRequest) -> Result<StreamContents, RemoteError> {
        let mut query: Vec<(&str, String)> = vec![("n", req.limit.to_string())];
        if let Some(since) = req.since {
            query.push(("ot", since.to_string()));
        }
        if let Some(continuation) = &req.continuation {
            query.push(("c", continuation.clone()));
        }
        if req.exclude_read {
            query.push(("xt", READ_STATE.to_string()));
        }
        self.get_json(
            "stream/contents/user/-/state/com.google/reading-list",
            &query,
        )
        .await
    }

    async fn edit_tag(
        &self,
        item_ids: &[String],
        add: Option<&str>,
        remove: Option<&str>,
    ) -> Result<(), RemoteError> {
        let url = self.endpoint("edit-tag")?;
        let mut form: Vec<(&str, String)> = item_ids.iter().map(|id| ("i", id.clone())).collect();
        if let Some(label) = add {
            form.push(("a", label.to_string()));
        }
        if let Some(label) = remove {
            form.push(("r", label.to_string()));
        }
        debug!(%url, items = item_ids.len(), "remote edit-tag");
        let res = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .header("AppId", &self.app_id)
            .header("AppKey", &self.app_key)
            .form(&form)
            .send()
            .await?;
        self.check(res).await?;
        Ok(())
    }

    fn usage(&self) -> ApiUsage {
        *self.usage.lock().expect("usage lock")
    }
}
