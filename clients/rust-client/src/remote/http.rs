use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, IF_MATCH, IF_NONE_MATCH};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tilldb_core::{
    Document, ListOptions, ListResult, Precondition, PutResponse, RemoveResponse, StoreError,
    StoreResult,
};

use super::RemoteStore;

/// [`RemoteStore`] over the tilldb HTTP API
pub struct HttpRemoteStore {
    base_url: Url,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpRemoteStore {
    pub fn new(base_url: &str) -> StoreResult<Self> {
        Self::with_options(base_url, None, Duration::from_secs(30))
    }

    pub(crate) fn with_options(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> StoreResult<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| StoreError::Unavailable(format!("invalid remote url '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::Unavailable(format!(
                "remote url '{}' cannot be a base",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(16)
            .build()
            .map_err(|e| StoreError::Unavailable(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            base_url,
            token,
            client,
        })
    }

    pub fn set_token(&mut self, token: &str) {
        self.token = Some(token.to_string());
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// URL for the given path segments, each segment percent-encoded
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn headers(&self, precondition: Precondition) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        match precondition {
            Precondition::Any => {}
            Precondition::Absent => {
                headers.insert(IF_NONE_MATCH, HeaderValue::from_static("*"));
            }
            Precondition::Revision(rev) => {
                if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", rev)) {
                    headers.insert(IF_MATCH, value);
                }
            }
        }
        headers
    }

    async fn request<T>(
        &self,
        method: Method,
        url: Url,
        precondition: Precondition,
        body: Option<&Value>,
    ) -> StoreResult<T>
    where
        T: DeserializeOwned,
    {
        let path = url.path().to_string();
        let mut request = self
            .client
            .request(method.clone(), url)
            .headers(self.headers(precondition));
        if let Some(b) = body {
            request = request.json(b);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            tracing::debug!(%method, path, %status, "remote request rejected");
            return Err(error_from_status(status, &path, &text));
        }

        Ok(serde_json::from_str(&text)?)
    }
}

/// Map an HTTP error response back onto the store taxonomy
fn error_from_status(status: StatusCode, path: &str, body: &str) -> StoreError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| format!("HTTP {} {}: {}", status, path, body));

    match status {
        StatusCode::NOT_FOUND => StoreError::NotFound(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Unauthorized(message),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => StoreError::Conflict(message),
        StatusCode::INSUFFICIENT_STORAGE => StoreError::StorageFull(message),
        StatusCode::BAD_REQUEST => StoreError::InvalidKey(message),
        s if s.is_server_error() => StoreError::Unavailable(message),
        _ => StoreError::Medium(message),
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn get(&self, id: &str) -> StoreResult<Document> {
        let url = self.url(&["_api", "docs", id]);
        match self.request(Method::GET, url, Precondition::Any, None).await {
            Err(StoreError::NotFound(_)) => Err(StoreError::NotFound(id.to_string())),
            other => other,
        }
    }

    async fn put(&self, doc: &Document, precondition: Precondition) -> StoreResult<PutResponse> {
        let url = self.url(&["_api", "docs", &doc.id]);
        self.request(Method::PUT, url, precondition, Some(&doc.to_value()))
            .await
    }

    async fn remove(&self, id: &str, precondition: Precondition) -> StoreResult<RemoveResponse> {
        let url = self.url(&["_api", "docs", id]);
        self.request(Method::DELETE, url, precondition, None).await
    }

    async fn list(&self, namespace: &str, options: &ListOptions) -> StoreResult<ListResult> {
        let mut url = self.url(&["_api", "namespaces", namespace, "docs"]);
        {
            let mut query = url.query_pairs_mut();
            if options.include_docs {
                query.append_pair("include_docs", "true");
            }
            if let Some(start) = &options.start_key {
                query.append_pair("start_key", start);
            }
            if let Some(end) = &options.end_key {
                query.append_pair("end_key", end);
            }
            if let Some(limit) = options.limit {
                query.append_pair("limit", &limit.to_string());
            }
            if options.skip > 0 {
                query.append_pair("skip", &options.skip.to_string());
            }
            if let Some(since) = options.since {
                query.append_pair("since", &since.to_string());
            }
        }
        self.request(Method::GET, url, Precondition::Any, None).await
    }
}
