use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use tracing::debug;

use super::types::*;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Transport-level result of one API call. Retryable conditions are data,
/// not errors; `Err` is reserved for conditions no retry can fix.
pub(crate) enum ApiOutcome<T> {
    Ok(T),
    RateLimited { retry_after: Option<Duration> },
    Transient { message: String },
}

pub(crate) struct ClaudeClient {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl ClaudeClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            http: reqwest::Client::new(),
            base_url: ANTHROPIC_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    pub async fn chat(
        &self,
        request: &ChatRequest,
        timeout: Duration,
    ) -> Result<ApiOutcome<ChatResponse>> {
        let url = format!("{}/messages", self.base_url);

        debug!(model = %request.model, "Claude chat request");

        let response = match self
            .http
            .post(&url)
            .headers(self.headers()?)
            .timeout(timeout)
            .json(request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_timeout() || e.is_connect() => {
                return Ok(ApiOutcome::Transient {
                    message: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Ok(ApiOutcome::RateLimited { retry_after });
        }
        if status.is_server_error() {
            return Ok(ApiOutcome::Transient {
                message: format!("Claude API {status}"),
            });
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Claude API error ({status}): {error_text}"));
        }

        Ok(ApiOutcome::Ok(response.json().await?))
    }

    pub async fn create_batch(&self, body: &BatchCreateBody) -> Result<ApiOutcome<BatchMeta>> {
        let url = format!("{}/messages/batches", self.base_url);

        debug!(requests = body.requests.len(), "Claude batch submit");

        let response = match self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_timeout() || e.is_connect() => {
                return Ok(ApiOutcome::Transient {
                    message: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Ok(ApiOutcome::Transient {
                message: format!("Claude batch API {status}"),
            });
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Claude batch API error ({status}): {error_text}"));
        }

        Ok(ApiOutcome::Ok(response.json().await?))
    }

    pub async fn get_batch(&self, batch_id: &str) -> Result<BatchMeta> {
        let url = format!("{}/messages/batches/{batch_id}", self.base_url);
        let response = self
            .http
            .get(&url)
            .headers(self.headers()?)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Claude batch status error ({status}): {error_text}"));
        }
        Ok(response.json().await?)
    }

    /// Download and parse the JSONL results document.
    pub async fn fetch_results(&self, results_url: &str) -> Result<Vec<BatchResultLine>> {
        let response = self
            .http
            .get(results_url)
            .headers(self.headers()?)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(anyhow!("Claude batch results error ({status})"));
        }
        let body = response.text().await?;
        let mut lines = Vec::new();
        for line in body.lines().filter(|l| !l.trim().is_empty()) {
            lines.push(serde_json::from_str(line)?);
        }
        Ok(lines)
    }
}
