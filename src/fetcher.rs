use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, USER_AGENT};
use tracing::{debug, error};

use crate::config::FeedConfig;
use crate::error::{FeedError, Result};

/// Source of raw page bodies. One GET per call, no retries.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// `reqwest`-backed fetcher that always sends the configured user agent and
/// accept-language headers.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let ua = HeaderValue::from_str(&config.user_agent)
            .map_err(|_| FeedError::InvalidHeader { name: "user-agent" })?;
        let lang = HeaderValue::from_str(&config.accept_language)
            .map_err(|_| FeedError::InvalidHeader { name: "accept-language" })?;
        headers.insert(USER_AGENT, ua);
        headers.insert(ACCEPT_LANGUAGE, lang);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        debug!("fetching {}", url);
        // The response is owned by this scope and released on every path.
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            error!("HTTP error fetching {}: status {}", url, status.as_u16());
            return Err(FeedError::Status { url: url.to_string(), status: status.as_u16() });
        }
        let body = response.text().await?;
        if body.is_empty() {
            return Err(FeedError::EmptyResponse { url: url.to_string() });
        }
        Ok(body)
    }
}
