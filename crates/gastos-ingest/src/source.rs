//! Remote page source
//!
//! The collector only needs "give me page n": [`PageSource`]. Every HTTP
//! status, rate limiting included, comes back as a [`PageResponse`]; only
//! transport failures are errors.

use crate::config::PipelineConfig;
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("gastos-ingest/", env!("CARGO_PKG_VERSION"));

/// Status and raw body of one page request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResponse {
    pub status: u16,
    pub body: String,
}

impl PageResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == StatusCode::TOO_MANY_REQUESTS.as_u16()
    }
}

/// Fetches one page of the dataset
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, page: u32) -> Result<PageResponse>;
}

/// `GET <endpoint>?page=<n>` with a static token credential
pub struct HttpPageSource {
    client: Client,
    endpoint: String,
}

impl HttpPageSource {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        match &config.api_token {
            Some(token) => {
                let mut value = HeaderValue::from_str(&format!("Token {}", token))
                    .map_err(|e| IngestError::config(format!("invalid API token: {}", e)))?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            },
            None => warn!("No API token configured; requests will be sent without credentials"),
        }

        let client = Client::builder()
            .timeout(config.http_timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.api_url.clone(),
        })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch_page(&self, page: u32) -> Result<PageResponse> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("page", page)])
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(page, status, bytes = body.len(), "Fetched page");

        Ok(PageResponse { status, body })
    }
}
