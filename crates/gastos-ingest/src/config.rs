//! Pipeline configuration
//!
//! Every component receives the values it needs from [`PipelineConfig`] at
//! construction time. Defaults target the public brasil.io "gastos diretos"
//! dataset; environment variables override them.

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_DATA_DIR: &str = "dataset";
pub const DEFAULT_API_URL: &str = "https://brasil.io/api/v1/dataset/gastos-diretos/gastos/data/";
pub const DEFAULT_MAX_PAGES: u32 = 3;
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 1_000;
pub const DEFAULT_RATE_LIMIT_DELAY_SECS: u64 = 15;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Runtime configuration for the collection and silver pipelines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root directory holding the raw, bronze and silver layers
    pub data_dir: PathBuf,

    /// Paginated endpoint of the spending dataset
    pub api_url: String,

    /// Static API credential sent as `Authorization: Token <value>`
    #[serde(default, skip_serializing)]
    pub api_token: Option<String>,

    /// Highest page number fetched in one collection run
    pub max_pages: u32,

    /// Pause after every successfully collected page
    pub request_delay: Duration,

    /// Pause before retrying a page answered with HTTP 429
    pub rate_limit_delay: Duration,

    /// Consecutive 429 responses tolerated per page; `None` retries forever
    #[serde(default)]
    pub max_rate_limit_retries: Option<u32>,

    /// Per-request timeout of the HTTP client
    pub http_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            max_pages: DEFAULT_MAX_PAGES,
            request_delay: Duration::from_millis(DEFAULT_REQUEST_DELAY_MS),
            rate_limit_delay: Duration::from_secs(DEFAULT_RATE_LIMIT_DELAY_SECS),
            max_rate_limit_retries: None,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `GASTOS_DATA_DIR`: root data directory
    /// - `GASTOS_API_URL`: dataset endpoint
    /// - `GASTOS_API_TOKEN`: API credential
    /// - `GASTOS_MAX_PAGES`: page ceiling per run
    /// - `GASTOS_REQUEST_DELAY_MS`: delay between successful requests
    /// - `GASTOS_RATE_LIMIT_DELAY_SECS`: backoff after HTTP 429
    /// - `GASTOS_MAX_RATE_LIMIT_RETRIES`: bound on consecutive 429s per page
    /// - `GASTOS_HTTP_TIMEOUT_SECS`: HTTP request timeout
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("GASTOS_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(url) = std::env::var("GASTOS_API_URL") {
            config.api_url = url;
        }
        if let Ok(token) = std::env::var("GASTOS_API_TOKEN") {
            let token = token.trim().to_string();
            config.api_token = (!token.is_empty()).then_some(token);
        }
        if let Some(pages) = env_number::<u32>("GASTOS_MAX_PAGES")? {
            config.max_pages = pages;
        }
        if let Some(ms) = env_number::<u64>("GASTOS_REQUEST_DELAY_MS")? {
            config.request_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = env_number::<u64>("GASTOS_RATE_LIMIT_DELAY_SECS")? {
            config.rate_limit_delay = Duration::from_secs(secs);
        }
        if let Some(retries) = env_number::<u32>("GASTOS_MAX_RATE_LIMIT_RETRIES")? {
            config.max_rate_limit_retries = Some(retries);
        }
        if let Some(secs) = env_number::<u64>("GASTOS_HTTP_TIMEOUT_SECS")? {
            config.http_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        debug!(data_dir = %config.data_dir.display(), api_url = %config.api_url, "Loaded pipeline configuration");
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.api_url.trim().is_empty() {
            return Err(IngestError::config("api_url cannot be empty"));
        }
        if self.max_pages == 0 {
            return Err(IngestError::config("max_pages must be at least 1"));
        }
        Ok(())
    }

    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data_dir)
    }
}

fn env_number<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| IngestError::config(format!("{} must be a number, got '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}

/// On-disk location of each layer under the data root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// One JSON file per collected page
    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("raw")
    }

    pub fn bronze_dir(&self) -> PathBuf {
        self.root.join("bronze")
    }

    pub fn silver_dir(&self) -> PathBuf {
        self.root.join("silver")
    }

    /// Create every layer directory.
    ///
    /// The pipeline cannot run without them, so this is the one failure the
    /// entry points treat as fatal.
    pub fn prepare(&self) -> Result<()> {
        for dir in [self.raw_dir(), self.bronze_dir(), self.silver_dir()] {
            std::fs::create_dir_all(&dir).map_err(|source| IngestError::Layout {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}
