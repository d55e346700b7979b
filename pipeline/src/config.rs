use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::{PipelineError, Result};

pub const DEFAULT_BASE_URL: &str = "https://web.zapper.fi";
pub const DEFAULT_PAGE_SIZE: u32 = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root of the aggregation API; `/v2/balances` and `/graphql` hang off it.
    pub base_url: String,
    pub api_key: Option<String>,
    pub handshake_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub page_size: u32,
    pub update_buffer_size: usize,
    pub log_level: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            handshake_timeout_secs: 15,
            fetch_timeout_secs: 20,
            page_size: DEFAULT_PAGE_SIZE,
            update_buffer_size: 256,
            log_level: "info".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by whatever is set in the environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(base_url) = env::var("ZAPPER_WEB_API") {
            config.base_url = base_url;
        }
        config.api_key = env::var("ZAPPER_API_KEY").ok().filter(|k| !k.is_empty());
        if let Some(secs) = parse_env("PIPELINE_HANDSHAKE_TIMEOUT_SECS")? {
            config.handshake_timeout_secs = secs;
        }
        if let Some(secs) = parse_env("PIPELINE_FETCH_TIMEOUT_SECS")? {
            config.fetch_timeout_secs = secs;
        }
        if let Some(size) = parse_env("PIPELINE_PAGE_SIZE")? {
            config.page_size = size;
        }
        if let Some(size) = parse_env("PIPELINE_UPDATE_BUFFER")? {
            config.update_buffer_size = size;
        }
        if let Ok(level) = env::var("PIPELINE_LOG_LEVEL") {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| PipelineError::Config(format!("invalid base url {}: {}", self.base_url, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(PipelineError::Config(format!("unsupported scheme: {}", url.scheme())));
        }
        if self.handshake_timeout_secs == 0 || self.fetch_timeout_secs == 0 {
            return Err(PipelineError::Config("timeouts must be non-zero".to_string()));
        }
        if self.page_size == 0 {
            return Err(PipelineError::Config("page size must be non-zero".to_string()));
        }
        if self.update_buffer_size == 0 {
            return Err(PipelineError::Config("update buffer must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Join a path onto the base url without doubling slashes.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PipelineError::Config(format!("{} is not a valid number: {}", key, raw))),
        Err(_) => Ok(None),
    }
}
