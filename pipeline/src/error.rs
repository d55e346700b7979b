use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Network;

/// One entry of a GraphQL `errors` array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default)]
    pub path: Option<Vec<serde_json::Value>>,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Request timeout: {0}")]
    Timeout(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Fetch failed: {0}")]
    Fetch(String),
    #[error("GraphQL error: {}", .0.iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join("; "))]
    GraphQl(Vec<GraphQlError>),
    #[error("Network request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported network for NFT queries: {0}")]
    UnsupportedNetwork(Network),
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error as kept in component state and handed to renderers.
///
/// `PipelineError` wraps non-cloneable transport errors, so state keeps this
/// flattened copy instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Timeout,
    Decode,
    Fetch,
    Config,
}

impl From<&PipelineError> for ErrorInfo {
    fn from(err: &PipelineError) -> Self {
        let kind = match err {
            PipelineError::Connection(_) => ErrorKind::Connection,
            PipelineError::Timeout(_) => ErrorKind::Timeout,
            PipelineError::Decode(_) | PipelineError::Json(_) => ErrorKind::Decode,
            PipelineError::Fetch(_)
            | PipelineError::GraphQl(_)
            | PipelineError::Http(_)
            | PipelineError::UnsupportedNetwork(_) => ErrorKind::Fetch,
            PipelineError::Config(_) => ErrorKind::Config,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}
