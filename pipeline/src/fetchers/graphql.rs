use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::queries::{Edge, GraphQlRequest, PagedQuery};
use crate::config::PipelineConfig;
use crate::error::{GraphQlError, PipelineError, Result};

/// Where pages come from. The GraphQL client is the production source.
#[async_trait]
pub trait PageSource<Q: PagedQuery>: Send + Sync {
    async fn fetch_page(&self, query: &Q, after: Option<&str>) -> Result<Vec<Edge<Q::Node>>>;
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Clone)]
pub struct GraphQlClient {
    config: Arc<PipelineConfig>,
    client: Client,
}

impl GraphQlClient {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder().build()?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: PipelineConfig, client: Client) -> Self {
        Self {
            config: Arc::new(config),
            client,
        }
    }

    pub fn endpoint(&self) -> String {
        self.config.endpoint("graphql")
    }

    /// POST a request and return its `data` object.
    pub async fn execute(&self, request: &GraphQlRequest) -> Result<Value> {
        let timeout = self.config.fetch_timeout();
        let call = async {
            let mut builder = self
                .client
                .post(self.endpoint())
                .header(header::CONTENT_TYPE, "application/json")
                .json(request);
            if let Some(api_key) = &self.config.api_key {
                builder = builder.header(header::AUTHORIZATION, format!("Basic {}", api_key));
            }

            let response = builder.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(PipelineError::Fetch(format!("graphql request failed with status {}", status)));
            }
            let body: GraphQlResponse = response.json().await?;
            Ok::<_, PipelineError>(body)
        };

        let body = tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| PipelineError::Timeout(format!("graphql request exceeded {:?}", timeout)))??;

        if let Some(errors) = body.errors.filter(|e| !e.is_empty()) {
            warn!("⚠️ GraphQL returned {} error(s)", errors.len());
            return Err(PipelineError::GraphQl(errors));
        }

        body.data
            .filter(|data| !data.is_null())
            .ok_or_else(|| PipelineError::Fetch("graphql response has no data".to_string()))
    }
}

#[async_trait]
impl<Q: PagedQuery> PageSource<Q> for GraphQlClient {
    async fn fetch_page(&self, query: &Q, after: Option<&str>) -> Result<Vec<Edge<Q::Node>>> {
        let request = query.request(after);
        let data = self.execute(&request).await?;

        let edges = data
            .get(Q::FIELD)
            .and_then(|connection| connection.get("edges"))
            .cloned()
            .ok_or_else(|| PipelineError::Fetch(format!("response is missing {}.edges", Q::FIELD)))?;
        let edges: Vec<Edge<Q::Node>> = serde_json::from_value(edges)?;

        debug!("Fetched {} {} edge(s) after {:?}", edges.len(), Q::FIELD, after);
        Ok(edges)
    }
}
