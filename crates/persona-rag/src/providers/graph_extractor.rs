//! Entity/relation extraction provider

use async_trait::async_trait;
use std::time::Duration;

use crate::config::GraphConfig;
use crate::error::{Error, Result};
use crate::graph::schema::{graph_extraction_schema, ChunkGraph};

/// Prompted entity/relation extraction over chunk content
#[async_trait]
pub trait GraphExtractor: Send + Sync {
    async fn extract_graph(&self, content: &str) -> Result<ChunkGraph>;
}

/// HTTP client for the graph-extraction service
pub struct HttpGraphExtractor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGraphExtractor {
    pub fn new(config: &GraphConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config.extractor_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl GraphExtractor for HttpGraphExtractor {
    async fn extract_graph(&self, content: &str) -> Result<ChunkGraph> {
        let response = self
            .client
            .post(format!("{}/extract-graph", self.base_url))
            .json(&serde_json::json!({
                "content": content,
                "schema": graph_extraction_schema(),
            }))
            .send()
            .await
            .map_err(|e| Error::GraphExtraction(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::GraphExtraction(e.to_string()))?;

        response
            .json::<ChunkGraph>()
            .await
            .map_err(|e| Error::GraphExtraction(format!("response violated schema: {}", e)))
    }
}
