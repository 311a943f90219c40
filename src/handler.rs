use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::error;

use crate::error::{PipelineError, PipelineResult};

/// Fixed-shape body returned to callers on any handler failure. The
/// underlying cause is logged but never leaks into the response.
pub const ERROR_BODY: &str =
    r#"{"error":"There was an error","message":"We couldn't process the request"}"#;

/// Response produced by the deployed function's entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerResponse {
    pub status_code: u16,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Value,
}

/// One outbound JSON GET. Abstracted so the handler can be exercised
/// without a network.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn get(&self, url: &str) -> PipelineResult<UpstreamResponse>;
}

pub struct HttpUpstreamClient {
    client: reqwest::Client,
}

impl HttpUpstreamClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpUpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn get(&self, url: &str) -> PipelineResult<UpstreamResponse> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| PipelineError::UpstreamRequest { source: err.into() })?;
        let status = response.status().as_u16();
        let body: Value = response
            .json()
            .await
            .map_err(|err| PipelineError::UpstreamRequest { source: err.into() })?;
        Ok(UpstreamResponse { status, body })
    }
}

/// The compute-runtime entry point served by the deployed artifact: one GET
/// to the configured URL; the upstream status and re-serialized JSON body on
/// success, a fixed 500 on any failure.
pub struct Handler {
    upstream: Arc<dyn UpstreamClient>,
    url: String,
}

impl Handler {
    pub fn new(upstream: Arc<dyn UpstreamClient>, url: impl Into<String>) -> Self {
        Self {
            upstream,
            url: url.into(),
        }
    }

    /// Read the upstream URL from `API_URL`, as the deployed environment
    /// injects it.
    pub fn from_env(upstream: Arc<dyn UpstreamClient>) -> Result<Self> {
        let url = std::env::var("API_URL").context("API_URL is not set")?;
        Ok(Self::new(upstream, url))
    }

    pub async fn handle(&self) -> HandlerResponse {
        match self.try_handle().await {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, "Upstream request failed");
                HandlerResponse {
                    status_code: 500,
                    body: ERROR_BODY.to_string(),
                }
            }
        }
    }

    async fn try_handle(&self) -> PipelineResult<HandlerResponse> {
        let upstream = self.upstream.get(&self.url).await?;
        let body = serde_json::to_string(&upstream.body)
            .map_err(|err| PipelineError::UpstreamRequest { source: err.into() })?;
        Ok(HandlerResponse {
            status_code: upstream.status,
            body,
        })
    }
}
