use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use slipway::error::{PipelineError, PipelineResult};
use slipway::handler::{ERROR_BODY, Handler, UpstreamClient, UpstreamResponse};

struct StaticUpstream {
    status: u16,
    body: Value,
}

#[async_trait]
impl UpstreamClient for StaticUpstream {
    async fn get(&self, _url: &str) -> PipelineResult<UpstreamResponse> {
        Ok(UpstreamResponse {
            status: self.status,
            body: self.body.clone(),
        })
    }
}

struct FailingUpstream;

#[async_trait]
impl UpstreamClient for FailingUpstream {
    async fn get(&self, _url: &str) -> PipelineResult<UpstreamResponse> {
        Err(PipelineError::UpstreamRequest {
            source: anyhow::anyhow!("connection reset"),
        })
    }
}

#[tokio::test]
async fn success_reserializes_the_upstream_body() {
    let upstream = Arc::new(StaticUpstream {
        status: 200,
        body: json!({"price": 100}),
    });
    let handler = Handler::new(upstream, "https://api.example.com/price");

    let response = handler.handle().await;
    assert_eq!(response.status_code, 200);
    assert_eq!(response.body, r#"{"price":100}"#);
}

#[tokio::test]
async fn upstream_status_is_passed_through() {
    let upstream = Arc::new(StaticUpstream {
        status: 503,
        body: json!({"unavailable": true}),
    });
    let handler = Handler::new(upstream, "https://api.example.com/price");

    let response = handler.handle().await;
    assert_eq!(response.status_code, 503);
    assert_eq!(response.body, r#"{"unavailable":true}"#);
}

#[tokio::test]
async fn any_upstream_failure_becomes_the_fixed_500_body() {
    let handler = Handler::new(Arc::new(FailingUpstream), "https://api.example.com/price");

    let response = handler.handle().await;
    assert_eq!(response.status_code, 500);
    assert_eq!(response.body, ERROR_BODY);

    // The error body is itself a JSON string with a stable schema.
    let parsed: Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(parsed["error"], "There was an error");
    assert_eq!(parsed["message"], "We couldn't process the request");
}
