//! Outbound webhook delivery.
//!
//! The dispatcher only needs a minimal client surface, kept behind a trait
//! so tests can record calls instead of hitting the network.

use async_trait::async_trait;
use thiserror::Error;

/// One outbound webhook call, fully materialized.
#[derive(Debug, Clone)]
pub struct HookRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// What came back from the webhook target.
#[derive(Debug)]
pub struct HookResponse {
    pub status: u16,
    pub body: String,
}

/// Delivery failures. Absorbed by the dispatcher, never surfaced to the
/// inbound caller.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("invalid webhook method `{0}`")]
    Method(String),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// HTTP client surface the dispatcher needs for webhook calls.
#[async_trait]
pub trait HookClient: Send + Sync {
    async fn execute(&self, request: HookRequest) -> Result<HookResponse, HookError>;
}

/// `reqwest`-backed delivery used by the running server.
#[derive(Default)]
pub struct ReqwestHookClient {
    client: reqwest::Client,
}

impl ReqwestHookClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HookClient for ReqwestHookClient {
    async fn execute(&self, request: HookRequest) -> Result<HookResponse, HookError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| HookError::Method(request.method.clone()))?;

        let mut builder = self.client.request(method, &request.url).body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(HookResponse { status, body })
    }
}
