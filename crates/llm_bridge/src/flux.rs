//! Black Forest Labs FLUX image generation
//!
//! Generation is asynchronous: submitting a prompt returns a polling URL
//! which is queried until the job reports a sample.

use anyhow::{Context, Result};
use async_trait::async_trait;
use menupic_core::collaborators::ImageGenerator;
use menupic_core::error::{ServiceError, ServiceResult};
use menupic_core::types::PollHandle;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::http::{decode_json, read_raw, transport_error};

pub const DEFAULT_FLUX_ENDPOINT: &str = "https://api.bfl.ai/v1/flux-2-pro";

/// Configuration for the FLUX client
#[derive(Debug, Clone)]
pub struct FluxConfig {
    /// API key sent as `x-key`
    pub api_key: String,
    /// Generation endpoint
    pub endpoint: String,
    /// Timeout in seconds
    pub timeout_secs: u64,
}

impl FluxConfig {
    /// Create config from environment variable
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("BLACK_FOREST_LABS_API_KEY")
            .context("BLACK_FOREST_LABS_API_KEY environment variable not set")?;

        Ok(Self::with_key(api_key))
    }

    pub fn with_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: DEFAULT_FLUX_ENDPOINT.to_string(),
            timeout_secs: 20,
        }
    }
}

/// Body of a FLUX generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluxRequest {
    pub prompt: String,
    pub seed: u64,
    pub width: u32,
    pub height: u32,
    pub safety_tolerance: u32,
    pub steps: u32,
    pub guidance: f64,
}

impl FluxRequest {
    /// Request with the small, fast defaults used for dish previews
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            seed: 42,
            width: 512,
            height: 512,
            safety_tolerance: 5,
            steps: 10,
            guidance: 10.0,
        }
    }
}

/// Extract the polling URL from a submit response
pub fn polling_url(response: &Value) -> ServiceResult<PollHandle> {
    response
        .get("polling_url")
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(|url| PollHandle(url.to_string()))
        .ok_or_else(|| ServiceError::InvalidResponse("No polling_url in response".to_string()))
}

/// FLUX API client
pub struct FluxClient {
    config: FluxConfig,
    client: reqwest::Client,
}

impl FluxClient {
    pub fn new(config: FluxConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { config, client })
    }

    /// Create client from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(FluxConfig::from_env()?)
    }

    /// Submit a generation job; returns upstream status and body untouched
    pub async fn submit_raw(&self, request: &FluxRequest) -> ServiceResult<(u16, String)> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .header("accept", "application/json")
            .header("x-key", &self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;
        read_raw(response).await
    }

    /// Query a polling URL; returns upstream status and body untouched
    pub async fn poll_raw(&self, polling_url: &str) -> ServiceResult<(u16, String)> {
        let response = self
            .client
            .get(polling_url)
            .header("accept", "application/json")
            .header("x-key", &self.config.api_key)
            .send()
            .await
            .map_err(transport_error)?;
        read_raw(response).await
    }
}

#[async_trait]
impl ImageGenerator for FluxClient {
    async fn start_generation(&self, prompt: &str) -> ServiceResult<PollHandle> {
        info!("submitting FLUX job");
        let (status, body) = self.submit_raw(&FluxRequest::new(prompt)).await?;
        let response: Value = decode_json(status, &body)?;
        polling_url(&response)
    }

    async fn poll(&self, handle: &PollHandle) -> ServiceResult<Value> {
        let (status, body) = self.poll_raw(&handle.0).await?;
        debug!("FLUX poll {}: {}", status, body);
        decode_json(status, &body)
    }
}
