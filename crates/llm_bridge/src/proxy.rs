//! Client for the key-holding proxy server
//!
//! Keeps API keys off the device: identification goes through
//! `/api/gemini-proxy` and image jobs through `/api/black-forest-proxy`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use menupic_core::collaborators::{DishIdentifier, ImageGenerator};
use menupic_core::error::{ServiceError, ServiceResult};
use menupic_core::types::{DishIdentification, PollHandle, ViewportPoint, ViewportTextBlock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::flux::{polling_url, FluxRequest};
use crate::http::{read_json, transport_error};
use crate::prompt::{build_identify_prompt, parse_identification};

/// Configuration for the proxy client
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Base URL of the proxy server (default: http://127.0.0.1:3000)
    pub base_url: String,
    /// Timeout in seconds for identification and job submission
    pub timeout_secs: u64,
    /// Timeout in seconds for a single poll request
    pub poll_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            timeout_secs: 60,
            poll_timeout_secs: 20,
        }
    }
}

impl ProxyConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }
}

/// Body of `POST /api/gemini-proxy`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiProxyRequest {
    pub prompt: Option<String>,
}

/// Answer of `POST /api/gemini-proxy`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeminiProxyResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of `POST /api/black-forest-proxy`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum FluxProxyRequest {
    Generate {
        prompt: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seed: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        height: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        safety_tolerance: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        steps: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        guidance: Option<f64>,
    },
    Poll {
        #[serde(rename = "pollUrl")]
        poll_url: Option<String>,
    },
}

impl FluxProxyRequest {
    pub fn generate(request: &FluxRequest) -> Self {
        Self::Generate {
            prompt: Some(request.prompt.clone()),
            seed: Some(request.seed),
            width: Some(request.width),
            height: Some(request.height),
            safety_tolerance: Some(request.safety_tolerance),
            steps: Some(request.steps),
            guidance: Some(request.guidance),
        }
    }

    /// Fill in defaults for a generate request; `None` if the prompt is missing
    pub fn into_flux_request(self) -> Option<FluxRequest> {
        match self {
            Self::Generate {
                prompt,
                seed,
                width,
                height,
                safety_tolerance,
                steps,
                guidance,
            } => {
                let prompt = prompt.filter(|p| !p.is_empty())?;
                let defaults = FluxRequest::new(prompt);
                Some(FluxRequest {
                    seed: seed.unwrap_or(defaults.seed),
                    width: width.unwrap_or(defaults.width),
                    height: height.unwrap_or(defaults.height),
                    safety_tolerance: safety_tolerance.unwrap_or(defaults.safety_tolerance),
                    steps: steps.unwrap_or(defaults.steps),
                    guidance: guidance.unwrap_or(defaults.guidance),
                    ..defaults
                })
            }
            Self::Poll { .. } => None,
        }
    }
}

/// Proxy-backed identification and image generation
pub struct ProxyClient {
    config: ProxyConfig,
    client: reqwest::Client,
}

impl ProxyClient {
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn post_flux(&self, body: &FluxProxyRequest, timeout: Duration) -> ServiceResult<Value> {
        let response = self
            .client
            .post(self.url("/api/black-forest-proxy"))
            .header("accept", "application/json")
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }
}

#[async_trait]
impl DishIdentifier for ProxyClient {
    async fn identify(
        &self,
        tap: ViewportPoint,
        blocks: &[ViewportTextBlock],
    ) -> ServiceResult<Option<DishIdentification>> {
        let request = GeminiProxyRequest {
            prompt: Some(build_identify_prompt(tap, blocks)),
        };
        let response = self
            .client
            .post(self.url("/api/gemini-proxy"))
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let answer: GeminiProxyResponse = read_json(response).await?;
        if let Some(error) = answer.error {
            return Err(ServiceError::InvalidResponse(error));
        }
        parse_identification(answer.text.as_deref().unwrap_or_default())
    }
}

#[async_trait]
impl ImageGenerator for ProxyClient {
    async fn start_generation(&self, prompt: &str) -> ServiceResult<PollHandle> {
        let body = FluxProxyRequest::generate(&FluxRequest::new(prompt));
        let response = self
            .post_flux(&body, Duration::from_secs(self.config.timeout_secs))
            .await?;
        polling_url(&response)
    }

    async fn poll(&self, handle: &PollHandle) -> ServiceResult<Value> {
        let body = FluxProxyRequest::Poll {
            poll_url: Some(handle.0.clone()),
        };
        let response = self
            .post_flux(&body, Duration::from_secs(self.config.poll_timeout_secs))
            .await?;
        debug!("proxied poll response: {}", response);
        Ok(response)
    }
}
