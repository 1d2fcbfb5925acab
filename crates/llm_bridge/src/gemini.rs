//! Gemini 2.5 Flash text generation
//!
//! Used to group OCR fragments around a tap into one dish.

use anyhow::{Context, Result};
use async_trait::async_trait;
use menupic_core::collaborators::DishIdentifier;
use menupic_core::error::{ServiceError, ServiceResult};
use menupic_core::types::{DishIdentification, ViewportPoint, ViewportTextBlock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::http::{read_json, transport_error};
use crate::prompt::{build_identify_prompt, parse_identification};

/// Configuration for Gemini API client
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// API key for Google Gemini
    pub api_key: String,
    /// Model to use (default: gemini-2.5-flash)
    pub model: String,
    /// Timeout in seconds
    pub timeout_secs: u64,
}

impl GeminiConfig {
    /// Create config from environment variable
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .context("GEMINI_API_KEY environment variable not set")?;

        Ok(Self::with_key(api_key))
    }

    pub fn with_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "gemini-2.5-flash".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Gemini API client
pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { config, client })
    }

    /// Create client from environment variables
    pub fn from_env() -> Result<Self> {
        let config = GeminiConfig::from_env()?;
        Self::new(config)
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send a single text prompt and return the concatenated text answer
    pub async fn generate_text(&self, prompt: &str) -> ServiceResult<String> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
        };

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.config.model
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let gemini_response: GeminiResponse = read_json(response).await?;
        gemini_response.text().ok_or_else(|| {
            ServiceError::InvalidResponse("No text in Gemini response".to_string())
        })
    }
}

#[async_trait]
impl DishIdentifier for GeminiClient {
    async fn identify(
        &self,
        tap: ViewportPoint,
        blocks: &[ViewportTextBlock],
    ) -> ServiceResult<Option<DishIdentification>> {
        info!("identifying dish at ({:.0}, {:.0}) with {}", tap.x, tap.y, self.config.model);
        let text = self.generate_text(&build_identify_prompt(tap, blocks)).await?;
        debug!("Gemini answered: {}", text);
        parse_identification(&text)
    }
}

/// Gemini API request structure
#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

/// Gemini API response structure
#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

impl GeminiResponse {
    fn text(&self) -> Option<String> {
        let candidate = self.candidates.first()?;
        let text: String = candidate
            .content
            .parts
            .iter()
            .map(|part| part.text.as_str())
            .collect();
        (!text.is_empty()).then_some(text)
    }
}
