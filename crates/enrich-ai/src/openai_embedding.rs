use crate::llm_provider::{EmbeddingRequest, EmbeddingService};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use enrich_core::{CredentialProvider, EmbeddingConfig, EnrichError, RemoteCallResult, Result};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Rough characters-per-token ratio used to cap the input size.
const CHARS_PER_TOKEN: usize = 4;

/// OpenAI API request structure for embeddings
#[derive(Debug, Serialize)]
struct EmbeddingApiRequest<'a> {
    input: &'a str,
    model: &'a str,
    encoding_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// OpenAI API response structure for embeddings
#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: usize,
}

/// Error response from OpenAI API
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ErrorDetails,
}

#[derive(Debug, Deserialize)]
struct ErrorDetails {
    message: String,
    #[serde(rename = "type", default)]
    error_type: Option<String>,
}

/// Embedding client for OpenAI-compatible `/embeddings` endpoints
pub struct OpenAiEmbeddingClient {
    config: EmbeddingConfig,
    api_key: SecretString,
    client: Client,
}

impl OpenAiEmbeddingClient {
    pub fn new(config: EmbeddingConfig, credentials: &dyn CredentialProvider) -> Result<Self> {
        let api_key = credentials.api_key()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("enrich/0.1")
            .build()
            .map_err(|e| EnrichError::Transport(e.to_string()))?;

        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    /// Request body. A zero temperature is left to the endpoint's default.
    fn build_request<'a>(&'a self, request: &'a EmbeddingRequest) -> EmbeddingApiRequest<'a> {
        EmbeddingApiRequest {
            input: truncate_to_tokens(&request.input_text, request.max_tokens),
            model: &self.config.model,
            encoding_format: "float",
            temperature: (request.temperature > 0.0).then_some(request.temperature),
        }
    }

    /// Single request; every failure is reported as an error for classification.
    async fn try_embed(&self, request: &EmbeddingRequest) -> anyhow::Result<Vec<f32>> {
        let body = self.build_request(request);

        let response = self
            .client
            .post(format!("{}/embeddings", self.config.endpoint))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context(format!(
                "Failed to send request to embeddings endpoint at {}",
                self.config.endpoint
            ))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(describe_api_error(status, &error_text)));
        }

        let parsed: EmbeddingApiResponse = response
            .json()
            .await
            .context("Failed to parse embeddings response")?;

        if let Some(usage) = &parsed.usage {
            debug!(model = %self.config.model, tokens = usage.total_tokens, "Embedding call completed");
        }

        Ok(first_embedding(parsed))
    }
}

#[async_trait]
impl EmbeddingService for OpenAiEmbeddingClient {
    async fn embed(&self, request: &EmbeddingRequest) -> RemoteCallResult<Vec<f32>> {
        RemoteCallResult::classify(self.try_embed(request).await.map_err(|e| format!("{e:#}")))
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Lowest-index vector of the response, empty when there is none.
fn first_embedding(response: EmbeddingApiResponse) -> Vec<f32> {
    response
        .data
        .into_iter()
        .min_by_key(|item| item.index)
        .map(|item| item.embedding)
        .unwrap_or_default()
}

fn describe_api_error(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ApiError>(body) {
        Ok(api_error) => match api_error.error.error_type {
            Some(kind) => format!("API error ({}): {} ({})", status, api_error.error.message, kind),
            None => format!("API error ({}): {}", status, api_error.error.message),
        },
        Err(_) => format!("API error ({}): {}", status, body),
    }
}

/// Cut `text` to roughly `max_tokens` tokens on a char boundary.
fn truncate_to_tokens(text: &str, max_tokens: usize) -> &str {
    let limit = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
