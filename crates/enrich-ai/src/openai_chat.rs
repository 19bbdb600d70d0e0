use crate::llm_provider::{ChatService, Message};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use enrich_core::{ChatConfig, CredentialProvider, EnrichError, RemoteCallResult, Result};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: String,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: usize,
}

/// Chat client for OpenAI-compatible `/chat/completions` endpoints
pub struct OpenAiChatClient {
    config: ChatConfig,
    api_key: SecretString,
    client: Client,
}

impl OpenAiChatClient {
    pub fn new(config: ChatConfig, credentials: &dyn CredentialProvider) -> Result<Self> {
        let api_key = credentials.api_key()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EnrichError::Transport(e.to_string()))?;

        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    fn build_request<'a>(&'a self, messages: &'a [Message]) -> ChatCompletionsRequest<'a> {
        ChatCompletionsRequest {
            model: &self.config.model,
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.to_string(),
                    content: &m.content,
                })
                .collect(),
            temperature: self.config.temperature,
        }
    }

    async fn try_complete(&self, messages: &[Message]) -> anyhow::Result<String> {
        let request = self.build_request(messages);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.endpoint))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .context(format!(
                "Failed to send request to Chat Completions API at {}",
                self.config.endpoint
            ))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!("Chat API error ({}): {}", status, error_text));
        }

        let chat_response: ChatCompletionsResponse = response
            .json()
            .await
            .context("Failed to parse Chat Completions API response")?;

        if let Some(usage) = &chat_response.usage {
            debug!(model = %self.config.model, tokens = usage.total_tokens, "Chat call completed");
        }

        response_text(chat_response)
    }
}

#[async_trait]
impl ChatService for OpenAiChatClient {
    async fn complete(&self, messages: &[Message]) -> RemoteCallResult<String> {
        RemoteCallResult::classify(self.try_complete(messages).await.map_err(|e| format!("{e:#}")))
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Content of the first choice. A `null` content or a response without
/// choices reads as blank.
fn response_text(response: ChatCompletionsResponse) -> anyhow::Result<String> {
    let Some(choice) = response.choices.into_iter().next() else {
        debug!("Chat response has no choices");
        return Ok(String::new());
    };
    if let Some(reason) = &choice.finish_reason {
        debug!(finish_reason = %reason, "Chat choice received");
    }
    Ok(choice.message.content.unwrap_or_default())
}
