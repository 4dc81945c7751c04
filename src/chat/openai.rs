use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use super::{build_conversation, ChatCompletion, ChatError, ChatMessage, EMPTY_REPLY_FALLBACK};
use crate::config::ChatConfig;

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Chat completions over the OpenAI-compatible HTTP API
pub struct OpenAiChat {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiChat {
    pub fn from_config(config: &ChatConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY is not set"))?;

        let client = Client::builder()
            .user_agent("mopsagent-chat/0.1.0")
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client for chat completions")?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/chat/completions",
                config.api_base_url.trim_end_matches('/')
            ),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    async fn request(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
        let body = CompletionRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response: CompletionResponse = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to reach chat completion API")?
            .error_for_status()
            .context("chat completion API returned an error status")?
            .json()
            .await
            .context("failed to parse chat completion response")?;

        let reply = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .filter(|content| !content.is_empty());

        Ok(reply.unwrap_or_else(|| {
            debug!("chat completion returned no content, using fallback reply");
            EMPTY_REPLY_FALLBACK.to_string()
        }))
    }
}

#[async_trait]
impl ChatCompletion for OpenAiChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
        let conversation = build_conversation(messages)?;

        self.request(&conversation).await.map_err(|e| {
            error!(error = ?e, "chat completion failed");
            ChatError::Unavailable(e)
        })
    }
}
