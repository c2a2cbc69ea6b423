//! Chat completion capability
//!
//! Generation tasks talk to a [`CompletionProvider`]. [`OpenAiChat`] works with
//! any OpenAI-compatible chat completions endpoint (OpenAI, Ollama, vLLM, ...).

use crate::config::LlmConfig;
use crate::error::{Result, VedyutError};
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ResponseFormat,
};
use async_openai::Client;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a chat conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call sampling options; unset fields fall back to the provider defaults
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionOptions {
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
            max_tokens: None,
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Incremental completion text; an error item ends the reply
pub type CompletionStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<String>;

    /// Stream the reply as it is generated.
    ///
    /// Providers without streaming support yield the whole reply as one item.
    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<CompletionStream> {
        let reply = self.complete(messages, options).await?;
        Ok(stream::once(async move { Ok(reply) }).boxed())
    }

    /// Complete and parse the reply as JSON.
    ///
    /// Fails with [`VedyutError::ResponseShape`] when the reply is not JSON.
    async fn complete_json(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<serde_json::Value> {
        let raw = self.complete(messages, options).await?;
        parse_json_reply(&raw)
    }

    fn model_id(&self) -> &str;
}

/// Parse a JSON reply, tolerating a surrounding markdown code fence
pub fn parse_json_reply(raw: &str) -> Result<serde_json::Value> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str(body).map_err(|e| {
        VedyutError::ResponseShape(format!("Reply is not valid JSON ({}): {}", e, preview(raw)))
    })
}

fn preview(raw: &str) -> String {
    let head: String = raw.chars().take(80).collect();
    if head.len() < raw.len() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Chat completions over async-openai
pub struct OpenAiChat {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let mut openai_config = OpenAIConfig::new();
        if let Some(key) = &config.api_key {
            openai_config = openai_config.with_api_key(key);
        }
        if let Some(base_url) = &config.base_url {
            openai_config = openai_config.with_api_base(base_url);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VedyutError::Config(format!("Failed to build HTTP client: {}", e)))?;

        log::info!("Using chat model: {}", config.model);

        Ok(Self {
            client: Client::with_config(openai_config).with_http_client(http),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn request(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
        json_mode: bool,
    ) -> Result<CreateChatCompletionRequest> {
        let request_messages = messages
            .iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>>>()?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model)
            .messages(request_messages)
            .temperature(options.temperature.unwrap_or(self.temperature));
        if let Some(max_tokens) = options.max_tokens.or(self.max_tokens) {
            args.max_tokens(u16::try_from(max_tokens).unwrap_or(u16::MAX));
        }
        if json_mode {
            args.response_format(ResponseFormat::JsonObject);
        }
        args.build().map_err(completion_error)
    }

    async fn create(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
        json_mode: bool,
    ) -> Result<String> {
        let request = self.request(messages, options, json_mode)?;
        let response = self.client.chat().create(request).await.map_err(completion_error)?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                log::error!("No content in chat response from {}", self.model);
                VedyutError::Completion("No content in response".to_string())
            })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiChat {
    async fn complete(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<String> {
        self.create(messages, options, false).await
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<CompletionStream> {
        let request = self.request(messages, options, false)?;
        let deltas = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(completion_error)?;

        Ok(deltas
            .filter_map(|chunk| async move {
                match chunk {
                    Ok(response) => response
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|choice| choice.delta.content)
                        .filter(|text| !text.is_empty())
                        .map(Ok),
                    Err(e) => Some(Err(completion_error(e))),
                }
            })
            .boxed())
    }

    async fn complete_json(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<serde_json::Value> {
        let raw = self.create(messages, options, true).await?;
        parse_json_reply(&raw)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

fn to_request_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage> {
    let content = message.content.clone();
    let built: ChatCompletionRequestMessage = match message.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(content)
            .build()
            .map_err(completion_error)?
            .into(),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()
            .map_err(completion_error)?
            .into(),
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(content)
            .build()
            .map_err(completion_error)?
            .into(),
    };
    Ok(built)
}

fn completion_error(e: OpenAIError) -> VedyutError {
    VedyutError::Completion(e.to_string())
}
