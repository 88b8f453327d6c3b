//! Single-turn chat completion against OpenAI-compatible endpoints.
//!
//! The shell pipeline only ever needs "system prompt + one user message in,
//! one text completion out", so the backend seam is a one-method trait that
//! tests replace with deterministic stubs.

use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::{ApiError, OpenAIError};
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use tracing::debug;

use crate::config::AppConfig;
use crate::error::BotError;
use crate::provider::{ProviderChain, RequestError, ResolvedProvider};

/// A chat model that answers one system+user exchange with plain text.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, BotError>;
}

/// [`ChatBackend`] over a [`ProviderChain`] of OpenAI-compatible servers
/// (Ollama locally, any hosted endpoint in the cloud).
pub struct OpenAiChat {
    chain: ProviderChain,
}

impl OpenAiChat {
    pub fn new(chain: ProviderChain) -> Self {
        Self { chain }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, BotError> {
        Ok(Self::new(ProviderChain::from_config(config)?))
    }

    pub fn chain(&self) -> &ProviderChain {
        &self.chain
    }
}

/// Substrings of an error body's type, code or message that mean the server
/// side failed (5xx, overload, rate limit) rather than the request.
const SERVER_SIDE_HINTS: &[&str] = &[
    "server_error",
    "server error",
    "internal",
    "overloaded",
    "unavailable",
    "timeout",
    "rate_limit",
    "bad gateway",
];

fn classify(err: OpenAIError) -> RequestError {
    match err {
        OpenAIError::Reqwest(e) => RequestError::Transient(e.to_string()),
        OpenAIError::JSONDeserialize(e) => RequestError::Transient(e.to_string()),
        OpenAIError::StreamError(e) => RequestError::Transient(e),
        OpenAIError::ApiError(e) if is_server_side(&e) => RequestError::Transient(e.to_string()),
        other => RequestError::Permanent(other.to_string()),
    }
}

/// Error bodies carry no HTTP status, so 5xx replies are recognised by what
/// they say about themselves.
fn is_server_side(err: &ApiError) -> bool {
    let status_code = err.code.as_deref().is_some_and(|code| {
        code.len() == 3 && code.starts_with('5') && code.chars().all(|c| c.is_ascii_digit())
    });
    let fields = [
        err.r#type.as_deref(),
        err.code.as_deref(),
        Some(err.message.as_str()),
    ];
    status_code
        || fields
            .into_iter()
            .flatten()
            .map(str::to_lowercase)
            .any(|field| SERVER_SIDE_HINTS.iter().any(|hint| field.contains(hint)))
}

async fn complete_once(
    provider: ResolvedProvider,
    system: String,
    user: String,
) -> Result<String, RequestError> {
    let openai_config = OpenAIConfig::new()
        .with_api_base(&provider.api_base)
        .with_api_key(
            provider
                .api_key
                .clone()
                .unwrap_or_else(|| "not-needed".to_string()),
        );
    let client = Client::with_config(openai_config);

    let system_msg = ChatCompletionRequestSystemMessageArgs::default()
        .content(system)
        .build()
        .map_err(|e| RequestError::Permanent(e.to_string()))?;
    let user_msg = ChatCompletionRequestUserMessageArgs::default()
        .content(user)
        .build()
        .map_err(|e| RequestError::Permanent(e.to_string()))?;

    let request = CreateChatCompletionRequestArgs::default()
        .model(&provider.model)
        .messages(vec![
            ChatCompletionRequestMessage::System(system_msg),
            ChatCompletionRequestMessage::User(user_msg),
        ])
        .temperature(provider.temperature)
        .max_completion_tokens(provider.max_tokens)
        .build()
        .map_err(|e| RequestError::Permanent(e.to_string()))?;

    let response = tokio::time::timeout(
        Duration::from_secs(provider.timeout_secs),
        client.chat().create(request),
    )
    .await
    .map_err(|_| {
        RequestError::Transient(format!(
            "no completion within {} seconds",
            provider.timeout_secs
        ))
    })?
    .map_err(classify)?;

    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default();
    Ok(content)
}

#[async_trait]
impl ChatBackend for OpenAiChat {
    async fn complete(&self, system: &str, user: &str) -> Result<String, BotError> {
        debug!("Chat completion request: {}", user);
        let content = self
            .chain
            .request_with_failover(|provider| {
                complete_once(provider, system.to_string(), user.to_string())
            })
            .await?;
        debug!("Chat completion response: {}", content);
        Ok(content)
    }
}

/// Produces the short TLDR appended to non-shell tool output.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, tool_name: &str, output: &str) -> Result<String, BotError>;
}

const SUMMARIZER_SYSTEM_PROMPT: &str =
    "You condense tool output for a chat user. Be factual and brief.";

/// [`Summarizer`] backed by any [`ChatBackend`].
pub struct LlmSummarizer {
    backend: Arc<dyn ChatBackend>,
}

impl LlmSummarizer {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, tool_name: &str, output: &str) -> Result<String, BotError> {
        let prompt = format!(
            "Tool {} returned the following data:\n{}\n\n\
             Summarize the key points in no more than three sentences.",
            tool_name, output
        );
        let summary = self
            .backend
            .complete(SUMMARIZER_SYSTEM_PROMPT, &prompt)
            .await?;
        let summary = summary.trim();
        if summary.is_empty() {
            Ok("No summary available".to_string())
        } else {
            Ok(summary.to_string())
        }
    }
}
