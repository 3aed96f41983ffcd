//! Chat completions over an OpenAI-compatible `/chat/completions` endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use paper_chat_core::models::{Message, Role};
use tracing::debug;

use crate::config::{ClientConfig, RagOptions};
use crate::error::{RagError, Result};
use crate::http;

/// Consumes a message list and returns the completion text.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn invoke(&self, messages: &[Message]) -> Result<String>;
}

/// Role name on the wire.
pub fn wire_role(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::Human => "user",
        Role::Ai => "assistant",
    }
}

/// [`ChatModel`] for any server speaking the OpenAI chat API.
pub struct OpenAiChatClient {
    http: reqwest::Client,
    config: ClientConfig,
    url: String,
    max_retries: u32,
}

impl OpenAiChatClient {
    pub fn new(config: &ClientConfig, options: &RagOptions) -> Result<Self> {
        Ok(Self {
            http: http::build_client(Duration::from_secs(options.chat_timeout_secs))?,
            url: config.endpoint("chat/completions"),
            config: config.clone(),
            max_retries: options.max_retries,
        })
    }

    /// Shared-pointer constructor for use as a registry factory.
    pub fn shared(config: &ClientConfig, options: &RagOptions) -> Result<Arc<dyn ChatModel>> {
        Ok(Arc::new(Self::new(config, options)?))
    }

    fn request_body(&self, messages: &[Message]) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": wire_role(m.role),
                    "content": m.content,
                })
            })
            .collect();
        serde_json::json!({
            "model": self.config.model_name,
            "messages": messages,
            "temperature": self.config.temperature.unwrap_or(0.0),
            "stream": false,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatClient {
    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    async fn invoke(&self, messages: &[Message]) -> Result<String> {
        let body = self.request_body(messages);
        let json = http::post_json(
            &self.http,
            &self.url,
            self.config.bearer_token(),
            &body,
            self.max_retries,
        )
        .await?;
        let content = parse_completion(&json)?;
        debug!(model = %self.config.model_name, chars = content.len(), "Chat completion received");
        Ok(content)
    }
}

/// Pull `choices[0].message.content` out of a completion response.
fn parse_completion(json: &serde_json::Value) -> Result<String> {
    let choices = json
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| RagError::upstream(None, "invalid chat response: missing choices array"))?;

    let content = choices
        .first()
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str());

    match content {
        Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
        _ => Err(RagError::EmptyCompletion),
    }
}
