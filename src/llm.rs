//! Chat model implementations.
//!
//! Concrete [`ChatModel`] backends:
//! - **[`DisabledChatModel`]**: returns errors; used when `[llm]` is not configured.
//! - **[`OpenAiChatModel`]**: `POST https://api.openai.com/v1/chat/completions`.
//! - **[`AzureChatModel`]**: Azure OpenAI deployment chat completions.
//! - **[`OllamaChatModel`]**: a local Ollama instance's `/api/chat` endpoint.
//!
//! Failures surface as [`RagError::ConversationModel`].

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use catalog_rag_core::llm::ChatModel;
use catalog_rag_core::models::{ChatMessage, Role};
use catalog_rag_core::RagError;

use crate::config::LlmConfig;
use crate::embedding::DEFAULT_AZURE_API_VERSION;
use crate::http;

/// Wire role names used by OpenAI-compatible APIs.
fn wire_role(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::Human => "user",
        Role::Assistant => "assistant",
    }
}

fn wire_messages(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| serde_json::json!({ "role": wire_role(m.role), "content": m.content }))
        .collect()
}

// ============ Disabled ============

pub struct DisabledChatModel;

#[async_trait]
impl ChatModel for DisabledChatModel {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, RagError> {
        Err(RagError::ConversationModel(
            "llm provider is disabled; set [llm] provider in config".to_string(),
        ))
    }
}

// ============ OpenAI ============

/// Chat model using the OpenAI API. Requires `OPENAI_API_KEY`.
pub struct OpenAiChatModel {
    model: String,
    api_key: String,
    temperature: Option<f32>,
    client: reqwest::Client,
    max_retries: u32,
}

impl OpenAiChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = required_model(config)?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            model,
            api_key,
            temperature: config.temperature,
            client: http::client(config.timeout_secs)?,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, RagError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": wire_messages(messages),
        });
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        let json = http::post_json_with_retry(
            || {
                self.client
                    .post("https://api.openai.com/v1/chat/completions")
                    .bearer_auth(&self.api_key)
            },
            &body,
            self.max_retries,
            "OpenAI chat API",
        )
        .await
        .map_err(|e| RagError::ConversationModel(e.to_string()))?;
        parse_choice_content(&json)
    }
}

// ============ Azure OpenAI ============

/// Chat model using an Azure OpenAI deployment. Requires `AZURE_OPENAI_API_KEY`.
pub struct AzureChatModel {
    deployment: String,
    endpoint: String,
    api_version: String,
    api_key: String,
    temperature: Option<f32>,
    client: reqwest::Client,
    max_retries: u32,
}

impl AzureChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let deployment = required_model(config)?;
        let endpoint = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.url required for Azure provider"))?;
        let api_key = std::env::var("AZURE_OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("AZURE_OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            deployment,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_version: config
                .api_version
                .clone()
                .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
            api_key,
            temperature: config.temperature,
            client: http::client(config.timeout_secs)?,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ChatModel for AzureChatModel {
    fn model_name(&self) -> &str {
        &self.deployment
    }
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, RagError> {
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, self.api_version
        );
        let mut body = serde_json::json!({ "messages": wire_messages(messages) });
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        let json = http::post_json_with_retry(
            || self.client.post(&url).header("api-key", &self.api_key),
            &body,
            self.max_retries,
            "Azure OpenAI chat API",
        )
        .await
        .map_err(|e| RagError::ConversationModel(e.to_string()))?;
        parse_choice_content(&json)
    }
}

// ============ Ollama ============

/// Chat model using a local Ollama instance (default `http://localhost:11434`).
pub struct OllamaChatModel {
    model: String,
    url: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OllamaChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = required_model(config)?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            client: http::client(config.timeout_secs)?,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ChatModel for OllamaChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, RagError> {
        let endpoint = format!("{}/api/chat", self.url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": wire_messages(messages),
            "stream": false,
        });
        let json = http::post_json_with_retry(
            || self.client.post(&endpoint),
            &body,
            self.max_retries,
            "Ollama chat API",
        )
        .await
        .map_err(|e| {
            RagError::ConversationModel(format!("{} (is Ollama running at {}?)", e, self.url))
        })?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                RagError::ConversationModel("invalid Ollama response: missing message".to_string())
            })
    }
}

fn required_model(config: &LlmConfig) -> Result<String> {
    config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("llm.model required for {} provider", config.provider))
}

/// Extract `choices[0].message.content` from an OpenAI-shaped response.
fn parse_choice_content(json: &serde_json::Value) -> Result<String, RagError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            RagError::ConversationModel("invalid response: missing choices[0].message".to_string())
        })
}

/// Create the configured [`ChatModel`].
pub fn create_chat_model(config: &LlmConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledChatModel)),
        "openai" => Ok(Arc::new(OpenAiChatModel::new(config)?)),
        "azure" => Ok(Arc::new(AzureChatModel::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChatModel::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}
