use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{ChatModel, EmbeddingModel, ModelError};
use crate::config::ModelConfig;
use crate::types::ChatMessage;

const ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com";
const OPENAI_ENDPOINT: &str = "https://api.openai.com";

/// Normalize a history for the Anthropic API: system-role turns (wherever
/// retrieval placed them) move into the top-level system field in their
/// original order, consecutive same-role turns merge, and a history that
/// would open on an assistant turn folds that turn into the system text.
/// The API rejects all three shapes.
fn split_for_anthropic(history: &[ChatMessage]) -> (String, Vec<serde_json::Value>) {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut turns: Vec<(String, String)> = Vec::new();

    for message in history {
        if message.role == "system" {
            system_parts.push(&message.content);
        } else if let Some(last) = turns.last_mut() {
            if last.0 == message.role {
                last.1.push_str("\n\n");
                last.1.push_str(&message.content);
            } else {
                turns.push((message.role.clone(), message.content.clone()));
            }
        } else if message.role == "assistant" {
            system_parts.push("Your previous message in this conversation:");
            system_parts.push(&message.content);
        } else {
            turns.push((message.role.clone(), message.content.clone()));
        }
    }

    let messages = turns
        .into_iter()
        .map(|(role, content)| serde_json::json!({ "role": role, "content": content }))
        .collect();
    (system_parts.join("\n\n"), messages)
}

pub struct AnthropicChat {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

impl AnthropicChat {
    pub fn new(api_key: String, model: String, max_tokens: u32, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            endpoint: ANTHROPIC_ENDPOINT.to_string(),
            api_key,
            model,
            max_tokens,
            timeout,
        }
    }
}

#[async_trait]
impl ChatModel for AnthropicChat {
    async fn complete(&self, history: &[ChatMessage]) -> Result<String, ModelError> {
        let (system, messages) = split_for_anthropic(history);

        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = serde_json::json!(system);
        }

        debug!(model = %self.model, turns = history.len(), "requesting completion");

        let request = self
            .client
            .post(format!("{}/v1/messages", self.endpoint))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| ModelError::Timeout)??;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ModelError::Api { status, message });
        }

        let parsed: serde_json::Value =
            tokio::time::timeout(self.timeout, response.json())
                .await
                .map_err(|_| ModelError::Timeout)??;

        parsed
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            })
            .and_then(|b| b.get("text"))
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| ModelError::MalformedResponse("no text content block".into()))
    }
}

pub struct OpenAiChat {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

impl OpenAiChat {
    pub fn new(
        endpoint: Option<String>,
        api_key: Option<String>,
        model: String,
        max_tokens: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.unwrap_or_else(|| OPENAI_ENDPOINT.to_string()),
            api_key,
            model,
            max_tokens,
            timeout,
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, history: &[ChatMessage]) -> Result<String, ModelError> {
        let messages: Vec<serde_json::Value> =
            history.iter().map(|m| m.as_provider_message()).collect();

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
        });

        debug!(model = %self.model, turns = history.len(), "requesting completion");

        let mut request = self
            .client
            .post(format!("{}/v1/chat/completions", self.endpoint))
            .header("content-type", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = tokio::time::timeout(self.timeout, request.json(&body).send())
            .await
            .map_err(|_| ModelError::Timeout)??;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ModelError::Api { status, message });
        }

        let parsed: serde_json::Value =
            tokio::time::timeout(self.timeout, response.json())
                .await
                .map_err(|_| ModelError::Timeout)??;

        parsed
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| ModelError::MalformedResponse("no message content".into()))
    }
}

/// OpenAI-compatible embeddings endpoint. Also covers local inference
/// servers via the endpoint override, in which case the key is optional.
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
}

impl OpenAiEmbedder {
    pub fn new(
        endpoint: Option<String>,
        api_key: Option<String>,
        model: String,
        timeout: Duration,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.unwrap_or_else(|| OPENAI_ENDPOINT.to_string()),
            api_key,
            model,
            timeout,
        }
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, label: &str, text: &str) -> Result<Vec<f32>, ModelError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": format!("{label}\n{text}"),
        });

        let mut request = self
            .client
            .post(format!("{}/v1/embeddings", self.endpoint))
            .header("content-type", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = tokio::time::timeout(self.timeout, request.json(&body).send())
            .await
            .map_err(|_| ModelError::Timeout)??;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ModelError::Api { status, message });
        }

        let parsed: serde_json::Value =
            tokio::time::timeout(self.timeout, response.json())
                .await
                .map_err(|_| ModelError::Timeout)??;

        let values = parsed
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|d| d.first())
            .and_then(|d| d.get("embedding"))
            .and_then(|e| e.as_array())
            .ok_or_else(|| ModelError::MalformedResponse("no embedding data".into()))?;

        values
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| ModelError::MalformedResponse("non-numeric embedding".into()))
            })
            .collect()
    }
}

/// Build the chat and embedding providers from config.
pub fn from_config(
    config: &ModelConfig,
) -> anyhow::Result<(Box<dyn ChatModel>, Box<dyn EmbeddingModel>)> {
    let timeout = Duration::from_secs(config.timeout_secs);

    let chat: Box<dyn ChatModel> = match config.provider.as_str() {
        "anthropic" => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                anyhow::anyhow!("no API key for provider 'anthropic'. Set ANTHROPIC_API_KEY.")
            })?;
            Box::new(AnthropicChat::new(
                api_key,
                config.chat_model.clone(),
                config.max_tokens,
                timeout,
            ))
        }
        "openai" => Box::new(OpenAiChat::new(
            config.endpoint.clone(),
            config.api_key.clone(),
            config.chat_model.clone(),
            config.max_tokens,
            timeout,
        )),
        other => anyhow::bail!("unknown provider: {other}"),
    };

    let embedder = Box::new(OpenAiEmbedder::new(
        config.embed_endpoint.clone().or(config.endpoint.clone()),
        config.embed_api_key.clone().or(config.api_key.clone()),
        config.embed_model.clone(),
        timeout,
    ));

    Ok((chat, embedder))
}
