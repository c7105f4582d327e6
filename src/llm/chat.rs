use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::models::CandidateAnswer;

const SYSTEM_PROMPT: &str = "You are a helpful assistant that analyzes code repositories.";

/// A language model that answers a prompt with text.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Identifier reported alongside the model's answers.
    fn id(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Ask every model the same prompt concurrently.
///
/// Candidates come back in `models` order. A failed call becomes a
/// `Failed` candidate carrying the error message.
pub async fn collect_answers(models: &[Arc<dyn ChatModel>], prompt: &str) -> Vec<CandidateAnswer> {
    let calls = models.iter().map(|model| async move {
        match model.complete(prompt).await {
            Ok(text) => CandidateAnswer::answered(model.id(), text),
            Err(e) => {
                tracing::warn!("Model {} failed: {e:#}", model.id());
                CandidateAnswer::failed(model.id(), format!("{e:#}"))
            }
        }
    });
    join_all(calls).await
}

/// Chat completion via Ollama or an OpenAI-compatible API.
pub struct HttpChatModel {
    client: reqwest::Client,
    config: LlmConfig,
    model: String,
}

impl HttpChatModel {
    pub fn new(client: reqwest::Client, config: LlmConfig, model: impl Into<String>) -> Self {
        Self {
            client,
            config,
            model: model.into(),
        }
    }

    /// One client per configured answer model, sharing `client`.
    pub fn from_config(client: &reqwest::Client, config: &LlmConfig) -> Vec<Arc<dyn ChatModel>> {
        config
            .answer_models
            .iter()
            .map(|m| Arc::new(Self::new(client.clone(), config.clone(), m.clone())) as Arc<dyn ChatModel>)
            .collect()
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    fn id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let text = match self.config.provider.as_str() {
            "ollama" => call_ollama(&self.client, &self.config, &self.model, prompt).await?,
            "openai" => call_openai(&self.client, &self.config, &self.model, prompt).await?,
            other => anyhow::bail!("Unknown LLM provider: {other}"),
        };
        let text = text.trim();
        if text.is_empty() {
            anyhow::bail!("Empty response from {}", self.model);
        }
        Ok(text.to_string())
    }
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

fn messages(prompt: &str) -> Vec<Message> {
    vec![
        Message {
            role: "system".to_string(),
            content: SYSTEM_PROMPT.to_string(),
        },
        Message {
            role: "user".to_string(),
            content: prompt.to_string(),
        },
    ]
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Message,
}

async fn call_ollama(
    client: &reqwest::Client,
    config: &LlmConfig,
    model: &str,
    prompt: &str,
) -> Result<String> {
    let url = format!("{}/api/chat", config.base_url);

    let req = OllamaChatRequest {
        model: model.to_string(),
        messages: messages(prompt),
        stream: false,
    };

    let resp = client
        .post(&url)
        .json(&req)
        .send()
        .await
        .with_context(|| format!("Failed to call Ollama chat API for {model}"))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Ollama chat API returned {status}: {body}");
    }

    let body: OllamaChatResponse = resp
        .json()
        .await
        .context("Failed to parse Ollama chat response")?;
    Ok(body.message.content)
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

async fn call_openai(
    client: &reqwest::Client,
    config: &LlmConfig,
    model: &str,
    prompt: &str,
) -> Result<String> {
    let url = format!("{}/v1/chat/completions", config.base_url);
    let api_key = config.api_key.as_deref().unwrap_or_default();

    let req = OpenAiChatRequest {
        model: model.to_string(),
        messages: messages(prompt),
        temperature: 0.2,
    };

    let resp = client
        .post(&url)
        .header("Authorization", format!("Bearer {api_key}"))
        .json(&req)
        .send()
        .await
        .with_context(|| format!("Failed to call OpenAI chat API for {model}"))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("OpenAI chat API returned {status}: {body}");
    }

    let body: OpenAiChatResponse = resp
        .json()
        .await
        .context("Failed to parse OpenAI chat response")?;
    Ok(body
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default())
}
