//! Chat completions against Groq's OpenAI-compatible API.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use groqbot_types::config::GroqConfig;
use groqbot_types::history::PromptMessage;

use crate::assembler::Prompt;
use crate::error::UpstreamError;

// ─── Request types ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    temperature: f32,
    max_tokens: u32,
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: i64,
    completion_tokens: i64,
}

// ─── Client ───────────────────────────────────────────────────────────────────

#[async_trait]
pub trait Inference: Send + Sync {
    /// Run one completion and return the raw assistant text.
    async fn complete(&self, prompt: &Prompt) -> Result<String, UpstreamError>;
}

/// Shared HTTP client for completions and transcriptions.
#[derive(Clone)]
pub struct GroqClient {
    pub(crate) client: reqwest::Client,
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) transcription_model: String,
    pub(crate) transcription_language: Option<String>,
}

impl GroqClient {
    pub fn new(config: &GroqConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build Groq HTTP client")?;
        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            transcription_model: config.transcription_model.clone(),
            transcription_language: config.transcription_language.clone(),
        })
    }
}

#[async_trait]
impl Inference for GroqClient {
    async fn complete(&self, prompt: &Prompt) -> Result<String, UpstreamError> {
        let request = CompletionRequest {
            model: &prompt.model,
            messages: &prompt.messages,
            temperature: prompt.temperature,
            max_tokens: prompt.max_tokens,
        };

        debug!(
            model = %prompt.model,
            messages = prompt.messages.len(),
            "Sending completion request"
        );

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_failure(status.as_u16(), body));
        }

        let body: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| UpstreamError::Transport(format!("malformed completion response: {e}")))?;

        if let Some(usage) = &body.usage {
            info!(
                model = %prompt.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Completion finished"
            );
        }

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(UpstreamError::EmptyResponse)
    }
}

/// Map a non-success response to the error kinds the gateway reacts to.
pub(crate) fn classify_failure(status: u16, body: String) -> UpstreamError {
    let lower = body.to_lowercase();
    if lower.contains("decommissioned") {
        UpstreamError::ModelDecommissioned(body)
    } else if status == 429 || lower.contains("rate limit") || lower.contains("quota") {
        UpstreamError::RateLimited(body)
    } else {
        UpstreamError::Http { status, body }
    }
}

/// Remove `<think>…</think>` reasoning blocks some models emit before the
/// answer. An unterminated block swallows the rest of the text.
pub fn strip_think(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Text that is safe to show: no reasoning blocks, trimmed, never empty.
pub fn clean_reply(raw: &str) -> Option<String> {
    let cleaned = strip_think(raw).trim().to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}
