//! The LLM collaborator: a text-in/text-out endpoint the core edit engine
//! treats as opaque. `LlmClient` is the contract; `DeepSeekClient` is a
//! concrete `reqwest`-backed implementation talking to a
//! chat-completions-shaped API over blocking HTTP.

use anyhow::{Context, Result, anyhow};
use codingbuddy_core::{CancellationToken, ChatMessage, LlmConfig, TokenUsage};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// Options for a single `generate` call.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            model: "deepseek-chat".to_string(),
            temperature: None,
            max_tokens: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Result of a completed `generate` call.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub text: String,
    pub usage: TokenUsage,
}

/// The LLM collaborator contract. No streaming requirement; cancellation is
/// checked by the caller before issuing the call — a client implementation
/// only needs to honour `opts.timeout`.
pub trait LlmClient: Send + Sync {
    fn generate(
        &self,
        messages: &[ChatMessage],
        opts: &GenerateOptions,
    ) -> Result<GenerateResponse>;
}

/// `reqwest`-backed client for a DeepSeek-compatible chat-completions API.
pub struct DeepSeekClient {
    base_url: String,
    api_key: String,
    http: reqwest::blocking::Client,
}

impl DeepSeekClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("missing API key in env var {}", config.api_key_env))?;
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: config.base_url.clone(),
            api_key,
            http,
        })
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn role_str(message: &ChatMessage) -> &'static str {
    match message {
        ChatMessage::System { .. } => "system",
        ChatMessage::User { .. } => "user",
        ChatMessage::Assistant { .. } => "assistant",
    }
}

impl LlmClient for DeepSeekClient {
    fn generate(
        &self,
        messages: &[ChatMessage],
        opts: &GenerateOptions,
    ) -> Result<GenerateResponse> {
        let wire_messages: Vec<WireMessage> = messages
            .iter()
            .map(|m| WireMessage {
                role: role_str(m),
                content: m.content(),
            })
            .collect();

        let mut body = json!({
            "model": opts.model,
            "messages": wire_messages,
        });
        if let Some(temp) = opts.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(max_tokens) = opts.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(opts.timeout)
            .json(&body)
            .send()
            .context("LLM request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().unwrap_or_default();
            return Err(anyhow!("LLM request returned {status}: {text}"));
        }

        let parsed: ChatCompletionResponse =
            response.json().context("failed to decode LLM response")?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("LLM response had no message content"))?;
        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(GenerateResponse { text, usage })
    }
}

/// Checks `token` before issuing an LLM call, returning a `Cancelled`-flavoured
/// error without touching the network — the cooperative-cancellation
/// checkpoint observed before each LLM call.
pub fn guard_cancellation(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        return Err(anyhow!("cancelled"));
    }
    Ok(())
}
