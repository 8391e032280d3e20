//! Provider-agnostic chat client.
//!
//! One [`ChatClient`] per configured provider; the evaluator holds the
//! client and never inspects which vendor is behind it. Each variant maps
//! the same `(system, user, max_tokens, temperature)` call onto the vendor's
//! wire shape and extracts `(text, input_tokens, output_tokens)` back out.
//!
//! # Supported Providers
//!
//! | Variant | API shape | Auth |
//! |---------|-----------|------|
//! | `OpenAi` | `/chat/completions` | `Authorization: Bearer` |
//! | `Anthropic` | `/v1/messages` | `x-api-key` |
//! | `Ollama` | `/api/chat` | none (local) |
//! | `Compatible` | `/chat/completions` at a custom base URL | `Authorization: Bearer` |

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use crate::error::{AiGateError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// PROVIDER KIND
// ═══════════════════════════════════════════════════════════════════════════════

/// Which LLM vendor to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// OpenAI chat completions API.
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
    /// Local Ollama server.
    Ollama,
    /// Any OpenAI-compatible endpoint (requires a base URL).
    Compatible,
}

impl ProviderKind {
    /// Parse the configuration string form.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown provider names.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            "compatible" | "openai-compatible" => Ok(Self::Compatible),
            other => Err(AiGateError::NotConfigured(format!(
                "unknown provider: {other}"
            ))),
        }
    }

    /// Default base URL for this provider.
    #[must_use]
    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi | Self::Compatible => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Ollama => "http://127.0.0.1:11434",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHAT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Completion returned by any provider.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// The model's completion text.
    pub text: String,

    /// Prompt tokens billed.
    pub input_tokens: u32,

    /// Completion tokens billed.
    pub output_tokens: u32,
}

impl ChatResponse {
    /// Total tokens billed for the call.
    #[must_use]
    pub const fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHAT CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

/// A connected chat client for one provider.
#[derive(Debug, Clone)]
pub struct ChatClient {
    kind: ProviderKind,
    model: String,
    api_key: Option<String>,
    base_url: String,
    http: reqwest::Client,
}

impl ChatClient {
    /// Create a chat client.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be built or a
    /// `Compatible` provider has no base URL.
    pub fn new(
        kind: ProviderKind,
        model: impl Into<String>,
        api_key: Option<String>,
        base_url: Option<String>,
    ) -> Result<Self> {
        if kind == ProviderKind::Compatible && base_url.is_none() {
            return Err(AiGateError::NotConfigured(
                "compatible provider requires a base URL".into(),
            ));
        }

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AiGateError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            kind,
            model: model.into(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| kind.default_base_url().to_string())
                .trim_end_matches('/')
                .to_string(),
            http,
        })
    }

    /// Model identifier this client calls.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one chat exchange and return the completion.
    ///
    /// The call is aborted at `timeout`; an abort surfaces as
    /// [`AiGateError::Timeout`] (which the evaluator converts to fail-open).
    ///
    /// # Errors
    ///
    /// Returns an error on timeout, transport failure, non-success status,
    /// or an unparseable body.
    #[instrument(skip(self, system, user), fields(model = %self.model))]
    pub async fn chat(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f64,
        timeout: Duration,
    ) -> Result<ChatResponse> {
        let call = self.dispatch(system, user, max_tokens, temperature);

        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AiGateError::Timeout(timeout)),
        }
    }

    async fn dispatch(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<ChatResponse> {
        match self.kind {
            ProviderKind::OpenAi | ProviderKind::Compatible => {
                self.chat_openai(system, user, max_tokens, temperature).await
            }
            ProviderKind::Anthropic => {
                self.chat_anthropic(system, user, max_tokens, temperature)
                    .await
            }
            ProviderKind::Ollama => self.chat_ollama(system, user, max_tokens, temperature).await,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // OpenAI-shaped endpoints
    // ─────────────────────────────────────────────────────────────────────────

    async fn chat_openai(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<ChatResponse> {
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct Message {
            content: String,
        }
        #[derive(Deserialize, Default)]
        struct Usage {
            #[serde(default)]
            prompt_tokens: u32,
            #[serde(default)]
            completion_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Body {
            choices: Vec<Choice>,
            #[serde(default)]
            usage: Option<Usage>,
        }

        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.http.post(&url).json(&json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "max_tokens": max_tokens,
            "temperature": temperature,
        }));

        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let body: Body = Self::read_json(request.send().await?).await?;
        let text = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AiGateError::MalformedResponse("empty choices".into()))?;

        let usage = body.usage.unwrap_or_default();
        debug!(
            input = usage.prompt_tokens,
            output = usage.completion_tokens,
            "Chat completion received"
        );

        Ok(ChatResponse {
            text,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Anthropic messages
    // ─────────────────────────────────────────────────────────────────────────

    async fn chat_anthropic(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<ChatResponse> {
        #[derive(Deserialize)]
        struct Content {
            #[serde(default)]
            text: String,
        }
        #[derive(Deserialize, Default)]
        struct Usage {
            #[serde(default)]
            input_tokens: u32,
            #[serde(default)]
            output_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Body {
            content: Vec<Content>,
            #[serde(default)]
            usage: Option<Usage>,
        }

        let url = format!("{}/v1/messages", self.base_url);
        let mut request = self
            .http
            .post(&url)
            .header("anthropic-version", "2023-06-01")
            .json(&json!({
                "model": self.model,
                "max_tokens": max_tokens,
                "temperature": temperature,
                "system": system,
                "messages": [{ "role": "user", "content": user }],
            }));

        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let body: Body = Self::read_json(request.send().await?).await?;
        let text = body
            .content
            .into_iter()
            .next()
            .map(|c| c.text)
            .ok_or_else(|| AiGateError::MalformedResponse("empty content".into()))?;

        let usage = body.usage.unwrap_or_default();
        Ok(ChatResponse {
            text,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ollama chat
    // ─────────────────────────────────────────────────────────────────────────

    async fn chat_ollama(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<ChatResponse> {
        #[derive(Deserialize)]
        struct Message {
            content: String,
        }
        #[derive(Deserialize)]
        struct Body {
            message: Message,
            #[serde(default)]
            prompt_eval_count: u32,
            #[serde(default)]
            eval_count: u32,
        }

        let url = format!("{}/api/chat", self.base_url);
        let request = self.http.post(&url).json(&json!({
            "model": self.model,
            "stream": false,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "options": {
                "temperature": temperature,
                "num_predict": max_tokens,
            },
        }));

        let body: Body = Self::read_json(request.send().await?).await?;
        Ok(ChatResponse {
            text: body.message.content,
            input_tokens: body.prompt_eval_count,
            output_tokens: body.eval_count,
        })
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body: String = response.text().await.unwrap_or_default();
            let truncated: String = body.chars().take(300).collect();
            return Err(AiGateError::Status {
                status: status.as_u16(),
                body: truncated,
            });
        }

        response
            .json()
            .await
            .map_err(|e| AiGateError::MalformedResponse(e.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
