//! LLM Client Abstraction (spec.md §4.4): a provider-agnostic async trait
//! plus a `reqwest`-backed HTTP implementation with transport-level retry.
//!
//! Grounded on the teacher's `dashflow-factories::llm` provider-selection
//! pattern (environment-variable driven, provider-agnostic `ChatModel`
//! trait) and `dashflow-evals::quality_judge`'s use of a chat-completion
//! client as an injected dependency rather than a concrete provider type.
//! Transport retry here is independent of and nested inside the
//! quality-driven retry loop in `crate::retry`: a single quality "attempt"
//! may itself retry a flaky HTTP call a few times before giving up.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Error, Result};

/// A single request to an LLM chat-completion endpoint.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// The raw text response and bookkeeping metadata from a completed call.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub model: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

/// Provider-agnostic chat-completion client. Implementors own their own
/// transport-level retry/backoff; callers treat a returned `Err` as a
/// genuine provider failure for the purposes of the quality retry loop.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse>;
}

/// Environment variable consulted for provider selection, mirroring the
/// teacher's env-var-driven provider detection.
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";

/// Which upstream provider `HttpLlmClient` is configured to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
}

/// Detect an available provider from environment variables, preferring
/// OpenAI then Anthropic — matches the teacher's OpenAI-before-Anthropic
/// priority for non-local providers.
pub fn detect_provider() -> Result<Provider> {
    if std::env::var(OPENAI_API_KEY).is_ok() {
        return Ok(Provider::OpenAi);
    }
    if std::env::var(ANTHROPIC_API_KEY).is_ok() {
        return Ok(Provider::Anthropic);
    }
    Err(Error::config(format!(
        "no LLM provider available; set {OPENAI_API_KEY} or {ANTHROPIC_API_KEY}"
    )))
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OpenAiCompletion {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct AnthropicCompletion {
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

/// `reqwest`-backed client for OpenAI or Anthropic chat-completion
/// endpoints, with bounded exponential-backoff retry on transport and
/// 5xx failures (never on 4xx — those are fatal provider/configuration
/// errors, not flakiness).
pub struct HttpLlmClient {
    http: reqwest::Client,
    provider: Provider,
    api_key: String,
    model: String,
    base_url: String,
    max_transport_retries: u32,
}

impl HttpLlmClient {
    /// Build a client for `provider` using `model`, reading the API key
    /// from the environment. `base_url` overrides the default endpoint
    /// (used in tests against a local mock server).
    pub fn new(provider: Provider, model: impl Into<String>, base_url: Option<String>) -> Result<Self> {
        let env_key = match provider {
            Provider::OpenAi => OPENAI_API_KEY,
            Provider::Anthropic => ANTHROPIC_API_KEY,
        };
        let api_key = std::env::var(env_key)
            .map_err(|_| Error::config(format!("{env_key} is not set")))?;
        let base_url = base_url.unwrap_or_else(|| match provider {
            Provider::OpenAi => "https://api.openai.com/v1/chat/completions".to_string(),
            Provider::Anthropic => "https://api.anthropic.com/v1/messages".to_string(),
        });
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(Error::from)?;
        Ok(Self {
            http,
            provider,
            api_key,
            model: model.into(),
            base_url,
            max_transport_retries: 3,
        })
    }

    async fn call_once(&self, request: &LlmRequest) -> Result<LlmResponse> {
        match self.provider {
            Provider::OpenAi => self.call_openai(request).await,
            Provider::Anthropic => self.call_anthropic(request).await,
        }
    }

    async fn call_openai(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_prompt},
            ],
        });
        let resp = self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::provider(
                "openai",
                format!("HTTP {status}: {text}"),
            ));
        }
        let completion: OpenAiCompletion = resp.json().await?;
        let text = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::provider("openai", "empty choices array"))?;
        Ok(LlmResponse {
            text,
            model: self.model.clone(),
            prompt_tokens: completion.usage.as_ref().and_then(|u| u.prompt_tokens),
            completion_tokens: completion.usage.as_ref().and_then(|u| u.completion_tokens),
        })
    }

    async fn call_anthropic(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "system": request.system_prompt,
            "messages": [
                {"role": "user", "content": request.user_prompt},
            ],
        });
        let resp = self
            .http
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::provider(
                "anthropic",
                format!("HTTP {status}: {text}"),
            ));
        }
        let completion: AnthropicCompletion = resp.json().await?;
        let text = completion
            .content
            .into_iter()
            .next()
            .map(|b| b.text)
            .ok_or_else(|| Error::provider("anthropic", "empty content array"))?;
        Ok(LlmResponse {
            text,
            model: self.model.clone(),
            prompt_tokens: completion.usage.as_ref().and_then(|u| u.input_tokens),
            completion_tokens: completion.usage.as_ref().and_then(|u| u.output_tokens),
        })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let mut attempt = 0;
        loop {
            match self.call_once(&request).await {
                Ok(resp) => return Ok(resp),
                Err(err) if attempt < self.max_transport_retries && err.is_provider_failure() => {
                    attempt += 1;
                    let backoff = Duration::from_millis(200 * 2u64.pow(attempt));
                    tracing::warn!(attempt, ?backoff, error = %err, "llm transport retry");
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
