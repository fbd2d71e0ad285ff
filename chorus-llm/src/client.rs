//! Completion client: the [`CompletionService`] seam and its HTTP backends.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, CompletionOptions, LlmResponse};

/// Anything that turns a chat context into text.
///
/// Failures surface as [`LlmError`]; an empty reply is `Ok` with empty text.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Complete `messages` under `options`.
    ///
    /// # Errors
    /// Returns [`LlmError`] when the backend fails, times out or is unavailable.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<LlmResponse>;

    /// Short backend name for logs.
    fn name(&self) -> &str;
}

/// Provider backend for completions.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    /// Ollama `/api/chat`.
    Ollama {
        /// Server root, e.g. `http://localhost:11434`.
        base_url: String,
    },
    /// Any OpenAI-compatible `/v1/chat/completions` server.
    OpenAiCompatible {
        /// Server root.
        base_url: String,
        /// Bearer token; empty for servers without auth.
        api_key: String,
    },
    /// No backend; every call fails with [`LlmError::Unavailable`].
    None,
}

impl LlmProvider {
    /// Resolve a provider from its config name.
    ///
    /// # Errors
    /// Returns [`LlmError::ConfigError`] for an unknown name.
    pub fn from_name(name: &str, base_url: &str, api_key: Option<&str>) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        match name {
            "ollama" => Ok(Self::Ollama { base_url }),
            "openai" => Ok(Self::OpenAiCompatible {
                base_url,
                api_key: api_key.unwrap_or_default().to_string(),
            }),
            "none" => Ok(Self::None),
            other => Err(LlmError::ConfigError(format!("unknown provider '{other}'"))),
        }
    }
}

/// HTTP completion client with retries and a hard per-attempt timeout.
pub struct LlmClient {
    provider: LlmProvider,
    http: Client,
    model: String,
    max_retries: u32,
    timeout_ms: u64,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("provider", &self.name())
            .field("model", &self.model)
            .field("max_retries", &self.max_retries)
            .field("timeout_ms", &self.timeout_ms)
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    /// Create a client.
    #[must_use]
    pub fn new(
        provider: LlmProvider,
        model: impl Into<String>,
        max_retries: u32,
        timeout_ms: u64,
    ) -> Self {
        Self {
            provider,
            http: Client::new(),
            model: model.into(),
            max_retries,
            timeout_ms,
        }
    }

    /// A client with no backend.
    #[must_use]
    pub fn none() -> Self {
        Self::new(LlmProvider::None, "", 0, 0)
    }

    /// `true` if a backend is configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self.provider, LlmProvider::None)
    }

    async fn send_once(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
        timeout_ms: u64,
    ) -> Result<(String, u32)> {
        match &self.provider {
            LlmProvider::None => Err(LlmError::Unavailable(
                "No completion provider configured".into(),
            )),
            LlmProvider::Ollama { base_url } => {
                let mut sampling = json!({
                    "num_predict": options.max_tokens,
                    "temperature": options.temperature,
                });
                if let Some(top_p) = options.top_p {
                    sampling["top_p"] = json!(top_p);
                }
                if let Some(top_k) = options.top_k {
                    sampling["top_k"] = json!(top_k);
                }
                let body = json!({
                    "model": self.model,
                    "messages": messages,
                    "stream": false,
                    "options": sampling,
                });

                let json = self
                    .post_json(&format!("{base_url}/api/chat"), None, &body, timeout_ms)
                    .await?;
                Ok((
                    json["message"]["content"].as_str().unwrap_or_default().to_string(),
                    token_count(&json["eval_count"]),
                ))
            }
            LlmProvider::OpenAiCompatible { base_url, api_key } => {
                let mut body = json!({
                    "model": self.model,
                    "messages": messages,
                    "max_tokens": options.max_tokens,
                    "temperature": options.temperature,
                });
                if let Some(top_p) = options.top_p {
                    body["top_p"] = json!(top_p);
                }

                let json = self
                    .post_json(
                        &format!("{base_url}/v1/chat/completions"),
                        Some(api_key),
                        &body,
                        timeout_ms,
                    )
                    .await?;
                Ok((
                    json["choices"][0]["message"]["content"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                    token_count(&json["usage"]["completion_tokens"]),
                ))
            }
        }
    }

    async fn post_json(
        &self,
        url: &str,
        api_key: Option<&str>,
        body: &Value,
        timeout_ms: u64,
    ) -> Result<Value> {
        let mut request = self.http.post(url).json(body);
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| LlmError::from_http(&e, timeout_ms))?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed(format!("HTTP {status}: {detail}")));
        }
        resp.json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))
    }
}

fn token_count(value: &Value) -> u32 {
    value
        .as_u64()
        .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX))
}

#[async_trait]
impl CompletionService for LlmClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<LlmResponse> {
        if !self.is_available() {
            return Err(LlmError::Unavailable(
                "No completion provider configured".into(),
            ));
        }

        let timeout_ms = options.timeout_ms.unwrap_or(self.timeout_ms);
        let mut last_error = String::new();
        let mut last_timed_out = false;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!(
                    attempt = attempt + 1,
                    of = self.max_retries + 1,
                    "Retrying completion call"
                );
            }

            let start = Instant::now();
            let outcome = tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                self.send_once(messages, options, timeout_ms),
            )
            .await;

            match outcome {
                Ok(Ok((text, tokens_generated))) => {
                    let latency_ms =
                        u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                    debug!(
                        provider = self.name(),
                        latency_ms, tokens_generated, "Completion succeeded"
                    );
                    return Ok(LlmResponse {
                        text,
                        tokens_generated,
                        latency_ms,
                        model: self.model.clone(),
                    });
                }
                Ok(Err(LlmError::ParseError(e))) => return Err(LlmError::ParseError(e)),
                Ok(Err(e)) => {
                    warn!(provider = self.name(), error = %e, "Completion attempt failed");
                    last_timed_out = e.is_timeout();
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!(provider = self.name(), timeout_ms, "Completion attempt timed out");
                    last_timed_out = true;
                    last_error = format!("timed out after {timeout_ms}ms");
                }
            }
        }

        if last_timed_out {
            Err(LlmError::Timeout(timeout_ms))
        } else {
            Err(LlmError::RetriesExhausted {
                attempts: self.max_retries + 1,
                last_error,
            })
        }
    }

    fn name(&self) -> &str {
        match self.provider {
            LlmProvider::Ollama { .. } => "ollama",
            LlmProvider::OpenAiCompatible { .. } => "openai",
            LlmProvider::None => "none",
        }
    }
}
