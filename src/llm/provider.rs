//! Model provider variants and their HTTP chat-completion clients.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ProviderError;

/// Default HTTP timeout for a single completion request.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Environment variable to override the default timeout.
const TIMEOUT_ENV_VAR: &str = "ANNALIST_LLM_TIMEOUT";

const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const FIREWORKS_ENDPOINT: &str = "https://api.fireworks.ai/inference/v1/chat/completions";
const FIREWORKS_MODEL_PREFIX: &str = "accounts/fireworks/models/";

/// Supported model providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Fireworks,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Fireworks => "fireworks",
        }
    }

    /// Whether the provider tolerates several in-flight requests from one run.
    pub fn supports_concurrency(&self) -> bool {
        matches!(self, Provider::Fireworks)
    }

    fn api_key_env(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Fireworks => "FIREWORKS_API_KEY",
        }
    }

    fn default_endpoint(&self) -> &'static str {
        match self {
            Provider::OpenAi => OPENAI_ENDPOINT,
            Provider::Fireworks => FIREWORKS_ENDPOINT,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelTarget {
    pub provider: Provider,
    pub model: String,
}

impl ModelTarget {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

impl fmt::Display for ModelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

/// Sampling parameters passed with every completion request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_tokens: u32,
}

/// Capability interface shared by every provider.
///
/// This abstraction allows swapping in fake providers in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send `prompt` to `model` and return the completion text.
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<String, ProviderError>;
}

/// Maps each provider variant to the client that serves it.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    clients: HashMap<Provider, Arc<dyn ModelClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry backed by the real HTTP APIs, reading keys from the environment.
    pub fn from_env() -> Self {
        let timeout = get_timeout();
        let mut registry = Self::new();
        for provider in [Provider::OpenAi, Provider::Fireworks] {
            let client = ChatCompletionsClient::from_env(provider, timeout);
            registry = registry.with_client(provider, Arc::new(client));
        }
        registry
    }

    pub fn with_client(mut self, provider: Provider, client: Arc<dyn ModelClient>) -> Self {
        self.clients.insert(provider, client);
        self
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn ModelClient>> {
        self.clients.get(&provider).cloned()
    }
}

/// Get the configured request timeout.
///
/// Reads from ANNALIST_LLM_TIMEOUT if set, otherwise uses 60 seconds.
/// Logs a warning if the variable is set but not a valid number.
pub fn get_timeout() -> Duration {
    match env::var(TIMEOUT_ENV_VAR) {
        Ok(v) if !v.is_empty() => match v.parse::<u64>() {
            Ok(secs) => Duration::from_secs(secs),
            Err(_) => {
                warn!(
                    "Invalid {} value '{}', using default {}s",
                    TIMEOUT_ENV_VAR, v, DEFAULT_TIMEOUT_SECS
                );
                Duration::from_secs(DEFAULT_TIMEOUT_SECS)
            }
        },
        _ => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: String,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: MessageContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Debug, Serialize)]
struct ContentPart<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client used by both providers.
pub struct ChatCompletionsClient {
    provider: Provider,
    endpoint: String,
    api_key: Option<String>,
    http: reqwest::Client,
    timeout: Duration,
}

impl ChatCompletionsClient {
    pub fn new(
        provider: Provider,
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            endpoint: endpoint.into(),
            api_key,
            http: reqwest::Client::new(),
            timeout,
        }
    }

    pub fn from_env(provider: Provider, timeout: Duration) -> Self {
        let api_key = env::var(provider.api_key_env())
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self::new(provider, provider.default_endpoint(), api_key, timeout)
    }

    fn build_request<'a>(
        &self,
        model: &str,
        prompt: &'a str,
        params: &SamplingParams,
    ) -> ChatRequest<'a> {
        let (model, content, top_k) = match self.provider {
            Provider::OpenAi => (model.to_string(), MessageContent::Text(prompt), None),
            Provider::Fireworks => {
                let model = if model.starts_with(FIREWORKS_MODEL_PREFIX) {
                    model.to_string()
                } else {
                    format!("{FIREWORKS_MODEL_PREFIX}{model}")
                };
                let parts = vec![ContentPart {
                    kind: "text",
                    text: prompt,
                }];
                (model, MessageContent::Parts(parts), Some(params.top_k))
            }
        };

        ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
            temperature: params.temperature,
            top_p: params.top_p,
            top_k,
            max_tokens: params.max_tokens,
        }
    }
}

#[async_trait]
impl ModelClient for ChatCompletionsClient {
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ProviderError::MissingApiKey {
                env_var: self.provider.api_key_env(),
            })?;

        let request = self.build_request(model, prompt, params);
        debug!(provider = %self.provider, model, "sending completion request");

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(self.timeout.as_secs())
                } else {
                    ProviderError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::MalformedResponse("response has no choices".into()))?;

        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(ProviderError::EmptyCompletion);
        }
        Ok(content)
    }
}
