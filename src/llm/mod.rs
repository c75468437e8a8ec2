//! LLM invocation layer: providers, fallback routing, retries and the call manager.

pub mod json;
pub mod manager;
pub mod provider;
pub mod retry;
pub mod router;

pub use json::{strip_code_fence, unfenced_json};
pub use manager::{ERROR_SENTINEL, LlmManager, PromptJob, SavePaths, is_error_sentinel};
pub use provider::{
    ChatCompletionsClient, ModelClient, ModelTarget, Provider, ProviderRegistry, SamplingParams,
};
pub use router::{FailedAttempt, LlmCompletion, LlmError, LlmRouter};
