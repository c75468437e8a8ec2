//! Ordered provider/model fallback orchestration.

use std::fmt;

use tracing::{info, warn};

use crate::config::StageLlmConfig;
use crate::error::ProviderError;
use crate::llm::provider::{ModelTarget, ProviderRegistry, SamplingParams};
use crate::llm::retry::retry_with_backoff;

/// A chain entry that failed, kept for diagnostics.
#[derive(Debug)]
pub struct FailedAttempt {
    pub target: ModelTarget,
    pub error: ProviderError,
}

/// LLM orchestration error.
#[derive(Debug)]
pub enum LlmError {
    /// The stage was configured without any provider/model pair.
    EmptyChain,
    /// Every entry of the fallback chain failed.
    AllProvidersFailed { attempts: Vec<FailedAttempt> },
    /// A concurrent worker task panicked or was cancelled.
    TaskFailed(String),
}

impl LlmError {
    pub fn summary(&self) -> String {
        match self {
            LlmError::EmptyChain => "No provider/model configured for this stage".to_string(),
            LlmError::AllProvidersFailed { attempts } => {
                let tried: Vec<String> = attempts.iter().map(|a| a.target.to_string()).collect();
                format!("All {} provider(s) failed: {}", attempts.len(), tried.join(", "))
            }
            LlmError::TaskFailed(reason) => format!("LLM worker task failed: {reason}"),
        }
    }

    pub fn detailed(&self) -> String {
        match self {
            LlmError::AllProvidersFailed { attempts } => {
                let parts: Vec<String> = attempts
                    .iter()
                    .map(|a| format!("{} error: {}", a.target, a.error))
                    .collect();
                format!("All provider(s) failed. {}.", parts.join(". "))
            }
            other => other.summary(),
        }
    }

    pub fn attempts(&self) -> &[FailedAttempt] {
        match self {
            LlmError::AllProvidersFailed { attempts } => attempts,
            _ => &[],
        }
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

impl std::error::Error for LlmError {}

/// Successful generation with metadata.
#[derive(Debug)]
pub struct LlmCompletion {
    pub output: String,
    pub target: ModelTarget,
    /// Chain entries that failed before `target` answered.
    pub failed: Vec<FailedAttempt>,
}

impl LlmCompletion {
    pub fn used_fallback(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Routes a prompt through a stage's ordered fallback chain.
#[derive(Clone)]
pub struct LlmRouter {
    chain: Vec<ModelTarget>,
    params: SamplingParams,
    max_attempts: u32,
    registry: ProviderRegistry,
}

impl LlmRouter {
    pub fn new(stage: &StageLlmConfig, registry: ProviderRegistry) -> Self {
        Self {
            chain: stage.chain.clone(),
            params: stage.params,
            max_attempts: stage.max_attempts,
            registry,
        }
    }

    pub fn primary(&self) -> Option<&ModelTarget> {
        self.chain.first()
    }

    pub fn chain(&self) -> &[ModelTarget] {
        &self.chain
    }

    /// Whether calls may be dispatched concurrently (decided by the primary provider).
    pub fn supports_concurrency(&self) -> bool {
        self.primary()
            .is_some_and(|t| t.provider.supports_concurrency())
    }

    /// Try each chain entry in order until one answers.
    ///
    /// Each entry gets its own retry budget. Moving on to the next entry is
    /// logged once as a fallback invocation.
    pub async fn generate(&self, prompt: &str) -> Result<LlmCompletion, LlmError> {
        if self.chain.is_empty() {
            return Err(LlmError::EmptyChain);
        }

        let mut failed: Vec<FailedAttempt> = Vec::new();

        for (idx, target) in self.chain.iter().enumerate() {
            if idx > 0 {
                let previous = &failed[failed.len() - 1];
                warn!(
                    "fallback invoked: {} failed ({}), trying {}",
                    previous.target, previous.error, target
                );
            }

            match self.run_target(target, prompt).await {
                Ok(output) => {
                    if idx > 0 {
                        info!("{} answered after {} failed attempt(s)", target, failed.len());
                    }
                    return Ok(LlmCompletion {
                        output,
                        target: target.clone(),
                        failed,
                    });
                }
                Err(error) => failed.push(FailedAttempt {
                    target: target.clone(),
                    error,
                }),
            }
        }

        Err(LlmError::AllProvidersFailed { attempts: failed })
    }

    async fn run_target(
        &self,
        target: &ModelTarget,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        let client = self
            .registry
            .get(target.provider)
            .ok_or_else(|| ProviderError::NotRegistered(target.provider.to_string()))?;

        retry_with_backoff(
            self.max_attempts,
            || {
                let client = client.clone();
                async move { client.complete(&target.model, prompt, &self.params).await }
            },
            |e| ProviderError::RetriesExhausted(Box::new(e)),
        )
        .await
    }
}
