//! annalist - annotate working-tree changes with LLM-written explanations and commit messages.
//!
//! # Overview
//!
//! annalist runs a staged batch pipeline over a git working tree:
//! Extract → Strategy-Predict → Classify → Explain → Commit-Message → Aggregate → Publish.
//! Every stage persists its output under a per-run artifact directory and reads
//! the previous stage's artifacts back, so any stage can be re-run on its own.

pub mod artifact;
pub mod config;
pub mod context;
pub mod cost;
pub mod error;
pub mod generate;
pub mod git;
pub mod llm;
pub mod pipeline;
pub mod preflight;
pub mod publish;
pub mod report;
pub mod snapshot;
pub mod strategy;

// Re-export commonly used types
pub use artifact::ArtifactStore;
pub use config::Config;
pub use context::RunContext;
pub use error::{
    ArtifactError, ConfigError, ExchangeError, GitError, NotifyError, PipelineError, ProviderError,
    RecordError, StrategyError,
};
pub use llm::{LlmError, LlmManager, LlmRouter, ModelClient, Provider, ProviderRegistry};
pub use pipeline::{Pipeline, Stage, StageStatus};
pub use snapshot::{FileRecord, RepoSnapshot};
pub use strategy::{StrategyRecord, Tier};
