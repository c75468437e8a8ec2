//! Error types for annalist modules using thiserror.

use std::path::PathBuf;

use thiserror::Error;

use crate::llm::router::LlmError;

/// Errors from git operations.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Failed to open repository: {0}")]
    OpenRepository(#[source] git2::Error),

    #[error("Repository has no working directory (bare repository)")]
    BareRepository,

    #[error("Failed to read working tree status: {0}")]
    StatusFailed(#[source] git2::Error),

    #[error("Failed to collect diff: {0}")]
    DiffFailed(#[source] git2::Error),

    #[error("Failed to walk commit history: {0}")]
    RevwalkError(#[source] git2::Error),

    #[error("Failed to read repository metadata: {0}")]
    Metadata(#[source] git2::Error),

    #[error("Failed to run git {operation}: {source}")]
    SpawnFailed {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {operation} failed: {stderr}")]
    CommandFailed { operation: String, stderr: String },
}

/// Errors from loading the user configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("LLM stage '{0}' has an empty provider chain")]
    EmptyChain(String),

    #[error("LLM concurrency must be at least 1")]
    ZeroConcurrency,
}

/// Errors from reading and writing the per-run artifact directory.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Deserialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Run directory not found: {0}")]
    RunNotFound(PathBuf),

    #[error("Invalid run id '{0}' (expected YYMMDD_HHMM)")]
    InvalidRunId(String),
}

impl ArtifactError {
    /// Whether this error means the artifact simply does not exist yet.
    pub fn is_missing(&self) -> bool {
        match self {
            ArtifactError::Read { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            ArtifactError::RunNotFound(_) => true,
            _ => false,
        }
    }
}

/// Errors from a single model provider call.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{env_var} is not set")]
    MissingApiKey { env_var: &'static str },

    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Provider returned an empty completion")]
    EmptyCompletion,

    #[error("No client registered for provider {0}")]
    NotRegistered(String),

    #[error("All retry attempts failed: {0}")]
    RetriesExhausted(#[source] Box<ProviderError>),
}

/// Errors from the exchange-rate source and its cache file.
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("Rate source returned HTTP {0}")]
    Status(u16),

    #[error("Rate source response has no rate for {0}")]
    MissingRate(String),

    #[error("Failed to access rate cache {path}: {source}")]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Run-fatal errors raised by the strategy predictor.
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("{count} changed files exceeds the limit of {limit}; narrow the change set")]
    TooManyFiles { count: usize, limit: usize },

    #[error("Strategy response for chunk {chunk} is not valid JSON: {reason}")]
    UnparseableResponse { chunk: usize, reason: String },

    #[error("Strategy prediction failed: {0}")]
    ProvidersExhausted(#[source] LlmError),
}

/// Errors from notification channels.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("{0} channel is not configured (missing webhook URL)")]
    NotConfigured(&'static str),

    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("Channel returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Errors from record (Notion-style) uploads.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("{0} is not set")]
    MissingCredentials(&'static str),

    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("Record API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed record API response: {0}")]
    MalformedResponse(String),
}

/// Errors that abort a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

impl PipelineError {
    /// Whether the error came from model-assisted strategy prediction.
    pub fn is_strategy_failure(&self) -> bool {
        matches!(self, PipelineError::Strategy(_))
    }
}
