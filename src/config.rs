//! User configuration loaded from YAML.
//!
//! Every section has defaults, so a missing file or an empty document yields
//! a runnable configuration. Secrets never live here; they come from the
//! environment.

use std::collections::BTreeSet;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cost::RateTable;
use crate::error::ConfigError;
use crate::llm::provider::{ModelTarget, Provider, SamplingParams};

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "annalist.yml";

/// Model-calling pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LlmStage {
    Strategy,
    Explain,
    CommitMessage,
}

impl LlmStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmStage::Strategy => "strategy",
            LlmStage::Explain => "explain",
            LlmStage::CommitMessage => "commit_message",
        }
    }
}

impl fmt::Display for LlmStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub change_detection: ChangeDetection,
    pub llm: LlmConfig,
    pub rates: RateTable,
    pub exchange: ExchangeConfig,
    pub prompt: PromptConfig,
    pub notify: NotifyConfig,
    pub results_dir: PathBuf,
    pub logs_dir: PathBuf,
    /// Offset from UTC used when labelling record entries.
    pub timezone_offset_hours: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            change_detection: ChangeDetection::default(),
            llm: LlmConfig::default(),
            rates: RateTable::builtin(),
            exchange: ExchangeConfig::default(),
            prompt: PromptConfig::default(),
            notify: NotifyConfig::default(),
            results_dir: PathBuf::from("results"),
            logs_dir: PathBuf::from("logs"),
            timezone_offset_hours: 0,
        }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults if the file is absent.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = if contents.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
                path: PathBuf::from("<inline>"),
                source,
            })?
        };

        let config = Config {
            rates: config.rates.clone().with_builtin_defaults(),
            ..config
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for stage in [LlmStage::Strategy, LlmStage::Explain, LlmStage::CommitMessage] {
            if self.llm.stage(stage).chain.is_empty() {
                return Err(ConfigError::EmptyChain(stage.to_string()));
            }
        }
        if self.llm.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(())
    }
}

/// Which working-tree changes are considered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeDetection {
    /// Allow-listed extensions, without the leading dot.
    pub extensions: BTreeSet<String>,
    pub include_untracked: bool,
    /// Repository-relative path prefixes that are never considered.
    pub exclude: Vec<String>,
}

impl Default for ChangeDetection {
    fn default() -> Self {
        let extensions = [
            "rs", "py", "ts", "js", "go", "java", "md", "toml", "yml", "yaml", "json",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        Self {
            extensions,
            include_untracked: true,
            exclude: vec!["results/".to_string(), "logs/".to_string(), ".annalist/".to_string()],
        }
    }
}

impl ChangeDetection {
    /// Whether `path` carries an allow-listed extension (case-insensitive)
    /// and lies outside every excluded prefix.
    pub fn allows(&self, path: &str) -> bool {
        if self
            .exclude
            .iter()
            .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
        {
            return false;
        }
        Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions
                    .iter()
                    .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&ext))
            })
    }
}

/// Provider chain and sampling for one model-calling stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageLlmConfig {
    pub chain: Vec<ModelTarget>,
    pub params: SamplingParams,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub strategy: StageLlmConfig,
    pub explain: StageLlmConfig,
    pub commit_message: StageLlmConfig,
    /// Upper bound on simultaneous calls for concurrency-tolerant providers.
    pub concurrency: usize,
    /// Delay between serial calls, in milliseconds.
    pub serial_delay_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            strategy: StageLlmConfig {
                chain: vec![ModelTarget::new(Provider::OpenAi, "gpt-4o")],
                params: SamplingParams {
                    temperature: 0.5,
                    top_p: 0.8,
                    top_k: 40,
                    max_tokens: 8000,
                },
                max_attempts: default_max_attempts(),
            },
            explain: StageLlmConfig {
                chain: vec![
                    ModelTarget::new(Provider::Fireworks, "llama4-maverick-instruct-basic"),
                    ModelTarget::new(Provider::OpenAi, "gpt-4o"),
                ],
                params: SamplingParams {
                    temperature: 0.8,
                    top_p: 0.9,
                    top_k: 80,
                    max_tokens: 8000,
                },
                max_attempts: default_max_attempts(),
            },
            commit_message: StageLlmConfig {
                chain: vec![
                    ModelTarget::new(Provider::Fireworks, "llama4-scout-instruct-basic"),
                    ModelTarget::new(Provider::OpenAi, "gpt-4o"),
                ],
                params: SamplingParams {
                    temperature: 0.8,
                    top_p: 0.8,
                    top_k: 60,
                    max_tokens: 4096,
                },
                max_attempts: default_max_attempts(),
            },
            concurrency: 5,
            serial_delay_ms: 2000,
        }
    }
}

impl LlmConfig {
    pub fn stage(&self, stage: LlmStage) -> &StageLlmConfig {
        match stage {
            LlmStage::Strategy => &self.strategy,
            LlmStage::Explain => &self.explain,
            LlmStage::CommitMessage => &self.commit_message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub currency: String,
    pub source_url: String,
    pub fallback_rate: f64,
    pub cache_file: PathBuf,
    pub max_age_hours: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            currency: "KRW".to_string(),
            source_url: "https://open.er-api.com/v6/latest/USD".to_string(),
            fallback_rate: 1400.0,
            cache_file: PathBuf::from(".annalist/exchange_rate.json"),
            max_age_hours: 24,
        }
    }
}

/// Output language of generated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ko,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ko => "ko",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub language: Language,
    /// Free-form style label passed to the model (e.g. "conventional").
    pub style: String,
    /// Directory of `<language>/<template>.txt` overrides.
    pub template_dir: Option<PathBuf>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            language: Language::En,
            style: "conventional".to_string(),
            template_dir: None,
        }
    }
}

/// A notification destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    Slack {
        #[serde(default)]
        webhook_url: Option<String>,
    },
    Discord {
        #[serde(default)]
        webhook_url: Option<String>,
    },
    Webhook {
        url: String,
    },
}

impl ChannelConfig {
    /// Configured URL, with the platform's environment variable taking precedence.
    pub fn resolved_url(&self) -> Option<String> {
        let (env_var, configured) = match self {
            ChannelConfig::Slack { webhook_url } => ("SLACK_WEBHOOK_URL", webhook_url.clone()),
            ChannelConfig::Discord { webhook_url } => ("DISCORD_WEBHOOK_URL", webhook_url.clone()),
            ChannelConfig::Webhook { url } => return Some(url.clone()),
        };
        env::var(env_var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or(configured)
    }
}

/// A record-keeping destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordConfig {
    Notion {
        #[serde(default)]
        parent_page_id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NotifyConfig {
    pub platforms: Vec<ChannelConfig>,
    pub record: Option<RecordConfig>,
}
