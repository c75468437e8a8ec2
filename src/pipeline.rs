//! Staged pipeline driver.
//!
//! Extract → Strategy → Classify → Explain → CommitMessage → Aggregate → Publish.
//! Each stage reads the previous stages' artifacts from the run directory, so
//! any single stage can be re-run against an existing run. Missing inputs skip
//! a stage; only strategy prediction failures and environment errors abort.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::artifact::{ArtifactDir, ArtifactStore, CLASSIFIED_RESULT_FILE, MANUAL_REVIEW_FILE};
use crate::config::{Config, LlmStage};
use crate::context::RunContext;
use crate::error::{ArtifactError, PipelineError};
use crate::generate::{self, GenerationOutcome, TemplateSet};
use crate::git::{self, GitCli, SourceControl};
use crate::llm::{LlmManager, ProviderRegistry};
use crate::publish::{NotificationChannel, NotionRecord, PublishOptions, Publisher, RecordChannel};
use crate::report::{self, ClassifiedResult};
use crate::snapshot::{self, FileRecord, RepoSnapshot};
use crate::strategy::{self, ReadmePolicy, StrategyRecord};

pub const PUBLISH_RESULT_FILE: &str = "publish_result.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Extract,
    Strategy,
    Classify,
    Explain,
    CommitMessage,
    Aggregate,
    Publish,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Extract,
        Stage::Strategy,
        Stage::Classify,
        Stage::Explain,
        Stage::CommitMessage,
        Stage::Aggregate,
        Stage::Publish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Strategy => "strategy",
            Stage::Classify => "classify",
            Stage::Explain => "explain",
            Stage::CommitMessage => "commit_message",
            Stage::Aggregate => "aggregate",
            Stage::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| {
                let names: Vec<&str> = Stage::ALL.iter().map(Stage::as_str).collect();
                format!("unknown stage '{s}' (expected one of: {})", names.join(", "))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    Completed,
    /// Nothing to do; the reason is logged.
    Skipped(String),
    /// Extraction found no allow-listed changes; later stages are skipped.
    NoUpdate,
}

/// Status of every stage that ran, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub stages: Vec<(Stage, StageStatus)>,
}

impl RunSummary {
    pub fn status_of(&self, stage: Stage) -> Option<&StageStatus> {
        self.stages.iter().find(|(s, _)| *s == stage).map(|(_, status)| status)
    }
}

pub struct Pipeline {
    config: Config,
    repo_root: PathBuf,
    registry: ProviderRegistry,
    scm: Arc<dyn SourceControl>,
    channels: Vec<Arc<dyn NotificationChannel>>,
    record: Option<Arc<dyn RecordChannel>>,
    options: PublishOptions,
}

impl Pipeline {
    /// Pipeline over the repository at `repo_root` with `git`-backed publishing
    /// and the channels named in the configuration.
    pub fn new(config: Config, repo_root: impl Into<PathBuf>, registry: ProviderRegistry) -> Self {
        let repo_root = repo_root.into();
        let channels = crate::publish::channels_from_config(&config.notify);
        let record = config.notify.record.as_ref().and_then(|record_config| {
            let repo_name = repo_root
                .canonicalize()
                .ok()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
                .unwrap_or_else(|| "repository".to_string());
            let offset = config.timezone_offset_hours;
            match NotionRecord::from_config(record_config, &repo_name, offset) {
                Ok(record) => Some(Arc::new(record) as Arc<dyn RecordChannel>),
                Err(e) => {
                    warn!("Record channel disabled: {}", e);
                    None
                }
            }
        });

        Self {
            scm: Arc::new(GitCli::new(&repo_root)),
            config,
            repo_root,
            registry,
            channels,
            record,
            options: PublishOptions::default(),
        }
    }

    pub fn with_source_control(mut self, scm: Arc<dyn SourceControl>) -> Self {
        self.scm = scm;
        self
    }

    pub fn with_channels(mut self, channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_record(mut self, record: Option<Arc<dyn RecordChannel>>) -> Self {
        self.record = record;
        self
    }

    pub fn with_options(mut self, options: PublishOptions) -> Self {
        self.options = options;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run every stage in order.
    pub async fn run(&self, ctx: &RunContext) -> Result<RunSummary, PipelineError> {
        info!("Starting run {}", ctx.run_id());
        let mut summary = RunSummary::default();

        for (idx, stage) in Stage::ALL.into_iter().enumerate() {
            let status = match self.run_stage(stage, ctx).await {
                Ok(status) => status,
                Err(e) => {
                    error!("Run {} aborted in stage {}: {}", ctx.run_id(), stage, e);
                    return Err(e);
                }
            };
            let no_update = status == StageStatus::NoUpdate;
            summary.stages.push((stage, status));

            if no_update {
                for later in &Stage::ALL[idx + 1..] {
                    info!("stage skipped: {} (no update)", later);
                    summary.stages.push((*later, StageStatus::Skipped("no update".to_string())));
                }
                break;
            }
        }

        info!("Run {} finished", ctx.run_id());
        Ok(summary)
    }

    /// Run one stage against the run directory in `ctx`.
    pub async fn run_stage(
        &self,
        stage: Stage,
        ctx: &RunContext,
    ) -> Result<StageStatus, PipelineError> {
        info!("Running stage {}", stage);
        match stage {
            Stage::Extract => self.extract(ctx),
            Stage::Strategy => self.predict(ctx).await,
            Stage::Classify => self.classify(ctx),
            Stage::Explain => self.explain(ctx).await,
            Stage::CommitMessage => self.commit_messages(ctx).await,
            Stage::Aggregate => self.aggregate(ctx),
            Stage::Publish => self.publish(ctx).await,
        }
    }

    fn extract(&self, ctx: &RunContext) -> Result<StageStatus, PipelineError> {
        let repo = git::open_repository(&self.repo_root)?;
        let snapshot = snapshot::extract_snapshot(&repo, &self.config.change_detection)?;
        let store = ctx.store();
        store.write_snapshot(&snapshot)?;

        if snapshot.no_update() {
            info!("no update: no allow-listed files changed in {}", snapshot.name);
            store.write_files(&[])?;
            return Ok(StageStatus::NoUpdate);
        }

        let files = snapshot::collect_file_records(&repo, &snapshot, store);
        store.write_files(&files)?;
        info!("Extracted {} changed file(s) from {}", files.len(), snapshot.name);
        Ok(StageStatus::Completed)
    }

    async fn predict(&self, ctx: &RunContext) -> Result<StageStatus, PipelineError> {
        let Some((snapshot, files)) = self.changed_files(Stage::Strategy, ctx.store())? else {
            return Ok(skipped(Stage::Strategy, "no update"));
        };

        let readme = ReadmePolicy::from_tokens(snapshot.readme_tokens);
        let initial = strategy::initial_strategies(&files, readme, ctx.started_at());

        let mut llm = self.manager(LlmStage::Strategy, ctx, ArtifactDir::StrategyOut).await;
        let predicted =
            strategy::predict_strategies(&mut llm, ctx.store(), &snapshot, &files, &initial).await;
        if let Err(e) = llm.flush(ctx.store()) {
            warn!("Could not write strategy ledger: {}", e);
        }

        // Only a complete prediction replaces the persisted strategies.
        let enriched = predicted?;
        ctx.store().write_strategies(&enriched)?;
        info!("Predicted strategy for {} file(s)", enriched.len());
        Ok(StageStatus::Completed)
    }

    fn classify(&self, ctx: &RunContext) -> Result<StageStatus, PipelineError> {
        let store = ctx.store();
        let Some(files) = optional(store.read_files())? else {
            return Ok(skipped(Stage::Classify, "no file records"));
        };
        let Some(mut strategies) = optional(store.read_strategies())? else {
            return Ok(skipped(Stage::Classify, "no strategy records"));
        };

        let review = strategy::classify(&files, &mut strategies);
        store.write_strategies(&strategies)?;
        store.write_json(MANUAL_REVIEW_FILE, &review, "manual review list")?;
        if !review.is_empty() {
            warn!("{} file(s) flagged for manual review", review.len());
        }
        Ok(StageStatus::Completed)
    }

    async fn explain(&self, ctx: &RunContext) -> Result<StageStatus, PipelineError> {
        let Some((snapshot, files, strategies)) =
            self.generation_inputs(Stage::Explain, ctx.store())?
        else {
            return Ok(StageStatus::Skipped("missing inputs".to_string()));
        };

        let language = self.config.prompt.language;
        let mut llm = self.manager(LlmStage::Explain, ctx, ArtifactDir::ExplainOut).await;
        let outcome =
            generate::generate_explanations(&mut llm, &snapshot, &files, &strategies, language)
                .await;
        Ok(self.finish_generation(Stage::Explain, &llm, ctx.store(), &outcome))
    }

    async fn commit_messages(&self, ctx: &RunContext) -> Result<StageStatus, PipelineError> {
        let Some((snapshot, files, strategies)) =
            self.generation_inputs(Stage::CommitMessage, ctx.store())?
        else {
            return Ok(StageStatus::Skipped("missing inputs".to_string()));
        };

        let templates = TemplateSet::from_config(&self.config.prompt);
        let mut llm = self.manager(LlmStage::CommitMessage, ctx, ArtifactDir::MessageOut).await;
        let outcome =
            generate::generate_commit_messages(&mut llm, &snapshot, &files, &strategies, &templates)
                .await;
        Ok(self.finish_generation(Stage::CommitMessage, &llm, ctx.store(), &outcome))
    }

    fn aggregate(&self, ctx: &RunContext) -> Result<StageStatus, PipelineError> {
        if self.changed_files(Stage::Aggregate, ctx.store())?.is_none() {
            return Ok(skipped(Stage::Aggregate, "no update"));
        }
        report::aggregate(ctx.store(), &self.config.exchange.currency)?;
        Ok(StageStatus::Completed)
    }

    async fn publish(&self, ctx: &RunContext) -> Result<StageStatus, PipelineError> {
        let store = ctx.store();
        let Some((_, files)) = self.changed_files(Stage::Publish, store)? else {
            return Ok(skipped(Stage::Publish, "no update"));
        };
        let classified = store.read_json::<ClassifiedResult>(CLASSIFIED_RESULT_FILE);
        let Some(result) = optional(classified)? else {
            return Ok(skipped(Stage::Publish, "no classified result"));
        };

        let publisher =
            Publisher::new(self.scm.clone(), self.channels.clone(), self.record.clone());
        let outcome = publisher.publish(&files, &result, self.options).await;
        store.write_json(PUBLISH_RESULT_FILE, &outcome, "publish result")?;
        Ok(StageStatus::Completed)
    }

    /// Snapshot and file records, or `None` when there is nothing to process.
    fn changed_files(
        &self,
        stage: Stage,
        store: &ArtifactStore,
    ) -> Result<Option<(RepoSnapshot, Vec<FileRecord>)>, PipelineError> {
        let Some(snapshot) = optional(store.read_snapshot())? else {
            info!("{} found no repository snapshot", stage);
            return Ok(None);
        };
        if snapshot.no_update() {
            return Ok(None);
        }
        let files = optional(store.read_files())?.unwrap_or_default();
        if files.is_empty() {
            return Ok(None);
        }
        Ok(Some((snapshot, files)))
    }

    fn generation_inputs(
        &self,
        stage: Stage,
        store: &ArtifactStore,
    ) -> Result<Option<(RepoSnapshot, Vec<FileRecord>, Vec<StrategyRecord>)>, PipelineError> {
        let Some((snapshot, files)) = self.changed_files(stage, store)? else {
            skipped(stage, "no update");
            return Ok(None);
        };
        let Some(strategies) = optional(store.read_strategies())? else {
            skipped(stage, "no strategy records");
            return Ok(None);
        };
        if !strategies.iter().any(StrategyRecord::warrants_generation) {
            skipped(stage, "no file above the importance threshold");
            return Ok(None);
        }
        Ok(Some((snapshot, files, strategies)))
    }

    async fn manager(
        &self,
        stage: LlmStage,
        ctx: &RunContext,
        fallback: ArtifactDir,
    ) -> LlmManager {
        let rate = ctx.exchange_rate().await;
        LlmManager::new(stage, &self.config, self.registry.clone(), rate, ctx.store().dir(fallback))
    }

    fn finish_generation(
        &self,
        stage: Stage,
        llm: &LlmManager,
        store: &ArtifactStore,
        outcome: &GenerationOutcome,
    ) -> StageStatus {
        if let Err(e) = llm.flush(store) {
            warn!("Could not write {} ledger: {}", stage, e);
        }
        if !outcome.failed.is_empty() {
            warn!("{}: {} file(s) failed and will use fallbacks", stage, outcome.failed.len());
        }
        if outcome.attempted() == 0 {
            return skipped(stage, "nothing to generate");
        }
        info!(
            "{}: {} generated, {} failed, {} skipped",
            stage,
            outcome.generated.len(),
            outcome.failed.len(),
            outcome.skipped.len()
        );
        StageStatus::Completed
    }
}

fn skipped(stage: Stage, reason: &str) -> StageStatus {
    info!("stage skipped: {} ({})", stage, reason);
    StageStatus::Skipped(reason.to_string())
}

/// `Ok(None)` for an artifact that does not exist yet.
fn optional<T>(result: Result<T, ArtifactError>) -> Result<Option<T>, PipelineError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_missing() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_parse_with_either_separator() {
        assert_eq!("commit-message".parse::<Stage>().unwrap(), Stage::CommitMessage);
        assert_eq!("commit_message".parse::<Stage>().unwrap(), Stage::CommitMessage);
        assert_eq!("Explain".parse::<Stage>().unwrap(), Stage::Explain);
        let err = "ship".parse::<Stage>().unwrap_err();
        assert!(err.contains("extract, strategy, classify"));
    }

    #[test]
    fn stage_order_is_fixed() {
        let names: Vec<&str> = Stage::ALL.iter().map(Stage::as_str).collect();
        assert_eq!(
            names,
            ["extract", "strategy", "classify", "explain", "commit_message", "aggregate", "publish"]
        );
    }

    #[test]
    fn missing_artifacts_are_optional() {
        let missing = ArtifactError::Read {
            path: "x".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(matches!(optional::<()>(Err(missing)), Ok(None)));
        let denied = ArtifactError::Read {
            path: "x".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(optional::<()>(Err(denied)).is_err());
    }
}
