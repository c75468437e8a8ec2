//! LLM invocation manager: single and batched calls with cost accounting.
//!
//! The manager correlates a logical task tag with its input/output artifact
//! paths, drives prompts through the stage's [`LlmRouter`], and keeps the
//! stage's cost ledger. Worker tasks only run the router; output files and
//! ledger rows are written afterwards by one accumulation loop, in input order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::artifact::{self, ArtifactStore};
use crate::config::{Config, LlmStage};
use crate::cost::{CostLedger, Direction, LedgerRow, RateTable};
use crate::error::ArtifactError;
use crate::llm::router::{LlmCompletion, LlmError, LlmRouter};
use crate::llm::provider::ProviderRegistry;
use crate::snapshot::count_tokens;

/// Prefix of the text returned by [`LlmManager::call`] when a call fails.
pub const ERROR_SENTINEL: &str = "[ERROR]";

/// One unit of model work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptJob {
    pub tag: String,
    pub prompt: String,
}

impl PromptJob {
    pub fn new(tag: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            prompt: prompt.into(),
        }
    }
}

/// Input and output artifact paths registered for a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavePaths {
    pub input: PathBuf,
    pub output: PathBuf,
}

impl SavePaths {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

/// Whether `text` is the failure sentinel produced by [`LlmManager::call`].
pub fn is_error_sentinel(text: &str) -> bool {
    text.starts_with(ERROR_SENTINEL)
}

pub struct LlmManager {
    stage: LlmStage,
    router: LlmRouter,
    rates: RateTable,
    exchange_rate: f64,
    concurrency: usize,
    serial_delay: Duration,
    fallback_dir: PathBuf,
    save_paths: HashMap<String, SavePaths>,
    ledger: CostLedger,
}

impl LlmManager {
    /// Manager for `stage`, with unregistered tags written under `fallback_dir`.
    pub fn new(
        stage: LlmStage,
        config: &Config,
        registry: ProviderRegistry,
        exchange_rate: f64,
        fallback_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            stage,
            router: LlmRouter::new(config.llm.stage(stage), registry),
            rates: config.rates.clone(),
            exchange_rate,
            concurrency: config.llm.concurrency.max(1),
            serial_delay: Duration::from_millis(config.llm.serial_delay_ms),
            fallback_dir: fallback_dir.into(),
            save_paths: HashMap::new(),
            ledger: CostLedger::new(),
        }
    }

    pub fn stage(&self) -> LlmStage {
        self.stage
    }

    pub fn router(&self) -> &LlmRouter {
        &self.router
    }

    pub fn ledger(&self) -> &CostLedger {
        &self.ledger
    }

    /// Expected artifact paths for `tag`.
    pub fn register(&mut self, tag: impl Into<String>, paths: SavePaths) {
        self.save_paths.insert(tag.into(), paths);
    }

    /// Run one prompt; failures come back as an `[ERROR] ...` sentinel string.
    pub async fn call(&mut self, prompt: &str, tag: &str) -> String {
        match self.try_call(prompt, tag).await {
            Ok(text) => text,
            Err(e) => sentinel(&e),
        }
    }

    /// Run one prompt and return the provider error explicitly.
    pub async fn try_call(&mut self, prompt: &str, tag: &str) -> Result<String, LlmError> {
        let job = PromptJob::new(tag, prompt);
        let input = self.prepare_input(&job);
        let result = self.router.generate(prompt).await;
        self.record(&job, &input, result)
    }

    /// Run every job and return results in input order.
    ///
    /// Jobs run concurrently (up to the configured limit) when the stage's
    /// primary provider supports it, otherwise one at a time with a fixed
    /// delay between calls. A failed job never aborts the batch.
    pub async fn call_all(&mut self, jobs: Vec<PromptJob>) -> Vec<Result<String, LlmError>> {
        if jobs.is_empty() {
            return Vec::new();
        }

        let inputs: Vec<PathBuf> = jobs.iter().map(|job| self.prepare_input(job)).collect();

        let completions = if self.router.supports_concurrency() && jobs.len() > 1 {
            info!(
                "Dispatching {} {} call(s), up to {} at a time",
                jobs.len(),
                self.stage,
                self.concurrency
            );
            self.dispatch_concurrent(&jobs).await
        } else {
            info!("Dispatching {} {} call(s) serially", jobs.len(), self.stage);
            self.dispatch_serial(&jobs).await
        };

        jobs.iter()
            .zip(inputs)
            .zip(completions)
            .map(|((job, input), result)| {
                let outcome = self.record(job, &input, result);
                if let Err(e) = &outcome {
                    error!("{} call for {} failed: {}", self.stage, job.tag, e.detailed());
                }
                outcome
            })
            .collect()
    }

    async fn dispatch_concurrent(
        &self,
        jobs: &[PromptJob],
    ) -> Vec<Result<LlmCompletion, LlmError>> {
        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set: JoinSet<(usize, Result<LlmCompletion, LlmError>)> = JoinSet::new();

        for (idx, job) in jobs.iter().enumerate() {
            let sem = sem.clone();
            let router = self.router.clone();
            let prompt = job.prompt.clone();

            join_set.spawn(async move {
                // The semaphore is never closed, so acquire only fails on shutdown
                let _permit = sem.acquire_owned().await.ok();
                (idx, router.generate(&prompt).await)
            });
        }

        let mut slots: Vec<Option<Result<LlmCompletion, LlmError>>> =
            jobs.iter().map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => warn!(error = %e, "LLM worker task failed"),
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(LlmError::TaskFailed("worker did not report a result".into()))
                })
            })
            .collect()
    }

    async fn dispatch_serial(&self, jobs: &[PromptJob]) -> Vec<Result<LlmCompletion, LlmError>> {
        let mut results = Vec::with_capacity(jobs.len());
        for (idx, job) in jobs.iter().enumerate() {
            if idx > 0 && !self.serial_delay.is_zero() {
                tokio::time::sleep(self.serial_delay).await;
            }
            results.push(self.router.generate(&job.prompt).await);
        }
        results
    }

    /// Resolve the input path for `job` and persist the prompt there.
    fn prepare_input(&mut self, job: &PromptJob) -> PathBuf {
        let input = match self.save_paths.get(&job.tag) {
            Some(paths) => paths.input.clone(),
            None => {
                let path = unique_path(&self.fallback_dir, "in", &job.tag);
                debug!("No save path registered for {}, using {}", job.tag, path.display());
                path
            }
        };
        if let Err(e) = artifact::write_text(&input, &job.prompt) {
            warn!("Could not persist prompt for {}: {}", job.tag, e);
        }
        input
    }

    fn output_path(&self, tag: &str) -> PathBuf {
        match self.save_paths.get(tag) {
            Some(paths) => paths.output.clone(),
            None => unique_path(&self.fallback_dir, "out", tag),
        }
    }

    /// Persist the output and append ledger rows for one finished call.
    fn record(
        &mut self,
        job: &PromptJob,
        input: &Path,
        result: Result<LlmCompletion, LlmError>,
    ) -> Result<String, LlmError> {
        let meta = format!("{}:{}", self.stage, job.tag);
        let input_tokens = count_tokens(&job.prompt);

        match result {
            Ok(completion) => {
                let output = self.output_path(&job.tag);
                if let Err(e) = artifact::write_text(&output, &completion.output) {
                    warn!("Could not persist output for {}: {}", job.tag, e);
                }

                let provider = completion.target.provider.to_string();
                let model = completion.target.model.clone();
                let output_tokens = count_tokens(&completion.output);
                for (direction, tokens, path) in [
                    (Direction::In, input_tokens, input.to_path_buf()),
                    (Direction::Out, output_tokens, output),
                ] {
                    let cost_usd = self.rates.cost_usd(&model, direction, tokens);
                    self.ledger.push(LedgerRow {
                        direction,
                        tag: job.tag.clone(),
                        meta: meta.clone(),
                        provider: provider.clone(),
                        model: model.clone(),
                        tokens,
                        cost_usd,
                        cost_local: round_local(cost_usd * self.exchange_rate),
                        save_path: path,
                        ok: true,
                    });
                }
                Ok(completion.output)
            }
            Err(e) => {
                let (provider, model) = self
                    .router
                    .primary()
                    .map(|t| (t.provider.to_string(), t.model.clone()))
                    .unwrap_or_default();
                for (direction, tokens) in [(Direction::In, input_tokens), (Direction::Out, 0)] {
                    self.ledger.push(LedgerRow {
                        direction,
                        tag: job.tag.clone(),
                        meta: meta.clone(),
                        provider: provider.clone(),
                        model: model.clone(),
                        tokens,
                        cost_usd: 0.0,
                        cost_local: 0.0,
                        save_path: input.to_path_buf(),
                        ok: false,
                    });
                }
                Err(e)
            }
        }
    }

    /// Write the stage ledger to the run's `df/` directory.
    pub fn flush(&self, store: &ArtifactStore) -> Result<(), ArtifactError> {
        store.write_ledger(self.stage.as_str(), &self.ledger)?;
        info!(
            "{} ledger: {} call(s), ${:.6}, {:.2} local",
            self.stage,
            self.ledger.input.len(),
            self.ledger.total_usd(),
            self.ledger.total_local()
        );
        Ok(())
    }
}

fn sentinel(e: &LlmError) -> String {
    format!("{ERROR_SENTINEL} {}", e.summary())
}

fn round_local(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `<dir>/<prefix>_<tag>.txt`, or the first free `<prefix>_<tag>_<n>.txt`.
fn unique_path(dir: &Path, prefix: &str, tag: &str) -> PathBuf {
    let safe: String = tag
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let candidate = dir.join(format!("{prefix}_{safe}.txt"));
    if !candidate.exists() {
        return candidate;
    }
    (1..)
        .map(|n| dir.join(format!("{prefix}_{safe}_{n}.txt")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
