//! Explanation and commit-message generation.
//!
//! Both generators work on the files whose importance warrants a model call,
//! build one prompt per file from a shared [`context::FileContext`], and run
//! the batch through [`crate::llm::LlmManager::call_all`].

pub mod context;
pub mod explain;
pub mod message;
pub mod templates;

use tracing::{info, warn};

use crate::llm::LlmError;
use crate::snapshot::FileRecord;
use crate::strategy::StrategyRecord;

pub use context::{ContextBuilder, FileContext, keyword_lines, readme_summary, tier_content};
pub use explain::{build_explain_prompt, generate_explanations};
pub use message::{build_message_prompt, generate_commit_messages};
pub use templates::{TemplateKind, TemplateSet};

/// Per-file results of one generation stage, by file id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub generated: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
}

impl GenerationOutcome {
    fn collect(
        targets: &[(&FileRecord, &StrategyRecord)],
        results: Vec<Result<String, LlmError>>,
        skipped: Vec<String>,
    ) -> Self {
        let mut outcome = Self {
            skipped,
            ..Self::default()
        };
        for ((file, _), result) in targets.iter().zip(results) {
            match result {
                Ok(_) => outcome.generated.push(file.id.clone()),
                Err(_) => outcome.failed.push(file.id.clone()),
            }
        }
        outcome
    }

    /// Files a model call was made for.
    pub fn attempted(&self) -> usize {
        self.generated.len() + self.failed.len()
    }
}

/// Split strategies into generation targets and skipped ids.
///
/// Files at or below the importance threshold (or never scored) are skipped,
/// as are strategies without a metadata record.
fn select_targets<'a, 's>(
    builder: &ContextBuilder<'a>,
    strategies: &'s [StrategyRecord],
) -> (Vec<(&'a FileRecord, &'s StrategyRecord)>, Vec<String>) {
    let mut targets = Vec::new();
    let mut skipped = Vec::new();

    for strategy in strategies {
        if !strategy.warrants_generation() {
            info!(
                "skipping low-importance file {} (importance {})",
                strategy.path,
                strategy.importance.map_or_else(|| "unscored".to_string(), |i| i.to_string())
            );
            skipped.push(strategy.id.clone());
            continue;
        }
        match builder.file(&strategy.id) {
            Some(file) => targets.push((file, strategy)),
            None => {
                warn!("No metadata record for {} ({}); skipping", strategy.path, strategy.id);
                skipped.push(strategy.id.clone());
            }
        }
    }

    (targets, skipped)
}
