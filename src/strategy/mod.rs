//! Per-file processing strategy.
//!
//! A [`StrategyRecord`] is created locally from the file's metadata (tier,
//! commit window, README policy) and then enriched by the model-assisted
//! predictor (importance, component type, related files).

pub mod predict;
pub mod tier;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::snapshot::FileRecord;

pub use predict::{MAX_FILES, StrategyPrediction, chunk_count, predict_strategies, split_chunks};
pub use tier::{ReadmeMode, ReadmePolicy, Tier, classify_tier, commit_window};

/// Files at or below this importance get no explanation or commit message.
pub const SKIP_IMPORTANCE: u8 = 3;
/// Files at or above this importance are flagged for manual review.
pub const REVIEW_IMPORTANCE: u8 = 9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub id: String,
    pub path: String,
    pub tier: Tier,
    /// How many recent commit subjects to put in prompts (3-5).
    pub commit_window: usize,
    pub readme: ReadmePolicy,
    pub detail_level: Option<u8>,
    /// Suggested commit-message length in tokens.
    pub recommended_length: Option<u32>,
    pub component_type: Option<String>,
    /// 0-10; `None` until predicted.
    pub importance: Option<u8>,
    /// Ids of up to three other changed files.
    pub related: Vec<String>,
}

impl StrategyRecord {
    /// Locally derived strategy for `file`, before model enrichment.
    pub fn initial(file: &FileRecord, readme: ReadmePolicy, now: DateTime<Utc>) -> Self {
        Self {
            id: file.id.clone(),
            path: file.path.clone(),
            tier: classify_tier(file.file_tokens, file.diff_tokens),
            commit_window: commit_window(&file.recent_dates, now),
            readme,
            detail_level: None,
            recommended_length: None,
            component_type: None,
            importance: None,
            related: Vec::new(),
        }
    }

    /// Whether the file warrants explanation and commit-message generation.
    pub fn warrants_generation(&self) -> bool {
        self.importance.is_some_and(|i| i > SKIP_IMPORTANCE)
    }

    pub fn needs_manual_review(&self) -> bool {
        self.importance.is_some_and(|i| i >= REVIEW_IMPORTANCE)
    }
}

/// Entry of `manual_review.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualReviewEntry {
    pub id: String,
    pub path: String,
    pub importance: u8,
}

/// Initial strategy records for every file.
pub fn initial_strategies(
    files: &[FileRecord],
    readme: ReadmePolicy,
    now: DateTime<Utc>,
) -> Vec<StrategyRecord> {
    files
        .iter()
        .map(|file| StrategyRecord::initial(file, readme, now))
        .collect()
}

/// Re-derive each tier from its file record and list the files needing manual review.
///
/// Strategies whose id has no file record keep their tier.
pub fn classify(files: &[FileRecord], strategies: &mut [StrategyRecord]) -> Vec<ManualReviewEntry> {
    let by_id: HashMap<&str, &FileRecord> = files.iter().map(|f| (f.id.as_str(), f)).collect();

    for strategy in strategies.iter_mut() {
        if let Some(file) = by_id.get(strategy.id.as_str()) {
            strategy.tier = classify_tier(file.file_tokens, file.diff_tokens);
        }
    }

    strategies
        .iter()
        .filter(|s| s.needs_manual_review())
        .filter_map(|s| {
            s.importance.map(|importance| ManualReviewEntry {
                id: s.id.clone(),
                path: s.path.clone(),
                importance,
            })
        })
        .collect()
}
