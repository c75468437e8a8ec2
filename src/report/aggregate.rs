use std::path::Path;

use tracing::{debug, info, warn};

use crate::artifact::{self, ArtifactStore, CLASSIFIED_RESULT_FILE, MANUAL_REVIEW_FILE};
use crate::error::ArtifactError;
use crate::llm::is_error_sentinel;
use crate::report::{ClassifiedResult, GeneratedText, NotifyPayload};
use crate::snapshot::FileRecord;
use crate::strategy::ManualReviewEntry;

/// Commit messages quoted verbatim in the notification.
pub const MAX_NOTIFIED_COMMITS: usize = 5;

/// Collect every generated output, cost ledger and review entry of a run.
///
/// Missing or unreadable artifacts are logged and left out; only the final
/// write of `classified_result.json` can fail.
pub fn aggregate(store: &ArtifactStore, currency: &str) -> Result<ClassifiedResult, ArtifactError> {
    let files = match store.read_files() {
        Ok(files) => files,
        Err(e) => {
            warn!("No file records for run {}: {}", store.run_id(), e);
            Vec::new()
        }
    };

    let mut commits = Vec::new();
    let mut explanations = Vec::new();
    for file in &files {
        if let Some(text) = read_commit_message(&file.save_paths.message_out) {
            commits.push(generated(file, text));
        }
        if let Some(text) = read_output(&file.save_paths.explain_out) {
            explanations.push(generated(file, text));
        }
    }

    let ledger = store.read_ledgers();
    let review_files: Vec<ManualReviewEntry> = match store.read_json(MANUAL_REVIEW_FILE) {
        Ok(entries) => entries,
        Err(e) if e.is_missing() => Vec::new(),
        Err(e) => {
            warn!("Ignoring manual review list: {}", e);
            Vec::new()
        }
    };

    let notify = NotifyPayload {
        summary: format!(
            "{} of {} file(s) got a commit message, {} explanation(s) included.",
            commits.len(),
            files.len(),
            explanations.len()
        ),
        total_files: files.len(),
        commits: commits
            .iter()
            .take(MAX_NOTIFIED_COMMITS)
            .map(|c| c.text.clone())
            .collect(),
        currency: currency.to_string(),
        cost_total_usd: ledger.total_usd(),
        cost_total_local: ledger.total_local(),
        cost_breakdown: ledger.local_by_stage(),
        review_files,
    };

    let result = ClassifiedResult {
        run_id: store.run_id().to_string(),
        commits,
        explanations,
        notify,
    };
    store.write_json(CLASSIFIED_RESULT_FILE, &result, "classified result")?;
    info!("{} Saved {}", result.notify.summary, CLASSIFIED_RESULT_FILE);
    Ok(result)
}

/// A usable commit message from `path`: fences stripped, trimmed, never a failure sentinel.
pub fn read_commit_message(path: &Path) -> Option<String> {
    read_output(path).map(|text| unfence(&text).to_string())
}

/// Text inside a surrounding ``` block (language tag dropped), or the trimmed text.
fn unfence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```").and_then(|t| t.strip_suffix("```")) else {
        return trimmed;
    };
    match inner.split_once('\n') {
        Some((_lang, body)) => body.trim(),
        None => inner.trim(),
    }
}

fn read_output(path: &Path) -> Option<String> {
    match artifact::read_text(path) {
        Ok(text) if text.trim().is_empty() || is_error_sentinel(&text) => {
            debug!("No usable output in {}", path.display());
            None
        }
        Ok(text) => Some(text),
        Err(e) => {
            debug!("{}", e);
            None
        }
    }
}

fn generated(file: &FileRecord, text: String) -> GeneratedText {
    GeneratedText {
        id: file.id.clone(),
        path: file.path.clone(),
        text,
    }
}
