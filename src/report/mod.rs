//! Result classification: everything a run produced, gathered into one payload.

pub mod aggregate;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::strategy::ManualReviewEntry;

pub use aggregate::{MAX_NOTIFIED_COMMITS, aggregate, read_commit_message};

/// A generated text keyed by file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedText {
    pub id: String,
    pub path: String,
    pub text: String,
}

/// The notification-ready part of a run summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NotifyPayload {
    pub summary: String,
    pub total_files: usize,
    /// Up to [`MAX_NOTIFIED_COMMITS`] commit messages, verbatim.
    pub commits: Vec<String>,
    pub currency: String,
    pub cost_total_usd: f64,
    pub cost_total_local: f64,
    /// Local-currency cost per stage name.
    pub cost_breakdown: BTreeMap<String, f64>,
    pub review_files: Vec<ManualReviewEntry>,
}

impl NotifyPayload {
    /// `"12.34 KRW ($0.0088)"`.
    pub fn cost_line(&self) -> String {
        format!("{:.2} {} (${:.4})", self.cost_total_local, self.currency, self.cost_total_usd)
    }

    /// `"explain: 1.20, commit_message: 0.80"`.
    pub fn breakdown_line(&self) -> String {
        self.cost_breakdown
            .iter()
            .map(|(stage, cost)| format!("{stage}: {cost:.2}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Contents of `classified_result.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClassifiedResult {
    pub run_id: String,
    pub commits: Vec<GeneratedText>,
    pub explanations: Vec<GeneratedText>,
    pub notify: NotifyPayload,
}

impl ClassifiedResult {
    pub fn commit_for(&self, id: &str) -> Option<&str> {
        self.commits.iter().find(|c| c.id == id).map(|c| c.text.as_str())
    }
}
