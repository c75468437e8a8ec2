//! In-memory cost ledgers flushed to the artifact store at stage end.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Whether a row accounts for prompt tokens or completion tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

/// One accounted model call direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub direction: Direction,
    /// Logical task id the call was made for.
    pub tag: String,
    /// `"<stage>:<tag>"`, grouped by stage when aggregating.
    pub meta: String,
    pub provider: String,
    pub model: String,
    pub tokens: usize,
    pub cost_usd: f64,
    pub cost_local: f64,
    pub save_path: PathBuf,
    /// False when the call failed and no completion exists.
    pub ok: bool,
}

impl LedgerRow {
    /// Stage name taken from the `meta` prefix.
    pub fn stage(&self) -> &str {
        self.meta.split(':').next().unwrap_or(&self.meta)
    }
}

/// Input and output rows recorded by one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostLedger {
    pub input: Vec<LedgerRow>,
    pub output: Vec<LedgerRow>,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: LedgerRow) {
        match row.direction {
            Direction::In => self.input.push(row),
            Direction::Out => self.output.push(row),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty() && self.output.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &LedgerRow> {
        self.input.iter().chain(self.output.iter())
    }

    pub fn total_usd(&self) -> f64 {
        self.rows().map(|r| r.cost_usd).sum()
    }

    pub fn total_local(&self) -> f64 {
        self.rows().map(|r| r.cost_local).sum()
    }

    /// Local-currency cost summed per stage.
    pub fn local_by_stage(&self) -> BTreeMap<String, f64> {
        let mut by_stage = BTreeMap::new();
        for row in self.rows() {
            *by_stage.entry(row.stage().to_string()).or_insert(0.0) += row.cost_local;
        }
        by_stage
    }

    pub fn merge(&mut self, other: CostLedger) {
        self.input.extend(other.input);
        self.output.extend(other.output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(direction: Direction, meta: &str, cost_local: f64) -> LedgerRow {
        LedgerRow {
            direction,
            tag: "f1".into(),
            meta: meta.into(),
            provider: "openai".into(),
            model: "gpt-4o".into(),
            tokens: 10,
            cost_usd: cost_local / 1000.0,
            cost_local,
            save_path: PathBuf::from("x.txt"),
            ok: true,
        }
    }

    #[test]
    fn push_routes_rows_by_direction() {
        let mut ledger = CostLedger::new();
        ledger.push(row(Direction::In, "explain:f1", 1.0));
        ledger.push(row(Direction::Out, "explain:f1", 2.0));
        ledger.push(row(Direction::Out, "explain:f2", 2.0));
        assert_eq!(ledger.input.len(), 1);
        assert_eq!(ledger.output.len(), 2);
        assert_eq!(ledger.total_local(), 5.0);
    }

    #[test]
    fn local_by_stage_groups_on_meta_prefix() {
        let mut ledger = CostLedger::new();
        ledger.push(row(Direction::In, "explain:a", 1.5));
        ledger.push(row(Direction::Out, "explain:b", 2.5));
        ledger.push(row(Direction::In, "commit_message:a", 4.0));
        let by_stage = ledger.local_by_stage();
        assert_eq!(by_stage["explain"], 4.0);
        assert_eq!(by_stage["commit_message"], 4.0);
    }

    #[test]
    fn stage_without_separator_is_whole_meta() {
        assert_eq!(row(Direction::In, "strategy", 0.0).stage(), "strategy");
    }
}
