//! Per-model USD rates and cost computation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cost::ledger::Direction;

/// USD price per 1K tokens for each direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRate {
    pub input: f64,
    pub output: f64,
}

impl ModelRate {
    pub fn for_direction(&self, direction: Direction) -> f64 {
        match direction {
            Direction::In => self.input,
            Direction::Out => self.output,
        }
    }
}

/// Lookup table from model name to [`ModelRate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateTable(BTreeMap<String, ModelRate>);

impl Default for RateTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RateTable {
    pub fn builtin() -> Self {
        let mut rates = BTreeMap::new();
        rates.insert(
            "gpt-4o".to_string(),
            ModelRate {
                input: 0.0025,
                output: 0.01,
            },
        );
        rates.insert(
            "llama4-maverick-instruct-basic".to_string(),
            ModelRate {
                input: 0.00022,
                output: 0.00088,
            },
        );
        rates.insert(
            "llama4-scout-instruct-basic".to_string(),
            ModelRate {
                input: 0.00015,
                output: 0.0006,
            },
        );
        Self(rates)
    }

    /// Add built-in rates for models the user table does not mention.
    pub fn with_builtin_defaults(mut self) -> Self {
        for (model, rate) in Self::builtin().0 {
            self.0.entry(model).or_insert(rate);
        }
        self
    }

    /// Rate for `model`, matching either the full name or its last path segment.
    pub fn lookup(&self, model: &str) -> Option<ModelRate> {
        if let Some(rate) = self.0.get(model) {
            return Some(*rate);
        }
        let short = model.rsplit('/').next().unwrap_or(model);
        self.0.get(short).copied()
    }

    /// USD cost of `tokens` in `direction`; unknown models cost zero.
    pub fn cost_usd(&self, model: &str, direction: Direction, tokens: usize) -> f64 {
        match self.lookup(model) {
            Some(rate) => compute_cost(tokens, rate.for_direction(direction)),
            None => {
                warn!("No rate configured for model '{}', recording zero cost", model);
                0.0
            }
        }
    }
}

/// `tokens × rate_per_1k / 1000`, rounded to six decimals.
pub fn compute_cost(tokens: usize, rate_per_1k: f64) -> f64 {
    let raw = tokens as f64 * rate_per_1k / 1000.0;
    (raw * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_cost_rounds_to_six_decimals() {
        assert_eq!(compute_cost(1000, 0.0025), 0.0025);
        assert_eq!(compute_cost(1234, 0.00015), 0.000185);
        assert_eq!(compute_cost(0, 0.01), 0.0);
    }

    #[test]
    fn builtin_rates_cover_default_models() {
        let table = RateTable::builtin();
        assert_eq!(table.lookup("gpt-4o").unwrap().output, 0.01);
        assert_eq!(
            table.lookup("llama4-scout-instruct-basic").unwrap().input,
            0.00015
        );
    }

    #[test]
    fn lookup_accepts_fully_qualified_fireworks_names() {
        let table = RateTable::builtin();
        let rate = table
            .lookup("accounts/fireworks/models/llama4-maverick-instruct-basic")
            .unwrap();
        assert_eq!(rate.input, 0.00022);
    }

    #[test]
    fn unknown_model_costs_nothing() {
        let table = RateTable::builtin();
        assert_eq!(table.cost_usd("mystery-model", Direction::Out, 5000), 0.0);
    }

    #[test]
    fn user_rates_override_and_keep_builtins() {
        let yaml = "gpt-4o: {input: 0.005, output: 0.02}\nlocal: {input: 0.0, output: 0.0}";
        let user: RateTable = serde_yaml::from_str(yaml).unwrap();
        let table = user.with_builtin_defaults();
        assert_eq!(table.lookup("gpt-4o").unwrap().input, 0.005);
        assert!(table.lookup("local").is_some());
        assert!(table.lookup("llama4-scout-instruct-basic").is_some());
    }

    #[test]
    fn cost_usd_uses_direction() {
        let table = RateTable::builtin();
        assert_eq!(table.cost_usd("gpt-4o", Direction::In, 2000), 0.005);
        assert_eq!(table.cost_usd("gpt-4o", Direction::Out, 2000), 0.02);
    }
}
