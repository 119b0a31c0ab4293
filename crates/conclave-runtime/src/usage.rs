//! Cumulative usage across invocations of one orchestrator.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Totals for one persona.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmUsage {
    pub invocations: u32,
    pub failures: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// USD, as computed by the evaluator
    pub estimated_cost: f64,
}

impl LlmUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    fn merge(&mut self, other: &LlmUsage) {
        self.invocations += other.invocations;
        self.failures += other.failures;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.estimated_cost += other.estimated_cost;
    }
}

/// Per-persona usage, ordered by persona name.
#[derive(Debug, Default)]
pub struct UsageLedger {
    by_agent: RwLock<BTreeMap<String, LlmUsage>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, agent: &str, input_tokens: u64, output_tokens: u64, cost: f64) {
        let mut by_agent = self.by_agent.write();
        let entry = by_agent.entry(agent.to_string()).or_default();
        entry.invocations += 1;
        entry.input_tokens += input_tokens;
        entry.output_tokens += output_tokens;
        entry.estimated_cost += cost;
    }

    pub fn record_failure(&self, agent: &str) {
        let mut by_agent = self.by_agent.write();
        let entry = by_agent.entry(agent.to_string()).or_default();
        entry.invocations += 1;
        entry.failures += 1;
    }

    pub fn for_agent(&self, agent: &str) -> LlmUsage {
        self.by_agent.read().get(agent).cloned().unwrap_or_default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, LlmUsage> {
        self.by_agent.read().clone()
    }

    pub fn total(&self) -> LlmUsage {
        let mut total = LlmUsage::default();
        for usage in self.by_agent.read().values() {
            total.merge(usage);
        }
        total
    }

    pub fn reset(&self) {
        self.by_agent.write().clear();
    }
}
