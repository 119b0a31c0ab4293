//! Structural checks on a parsed response.
//!
//! Each check contributes exactly one label to either `passed` or `failed`.
//! Higher levels add checks on top of the base set; they never remove any.

use serde::{Deserialize, Serialize};

use crate::types::{AgentResponse, ValidationLevel};

pub const CHECK_HAS_REASONING: &str = "reasoning: at least 1 step";
pub const CHECK_CONFIDENCE_RANGE: &str = "confidence: within [0, 1]";
pub const CHECK_RECOMMENDATION_LENGTH: &str = "recommendation: more than 10 characters";
pub const CHECK_REASONING_DEPTH: &str = "reasoning depth: at least 3 steps";
pub const CHECK_ALTERNATIVES: &str = "alternatives: at least 1 considered";
pub const CHECK_RISK_ANALYSIS: &str = "risk analysis: at least 1 warning";

const MIN_RECOMMENDATION_CHARS: usize = 10;
const MIN_DEEP_REASONING_STEPS: usize = 3;

/// Outcome of [`validate_response`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: Vec<String>,
    pub failed: Vec<String>,
}

impl ValidationReport {
    fn record(&mut self, label: &str, ok: bool) {
        if ok {
            self.passed.push(label.to_string());
        } else {
            self.failed.push(label.to_string());
        }
    }

    /// Fraction of checks that passed.
    pub fn score(&self) -> f64 {
        task_success_rate(self.passed.len(), self.failed.len())
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.passed.len() + self.failed.len()
    }
}

/// `passed / (passed + failed)`, 0.0 when nothing was checked.
pub fn task_success_rate(passed: usize, failed: usize) -> f64 {
    let total = passed + failed;
    if total == 0 {
        0.0
    } else {
        passed as f64 / total as f64
    }
}

/// Run the checks for `level` against `response`.
pub fn validate_response(response: &AgentResponse, level: ValidationLevel) -> ValidationReport {
    let mut report = ValidationReport::default();

    report.record(CHECK_HAS_REASONING, !response.reasoning.is_empty());
    report.record(
        CHECK_CONFIDENCE_RANGE,
        (0.0..=1.0).contains(&response.confidence),
    );
    report.record(
        CHECK_RECOMMENDATION_LENGTH,
        response.recommendation.trim().chars().count() > MIN_RECOMMENDATION_CHARS,
    );

    if level >= ValidationLevel::High {
        report.record(
            CHECK_REASONING_DEPTH,
            response.reasoning.len() >= MIN_DEEP_REASONING_STEPS,
        );
        report.record(CHECK_ALTERNATIVES, !response.alternatives().is_empty());
    }

    if level == ValidationLevel::Strict {
        report.record(CHECK_RISK_ANALYSIS, !response.warnings().is_empty());
    }

    tracing::debug!(
        level = %level,
        passed = report.passed.len(),
        failed = report.failed.len(),
        "Validated response"
    );

    report
}
