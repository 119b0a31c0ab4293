//! CLASSic metrics for one invocation.
//!
//! Everything here is a pure function of its inputs. The only clock read is
//! the elapsed time since `started`.

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::security::{check_prompt_injection, check_unsafe_code};
use crate::types::{
    AccuracyMetrics, AgentResponse, ClassicMetrics, CostMetrics, LatencyMetrics, SecurityMetrics,
    StabilityMetrics, ValidationLevel,
};
use crate::validation::validate_response;

/// USD per 1K tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostRates {
    pub per_k_input: f64,
    pub per_k_output: f64,
}

impl Default for CostRates {
    fn default() -> Self {
        Self {
            per_k_input: 0.03,
            per_k_output: 0.06,
        }
    }
}

impl CostRates {
    /// Rates for a model id. Unknown models get the default rates.
    pub fn for_model(model: &str) -> Self {
        let (per_k_input, per_k_output) = match model {
            m if m.contains("opus") => (0.015, 0.075),
            m if m.contains("sonnet") => (0.003, 0.015),
            m if m.contains("haiku") => (0.0008, 0.004),
            m if m.contains("gpt-4o-mini") => (0.00015, 0.0006),
            m if m.contains("gpt-4o") => (0.0025, 0.01),
            m if m.contains("gpt-4-turbo") => (0.01, 0.03),
            _ => return Self::default(),
        };
        Self {
            per_k_input,
            per_k_output,
        }
    }
}

/// Phrases that suggest the model answered about itself instead of the task.
const HALLUCINATION_MARKERS: &[&str] = &[
    "as of my last update",
    "as of my knowledge cutoff",
    "my training data",
    "my training cutoff",
    "i don't have access to real-time",
    "i do not have access to real-time",
    "i cannot browse",
    "i can't browse",
    "i am unable to browse",
    "i don't have the ability to access",
    "as an ai language model",
];

/// Case-insensitive check against [`HALLUCINATION_MARKERS`].
pub fn detect_hallucination(text: &str) -> bool {
    let lowered = text.to_lowercase();
    HALLUCINATION_MARKERS.iter().any(|m| lowered.contains(m))
}

fn round_cost(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Everything the evaluator needs about one finished run.
#[derive(Debug, Clone)]
pub struct EvaluationInput<'a> {
    pub started: Instant,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub response: &'a AgentResponse,
    pub consensus_score: f64,
    pub paths_evaluated: usize,
    pub per_step_ms: Vec<u64>,
    pub validation_level: ValidationLevel,
}

#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    rates: CostRates,
}

impl Evaluator {
    pub fn new(rates: CostRates) -> Self {
        Self { rates }
    }

    pub fn rates(&self) -> CostRates {
        self.rates
    }

    /// `in/1000 * rate_in + out/1000 * rate_out`, rounded to 4 decimals.
    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input = input_tokens as f64 / 1000.0 * self.rates.per_k_input;
        let output = output_tokens as f64 / 1000.0 * self.rates.per_k_output;
        round_cost(input + output)
    }

    pub fn evaluate(&self, input: EvaluationInput<'_>) -> ClassicMetrics {
        let response = input.response;
        let validation = validate_response(response, input.validation_level);

        // Serialization of a plain struct cannot fail; fall back to the recommendation anyway.
        let serialized = serde_json::to_string(response)
            .unwrap_or_else(|_| response.recommendation.clone());

        let safe_code_generated = match &response.code_output {
            Some(code) => !check_unsafe_code(code).detected,
            None => true,
        };

        ClassicMetrics {
            cost: CostMetrics {
                tokens: input.input_tokens + input.output_tokens,
                input_tokens: input.input_tokens,
                output_tokens: input.output_tokens,
                estimated_cost: self.calculate_cost(input.input_tokens, input.output_tokens),
            },
            latency: LatencyMetrics {
                total_ms: input.started.elapsed().as_millis() as u64,
                per_step_ms: input.per_step_ms,
            },
            accuracy: AccuracyMetrics {
                task_success_rate: validation.score(),
                validations_passed: validation.passed.len(),
                validations_failed: validation.failed.len(),
            },
            security: SecurityMetrics {
                prompt_injection_blocked: !check_prompt_injection(&serialized).detected,
                safe_code_generated,
            },
            stability: StabilityMetrics {
                consistency_score: input.consensus_score,
                hallucination_detected: detect_hallucination(&response.recommendation),
                paths_evaluated: input.paths_evaluated,
            },
        }
    }
}
