//! Core types for Conclave invocations.
//!
//! Wire names are camelCase: these structs are what the model is asked to
//! produce and what callers receive back as JSON.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How many independent generation paths to run and vote over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyMode {
    /// Single generation, no voting.
    None,
    /// Two paths.
    #[default]
    Fast,
    /// Three or more paths.
    Robust,
}

/// Minimum number of paths for [`ConsistencyMode::Robust`].
pub const ROBUST_MIN_PATHS: usize = 3;

impl ConsistencyMode {
    /// Number of generation paths for this mode.
    ///
    /// `robust_paths` only applies to `Robust`, and is raised to
    /// [`ROBUST_MIN_PATHS`] when lower.
    pub fn path_count(self, robust_paths: usize) -> usize {
        match self {
            ConsistencyMode::None => 1,
            ConsistencyMode::Fast => 2,
            ConsistencyMode::Robust => robust_paths.max(ROBUST_MIN_PATHS),
        }
    }
}

impl fmt::Display for ConsistencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyMode::None => write!(f, "none"),
            ConsistencyMode::Fast => write!(f, "fast"),
            ConsistencyMode::Robust => write!(f, "robust"),
        }
    }
}

impl FromStr for ConsistencyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(ConsistencyMode::None),
            "fast" => Ok(ConsistencyMode::Fast),
            "robust" => Ok(ConsistencyMode::Robust),
            other => Err(format!(
                "unknown consistency mode '{}': expected none, fast or robust",
                other
            )),
        }
    }
}

/// Strictness tier for structural response checks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    Low,
    #[default]
    Medium,
    High,
    Strict,
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationLevel::Low => write!(f, "low"),
            ValidationLevel::Medium => write!(f, "medium"),
            ValidationLevel::High => write!(f, "high"),
            ValidationLevel::Strict => write!(f, "strict"),
        }
    }
}

impl FromStr for ValidationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(ValidationLevel::Low),
            "medium" => Ok(ValidationLevel::Medium),
            "high" => Ok(ValidationLevel::High),
            "strict" => Ok(ValidationLevel::Strict),
            other => Err(format!(
                "unknown validation level '{}': expected low, medium, high or strict",
                other
            )),
        }
    }
}

/// Per-invocation configuration. Never mutated while a run is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    pub consistency: ConsistencyMode,

    /// Path count for `robust` mode (floor of 3)
    pub robust_paths: usize,

    pub validation_level: ValidationLevel,

    /// Run the critic pass on the selected answer
    pub self_critique: bool,

    /// Ask the philosopher persona to assess the final answer
    pub meta_evaluation: bool,

    /// Ask the secondary provider for an independent rating
    pub second_opinion: bool,

    /// Maximum tokens per model call
    pub max_tokens: u32,

    pub temperature: f32,

    /// Model override for this invocation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            consistency: ConsistencyMode::Fast,
            robust_paths: ROBUST_MIN_PATHS,
            validation_level: ValidationLevel::Medium,
            self_critique: false,
            meta_evaluation: false,
            second_opinion: false,
            max_tokens: 2048,
            temperature: 0.7,
            model: None,
        }
    }
}

impl AgentConfig {
    /// Check limits before any model call is made.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_tokens == 0 {
            return Err("maxTokens must be greater than 0".to_string());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!(
                "temperature {} out of range [0, 2]",
                self.temperature
            ));
        }
        Ok(())
    }

    /// Number of generation paths this config asks for.
    pub fn path_count(&self) -> usize {
        self.consistency.path_count(self.robust_paths)
    }
}

/// One visible step of chain-of-thought.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub step: u32,
    pub thought: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
}

/// Pass/fail lists of named checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validations {
    #[serde(default)]
    pub passed: Vec<String>,
    #[serde(default)]
    pub failed: Vec<String>,
}

/// The parsed output of one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub recommendation: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Vec<ReasoningStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternatives: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_output: Option<String>,
    #[serde(default)]
    pub validations: Validations,
}

/// Confidence used when the model omits it or reports nonsense.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

impl AgentResponse {
    /// Unstructured response wrapping raw model text.
    pub fn unstructured(text: impl Into<String>) -> Self {
        Self {
            recommendation: text.into(),
            confidence: DEFAULT_CONFIDENCE,
            reasoning: Vec::new(),
            alternatives: None,
            warnings: None,
            code_output: None,
            validations: Validations::default(),
        }
    }

    pub fn alternatives(&self) -> &[String] {
        self.alternatives.as_deref().unwrap_or(&[])
    }

    pub fn warnings(&self) -> &[String] {
        self.warnings.as_deref().unwrap_or(&[])
    }
}

/// One candidate produced by the self-consistency engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyPath {
    pub steps: Vec<ReasoningStep>,
    pub conclusion: String,
    pub confidence: f64,
}

impl From<&AgentResponse> for ConsistencyPath {
    fn from(response: &AgentResponse) -> Self {
        Self {
            steps: response.reasoning.clone(),
            conclusion: response.recommendation.clone(),
            confidence: response.confidence,
        }
    }
}

/// Cost axis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostMetrics {
    pub tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// USD, rounded to 4 decimals
    pub estimated_cost: f64,
}

/// Latency axis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyMetrics {
    pub total_ms: u64,
    pub per_step_ms: Vec<u64>,
}

/// Accuracy axis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccuracyMetrics {
    pub task_success_rate: f64,
    pub validations_passed: usize,
    pub validations_failed: usize,
}

/// Security axis.
///
/// Both flags name the *absence* of a problem: `prompt_injection_blocked`
/// is true when no injection pattern was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityMetrics {
    pub prompt_injection_blocked: bool,
    pub safe_code_generated: bool,
}

/// Stability axis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StabilityMetrics {
    pub consistency_score: f64,
    pub hallucination_detected: bool,
    pub paths_evaluated: usize,
}

/// Cost, Latency, Accuracy, Security, Stability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassicMetrics {
    pub cost: CostMetrics,
    pub latency: LatencyMetrics,
    pub accuracy: AccuracyMetrics,
    pub security: SecurityMetrics,
    pub stability: StabilityMetrics,
}
