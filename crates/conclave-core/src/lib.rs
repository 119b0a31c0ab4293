//! # conclave-core
//!
//! Deterministic building blocks for Conclave persona invocations.
//!
//! This crate turns raw model text into checked, measured results:
//! - parse a reply into an [`AgentResponse`]
//! - vote over several independent replies
//! - run structural checks and security scans
//! - compute CLASSic metrics (Cost, Latency, Accuracy, Security, Stability)
//!
//! ## Key Guarantees
//!
//! 1. **No I/O**: model calls live in `conclave-runtime`
//! 2. **Parsing never fails**: malformed replies degrade to raw text
//! 3. **Traceable**: every security finding names the rule that fired
//!
//! ## Example
//!
//! ```rust
//! use conclave_core::{parse_response, validate_response, ValidationLevel};
//!
//! let response = parse_response(r#"{"recommendation": "Add an index on user_id", "confidence": 0.8}"#);
//! let report = validate_response(&response, ValidationLevel::Medium);
//! assert_eq!(report.failed, vec!["reasoning: at least 1 step".to_string()]);
//! ```

pub mod evaluator;
pub mod response;
pub mod security;
pub mod types;
pub mod validation;
pub mod voting;

pub use evaluator::{detect_hallucination, CostRates, EvaluationInput, Evaluator};
pub use response::{extract_json, parse_response, try_parse_structured, validate_response_schema};
pub use security::{
    check_pii_patterns, check_prompt_injection, check_unsafe_code, run_deep_security_checks,
    run_security_checks, Detection, RuleCategory, RuleTable, SecurityOptions, SecurityReport,
    SecurityRule, SecurityScanner,
};
pub use types::{
    AccuracyMetrics, AgentConfig, AgentResponse, ClassicMetrics, ConsistencyMode, ConsistencyPath,
    CostMetrics, LatencyMetrics, ReasoningStep, SecurityMetrics, StabilityMetrics,
    ValidationLevel, Validations, DEFAULT_CONFIDENCE,
};
pub use validation::{task_success_rate, validate_response, ValidationReport};
pub use voting::{normalize_conclusion, vote, VoteOutcome};
