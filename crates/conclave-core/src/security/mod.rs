//! Security scanning: a rule table plus shallow and deep scans.

pub mod rules;
pub mod scanner;

pub use rules::{RuleCategory, RuleTable, SecurityRule};
pub use scanner::{
    check_pii_patterns, check_prompt_injection, check_unsafe_code, run_deep_security_checks,
    run_security_checks, Detection, SecurityOptions, SecurityReport, SecurityScanner,
    DEFAULT_MAX_DEPTH,
};
