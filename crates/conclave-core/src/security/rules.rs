//! Security rule table.
//!
//! Every pattern the scanner knows lives here, grouped by category. Adding
//! a rule is a data change: push a [`SecurityRule`] onto a [`RuleTable`]
//! and every scan that uses the table picks it up.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Family a rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    /// Instruction-override phrases and chat-template control tokens
    PromptInjection,
    /// Code execution primitives, destructive SQL, XSS vectors
    UnsafeCode,
    /// Personal data and credential shapes
    Pii,
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleCategory::PromptInjection => write!(f, "prompt_injection"),
            RuleCategory::UnsafeCode => write!(f, "unsafe_code"),
            RuleCategory::Pii => write!(f, "pii"),
        }
    }
}

/// A single named pattern.
#[derive(Debug, Clone)]
pub struct SecurityRule {
    /// Stable identifier reported in detections (e.g. "ignore_instructions")
    pub id: String,
    pub category: RuleCategory,
    pub pattern: Regex,
}

impl SecurityRule {
    pub fn new(id: impl Into<String>, category: RuleCategory, pattern: Regex) -> Self {
        Self {
            id: id.into(),
            category,
            pattern,
        }
    }

    /// Compile a rule from pattern source.
    pub fn compile(
        id: impl Into<String>,
        category: RuleCategory,
        pattern: &str,
    ) -> Result<Self, regex::Error> {
        Ok(Self::new(id, category, Regex::new(pattern)?))
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// Ordered collection of rules. Detection order follows table order.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<SecurityRule>,
}

impl RuleTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in rule set.
    pub fn builtin() -> Self {
        BUILTIN_RULES.clone()
    }

    /// Append a rule.
    pub fn push(&mut self, rule: SecurityRule) {
        self.rules.push(rule);
    }

    /// Builder-style append from pattern source.
    pub fn with_rule(
        mut self,
        id: impl Into<String>,
        category: RuleCategory,
        pattern: &str,
    ) -> Result<Self, regex::Error> {
        self.push(SecurityRule::compile(id, category, pattern)?);
        Ok(self)
    }

    /// Rules in one category, in table order.
    pub fn rules_for(&self, category: RuleCategory) -> impl Iterator<Item = &SecurityRule> {
        self.rules.iter().filter(move |r| r.category == category)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// =========================================================================
// BUILT-IN PATTERNS
// =========================================================================

const PROMPT_INJECTION_PATTERNS: &[(&str, &str)] = &[
    (
        "ignore_instructions",
        r"(?i)\bignore\s+(all\s+)?(the\s+)?(previous|prior|above|earlier|preceding)\s+(instructions|prompts|rules|directions)",
    ),
    (
        "disregard_instructions",
        r"(?i)\bdisregard\s+(all\s+)?(the\s+)?(previous|prior|above|your)\s+(instructions|rules|guidelines|prompts)",
    ),
    (
        "forget_instructions",
        r"(?i)\bforget\s+(everything|all|your)\s+(you\s+were\s+told|instructions|rules|previous)",
    ),
    ("role_override", r"(?i)\byou\s+are\s+now\s+(a|an|in|the)\b"),
    (
        "roleplay_override",
        r"(?i)\b(pretend\s+(that\s+)?you\s+are|pretend\s+to\s+be|act\s+as\s+if\s+you\s+(are|have)\s+no)\b",
    ),
    ("new_instructions", r"(?i)\bnew\s+instructions\s*:"),
    (
        "system_prompt_extraction",
        r"(?i)\b(reveal|print|show|repeat|output)\s+(me\s+)?(your|the)\s+(system\s+prompt|hidden\s+instructions|initial\s+instructions)",
    ),
    ("jailbreak", r"(?i)\b(jailbreak|DAN\s+mode|do\s+anything\s+now)\b"),
    (
        "control_token",
        r"(?i)(\[/?INST\]|<\|im_(start|end)\|>|<\|system\|>|<\|endoftext\|>|<</?SYS>>)",
    ),
];

const UNSAFE_CODE_PATTERNS: &[(&str, &str)] = &[
    ("eval_call", r"\beval\s*\("),
    ("exec_call", r"\bexec\s*\("),
    (
        "shell_invocation",
        r"(os\.system\s*\(|os\.popen\s*\(|subprocess\.(call|run|Popen|check_output)\s*\(|shell\s*=\s*True|\b(sh|bash|zsh)\s+-c\b|Runtime\.getRuntime\(\)\.exec)",
    ),
    (
        "child_process",
        r"(child_process|\bspawn\s*\(|\bexecSync\s*\(|\bexecFile\s*\(|Command::new\s*\(\s*.(sh|bash|cmd))",
    ),
    ("destructive_filesystem", r"\brm\s+-(rf|fr)\b"),
    (
        "destructive_sql",
        r"(?im)(\bDROP\s+(TABLE|DATABASE|SCHEMA)\b|\bTRUNCATE\s+(TABLE\s+)?\w+|\bDELETE\s+FROM\s+\w+\s*(;|$))",
    ),
    ("xss_script_tag", r"(?i)<\s*script\b"),
    ("xss_event_handler", r"(?i)\bon(error|load|click|mouseover|focus)\s*="),
    ("xss_javascript_uri", r"(?i)javascript\s*:"),
    ("xss_dom_sink", r"(\.innerHTML\s*=|document\.write\s*\()"),
];

const PII_PATTERNS: &[(&str, &str)] = &[
    // Email address (RFC 5322 simplified)
    ("email", r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}"),
    // XXX-XX-XXXX or XXXXXXXXX
    ("ssn", r"\b\d{3}[-\s]?\d{2}[-\s]?\d{4}\b"),
    // US phone with optional country code
    (
        "phone",
        r"(?:\+?1[-.\s]?)?(?:\([0-9]{3}\)|\b[0-9]{3})[-.\s]?[0-9]{3}[-.\s]?[0-9]{4}\b",
    ),
    ("credit_card", r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b"),
    (
        "api_key",
        r"\b(sk-(ant-)?[A-Za-z0-9_-]{20,}|ghp_[A-Za-z0-9]{36}|xox[baprs]-[A-Za-z0-9-]{10,}|AIza[0-9A-Za-z_-]{35})\b",
    ),
    (
        "secret_assignment",
        r#"(?i)(api[_-]?key|secret[_-]?key|access[_-]?token|auth[_-]?token|password|secret)[\s:=]+['"]?[a-zA-Z0-9_-]{16,}['"]?"#,
    ),
    // All AWS key prefixes (user, STS, role, ...)
    (
        "aws_key",
        r"\b(AKIA|ABIA|ACCA|AGPA|AIDA|AIPA|ANPA|ANVA|AROA|ASCA|ASIA)[A-Z0-9]{16}\b",
    ),
    ("bearer_token", r"(?i)\bbearer\s+[a-z0-9._~+/-]{20,}=*"),
];

fn compile_family(table: &mut RuleTable, category: RuleCategory, patterns: &[(&str, &str)]) {
    for (id, pattern) in patterns {
        table.push(SecurityRule::new(*id, category, Regex::new(pattern).unwrap()));
    }
}

lazy_static! {
    static ref BUILTIN_RULES: RuleTable = {
        let mut table = RuleTable::new();
        compile_family(&mut table, RuleCategory::PromptInjection, PROMPT_INJECTION_PATTERNS);
        compile_family(&mut table, RuleCategory::UnsafeCode, UNSAFE_CODE_PATTERNS);
        compile_family(&mut table, RuleCategory::Pii, PII_PATTERNS);
        table
    };
}
