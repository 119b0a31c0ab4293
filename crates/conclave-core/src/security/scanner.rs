//! Pattern scans over text and JSON values.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::rules::{RuleCategory, RuleTable};

/// Default recursion limit for deep scans.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Result of one category scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub detected: bool,
    /// Ids of the rules that fired, in table order, without duplicates
    pub patterns: Vec<String>,
}

impl Detection {
    fn absorb(&mut self, other: Detection) {
        for id in other.patterns {
            if !self.patterns.contains(&id) {
                self.patterns.push(id);
            }
        }
        self.detected = !self.patterns.is_empty();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityOptions {
    /// Mark the report blocked when a finding in `block_categories` is found
    pub block_on_detection: bool,
    /// Families that can block. PII is ignored here; it only ever reports.
    pub block_categories: Vec<RuleCategory>,
    pub check_pii: bool,
    /// Deep scans stop descending past this depth
    pub max_depth: usize,
}

impl Default for SecurityOptions {
    fn default() -> Self {
        Self {
            block_on_detection: true,
            block_categories: vec![RuleCategory::PromptInjection, RuleCategory::UnsafeCode],
            check_pii: true,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl SecurityOptions {
    /// Block on injection only; unsafe code and PII are reported.
    pub fn injection_only() -> Self {
        Self {
            block_categories: vec![RuleCategory::PromptInjection],
            ..Self::default()
        }
    }

    /// Report everything, block nothing.
    pub fn report_only() -> Self {
        Self {
            block_on_detection: false,
            ..Self::default()
        }
    }

    pub fn blocks(&self, category: RuleCategory) -> bool {
        self.block_on_detection
            && category != RuleCategory::Pii
            && self.block_categories.contains(&category)
    }
}

/// Combined result of a shallow or deep scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityReport {
    pub prompt_injection: Detection,
    pub unsafe_code: Detection,
    pub pii: Detection,
    pub blocked: bool,
    /// JSON pointers of the leaves (or keys) that matched; deep scans only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flagged_paths: Vec<String>,
}

impl SecurityReport {
    /// True when any category fired, including PII.
    pub fn has_findings(&self) -> bool {
        self.prompt_injection.detected || self.unsafe_code.detected || self.pii.detected
    }

    /// Ids of the findings that block under `options`.
    pub fn blocking_patterns(&self, options: &SecurityOptions) -> Vec<String> {
        let mut patterns = Vec::new();
        if options.blocks(RuleCategory::PromptInjection) {
            patterns.extend(self.prompt_injection.patterns.iter().cloned());
        }
        if options.blocks(RuleCategory::UnsafeCode) {
            patterns.extend(self.unsafe_code.patterns.iter().cloned());
        }
        patterns
    }

    fn absorb(&mut self, other: SecurityReport) {
        self.prompt_injection.absorb(other.prompt_injection);
        self.unsafe_code.absorb(other.unsafe_code);
        self.pii.absorb(other.pii);
    }

    fn finish(mut self, options: &SecurityOptions) -> Self {
        self.blocked = !self.blocking_patterns(options).is_empty();
        self
    }
}

/// Scanner bound to a rule table.
#[derive(Debug, Clone)]
pub struct SecurityScanner {
    rules: RuleTable,
}

impl Default for SecurityScanner {
    fn default() -> Self {
        Self::new(RuleTable::builtin())
    }
}

impl SecurityScanner {
    pub fn new(rules: RuleTable) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn check(&self, category: RuleCategory, text: &str) -> Detection {
        let patterns: Vec<String> = self
            .rules
            .rules_for(category)
            .filter(|rule| rule.is_match(text))
            .map(|rule| rule.id.clone())
            .collect();

        Detection {
            detected: !patterns.is_empty(),
            patterns,
        }
    }

    pub fn check_prompt_injection(&self, text: &str) -> Detection {
        self.check(RuleCategory::PromptInjection, text)
    }

    pub fn check_unsafe_code(&self, text: &str) -> Detection {
        self.check(RuleCategory::UnsafeCode, text)
    }

    pub fn check_pii_patterns(&self, text: &str) -> Detection {
        self.check(RuleCategory::Pii, text)
    }

    fn scan_text(&self, text: &str, options: &SecurityOptions) -> SecurityReport {
        SecurityReport {
            prompt_injection: self.check_prompt_injection(text),
            unsafe_code: self.check_unsafe_code(text),
            pii: if options.check_pii {
                self.check_pii_patterns(text)
            } else {
                Detection::default()
            },
            blocked: false,
            flagged_paths: Vec::new(),
        }
    }

    /// Scan one string.
    pub fn run_security_checks(&self, text: &str, options: &SecurityOptions) -> SecurityReport {
        let report = self.scan_text(text, options).finish(options);
        if report.has_findings() {
            tracing::debug!(
                injection = ?report.prompt_injection.patterns,
                unsafe_code = ?report.unsafe_code.patterns,
                pii = ?report.pii.patterns,
                blocked = report.blocked,
                "Security patterns matched"
            );
        }
        report
    }

    /// Scan every string leaf and object key of a JSON value.
    ///
    /// The root sits at depth 0. Values nested deeper than
    /// `options.max_depth` are not visited.
    pub fn run_deep_security_checks(
        &self,
        value: &JsonValue,
        options: &SecurityOptions,
    ) -> SecurityReport {
        let mut report = SecurityReport::default();
        self.walk(value, "", 0, options, &mut report);
        let report = report.finish(options);
        if report.has_findings() {
            tracing::debug!(
                paths = ?report.flagged_paths,
                blocked = report.blocked,
                "Deep scan matched"
            );
        }
        report
    }

    fn walk(
        &self,
        value: &JsonValue,
        pointer: &str,
        depth: usize,
        options: &SecurityOptions,
        report: &mut SecurityReport,
    ) {
        if depth > options.max_depth {
            return;
        }

        match value {
            JsonValue::String(text) => self.visit_text(text, pointer, options, report),
            JsonValue::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    let child = format!("{}/{}", pointer, index);
                    self.walk(item, &child, depth + 1, options, report);
                }
            }
            JsonValue::Object(map) => {
                for (key, item) in map {
                    let child = format!("{}/{}", pointer, escape_pointer(key));
                    self.visit_text(key, &child, options, report);
                    self.walk(item, &child, depth + 1, options, report);
                }
            }
            JsonValue::Null | JsonValue::Bool(_) | JsonValue::Number(_) => {}
        }
    }

    fn visit_text(
        &self,
        text: &str,
        pointer: &str,
        options: &SecurityOptions,
        report: &mut SecurityReport,
    ) {
        let found = self.scan_text(text, options);
        if found.has_findings() {
            let location = if pointer.is_empty() { "/" } else { pointer };
            if !report.flagged_paths.iter().any(|p| p == location) {
                report.flagged_paths.push(location.to_string());
            }
            report.absorb(found);
        }
    }
}

/// RFC 6901 escaping for a single reference token.
fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

lazy_static! {
    static ref DEFAULT_SCANNER: SecurityScanner = SecurityScanner::default();
}

/// Injection scan with the built-in rules.
pub fn check_prompt_injection(text: &str) -> Detection {
    DEFAULT_SCANNER.check_prompt_injection(text)
}

/// Unsafe-code scan with the built-in rules.
pub fn check_unsafe_code(text: &str) -> Detection {
    DEFAULT_SCANNER.check_unsafe_code(text)
}

/// PII scan with the built-in rules.
pub fn check_pii_patterns(text: &str) -> Detection {
    DEFAULT_SCANNER.check_pii_patterns(text)
}

pub fn run_security_checks(text: &str, options: &SecurityOptions) -> SecurityReport {
    DEFAULT_SCANNER.run_security_checks(text, options)
}

pub fn run_deep_security_checks(value: &JsonValue, options: &SecurityOptions) -> SecurityReport {
    DEFAULT_SCANNER.run_deep_security_checks(value, options)
}
