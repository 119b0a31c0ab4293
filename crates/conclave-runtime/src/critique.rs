//! Self-critique: one critic pass, at most one regeneration.

use serde::{Deserialize, Serialize};

use conclave_core::{extract_json, parse_response, AgentResponse};

use crate::error::RuntimeError;
use crate::gateway::{GenerationParams, ModelGateway};
use crate::prompts::{critic_user_prompt, improvement_user_prompt, CRITIC_PROMPT};

/// Regenerate when the critic lists more improvements than this.
const IMPROVEMENT_THRESHOLD: usize = 2;

const NO_ISSUES: &str = "No issues found";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
}

impl Severity {
    fn parse_lenient(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("high") => Severity::High,
            Some("medium") => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

/// What the critic said and whether the answer was rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CritiqueOutcome {
    pub original_response: String,
    pub critique: String,
    /// Recommendation of the regenerated answer, or the original when unchanged
    pub improved_response: String,
    /// Empty when no regeneration happened
    pub improvements_made: Vec<String>,
    pub severity: Severity,
    /// The regenerated answer in full
    #[serde(skip)]
    pub improved: Option<AgentResponse>,
    #[serde(skip)]
    pub input_tokens: u64,
    #[serde(skip)]
    pub output_tokens: u64,
}

impl CritiqueOutcome {
    pub fn regenerated(&self) -> bool {
        self.improved.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct CriticReply {
    #[serde(default)]
    critique: Option<String>,
    #[serde(default)]
    improvements: Option<Vec<String>>,
    #[serde(default)]
    severity: Option<String>,
}

struct Verdict {
    critique: String,
    improvements: Vec<String>,
    severity: Severity,
}

impl Verdict {
    fn no_issues() -> Self {
        Self {
            critique: NO_ISSUES.to_string(),
            improvements: Vec::new(),
            severity: Severity::Low,
        }
    }

    fn needs_regeneration(&self) -> bool {
        self.severity == Severity::High || self.improvements.len() > IMPROVEMENT_THRESHOLD
    }
}

fn parse_verdict(raw: &str) -> Verdict {
    match serde_json::from_str::<CriticReply>(extract_json(raw)) {
        Ok(reply) => Verdict {
            critique: reply.critique.unwrap_or_else(|| NO_ISSUES.to_string()),
            improvements: reply.improvements.unwrap_or_default(),
            severity: Severity::parse_lenient(reply.severity.as_deref()),
        },
        Err(e) => {
            tracing::debug!(error = %e, "Critic reply unreadable, assuming no issues");
            Verdict::no_issues()
        }
    }
}

pub struct SelfCritiqueLoop<'a> {
    gateway: &'a ModelGateway,
}

impl<'a> SelfCritiqueLoop<'a> {
    pub fn new(gateway: &'a ModelGateway) -> Self {
        Self { gateway }
    }

    /// Critique `recommendation`; regenerate once under `system_prompt` if
    /// the critique is severe or long.
    pub async fn run(
        &self,
        recommendation: &str,
        system_prompt: &str,
        params: &GenerationParams,
    ) -> Result<CritiqueOutcome, RuntimeError> {
        let critic_params = params.clone().json(true);
        let critic = self
            .gateway
            .generate(CRITIC_PROMPT, &critic_user_prompt(recommendation), &critic_params)
            .await?;

        let mut input_tokens = critic.input_tokens;
        let mut output_tokens = critic.output_tokens;
        let verdict = parse_verdict(&critic.text);

        tracing::debug!(
            severity = ?verdict.severity,
            improvements = verdict.improvements.len(),
            "Critique received"
        );

        if !verdict.needs_regeneration() {
            return Ok(CritiqueOutcome {
                original_response: recommendation.to_string(),
                critique: verdict.critique,
                improved_response: recommendation.to_string(),
                improvements_made: Vec::new(),
                severity: verdict.severity,
                improved: None,
                input_tokens,
                output_tokens,
            });
        }

        let improved = self
            .gateway
            .generate(
                system_prompt,
                &improvement_user_prompt(recommendation, &verdict.critique, &verdict.improvements),
                params,
            )
            .await?;
        input_tokens += improved.input_tokens;
        output_tokens += improved.output_tokens;

        tracing::info!(severity = ?verdict.severity, "Answer regenerated after critique");
        let improved = parse_response(&improved.text);

        Ok(CritiqueOutcome {
            original_response: recommendation.to_string(),
            critique: verdict.critique,
            improved_response: improved.recommendation.clone(),
            improvements_made: verdict.improvements,
            severity: verdict.severity,
            improved: Some(improved),
            input_tokens,
            output_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ScriptedProvider;
    use conclave_core::AgentConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn params() -> GenerationParams {
        GenerationParams::for_config(&AgentConfig::default(), "test-model")
    }

    async fn run_with(replies: Vec<String>) -> (CritiqueOutcome, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new("fake").with_replies(replies));
        let gateway = ModelGateway::new(provider.clone(), Duration::from_secs(5));
        let outcome = SelfCritiqueLoop::new(&gateway)
            .run("Use a global lock", "persona system", &params())
            .await
            .unwrap();
        (outcome, provider)
    }

    #[tokio::test]
    async fn test_minor_critique_keeps_original() {
        let critic = serde_json::json!({
            "critique": "Fine, slightly terse",
            "improvements": ["Mention contention"],
            "severity": "low"
        });
        let (outcome, provider) = run_with(vec![critic.to_string()]).await;

        assert_eq!(provider.call_count(), 1);
        assert_eq!(outcome.improved_response, outcome.original_response);
        assert!(outcome.improvements_made.is_empty());
        assert!(!outcome.regenerated());
        assert_eq!(outcome.severity, Severity::Low);
    }

    #[tokio::test]
    async fn test_high_severity_regenerates_once() {
        let critic = serde_json::json!({
            "critique": "Deadlocks under nested calls",
            "improvements": ["Use per-key locks"],
            "severity": "HIGH"
        });
        let (outcome, provider) =
            run_with(vec![critic.to_string(), "{\"recommendation\": \"Use per-key locks\"}".to_string()])
                .await;

        assert_eq!(provider.call_count(), 2);
        assert_eq!(outcome.severity, Severity::High);
        assert_eq!(outcome.improvements_made, vec!["Use per-key locks".to_string()]);
        assert_eq!(outcome.improved_response, "Use per-key locks");
        assert!(outcome.regenerated());

        let regen = &provider.requests()[1];
        assert_eq!(regen[0].content, "persona system");
        assert!(regen[1].content.contains("Deadlocks under nested calls"));
    }

    #[tokio::test]
    async fn test_improved_response_is_plain_text() {
        let critic = serde_json::json!({
            "critique": "Lock is never released on panic",
            "improvements": ["Use a guard"],
            "severity": "high"
        });
        let regenerated = serde_json::json!({
            "reasoning": [{"step": 1, "thought": "Guards release on unwind"}],
            "recommendation": "Hold the lock through a guard",
            "confidence": 0.8
        });
        let (outcome, _) = run_with(vec![critic.to_string(), regenerated.to_string()]).await;

        assert_eq!(outcome.improved_response, "Hold the lock through a guard");
        assert!(!outcome.improved_response.contains('{'));
        let improved = outcome.improved.as_ref().unwrap();
        assert_eq!(improved.reasoning.len(), 1);

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["improvedResponse"], "Hold the lock through a guard");
        assert!(json.get("improved").is_none());
    }

    #[tokio::test]
    async fn test_many_improvements_regenerate() {
        let critic = serde_json::json!({
            "critique": "Several gaps",
            "improvements": ["a", "b", "c"],
            "severity": "medium"
        });
        let (outcome, provider) = run_with(vec![critic.to_string(), "better".to_string()]).await;
        assert_eq!(provider.call_count(), 2);
        assert_eq!(outcome.improved_response, "better");
        assert_eq!(outcome.improved.as_ref().unwrap().recommendation, "better");
        assert_eq!(outcome.improvements_made.len(), 3);
    }

    #[tokio::test]
    async fn test_two_medium_improvements_do_not_regenerate() {
        let critic = serde_json::json!({
            "critique": "Two gaps",
            "improvements": ["a", "b"],
            "severity": "medium"
        });
        let (outcome, provider) = run_with(vec![critic.to_string()]).await;
        assert_eq!(provider.call_count(), 1);
        assert!(!outcome.regenerated());
    }

    #[tokio::test]
    async fn test_malformed_critic_degrades() {
        let (outcome, provider) = run_with(vec!["I think it is fine?".to_string()]).await;
        assert_eq!(provider.call_count(), 1);
        assert_eq!(outcome.critique, "No issues found");
        assert_eq!(outcome.severity, Severity::Low);
        assert!(outcome.improvements_made.is_empty());
    }
}
