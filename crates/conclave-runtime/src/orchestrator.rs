//! Invocation state machine.
//!
//! ```text
//! START → GENERATING → [CRITIQUING] → [META_EVALUATING] → [SECOND_OPINION] → EVALUATING → DONE
//!                  ↘ FAILED
//! ```
//!
//! One [`Orchestrator`] serves any number of concurrent invocations. All
//! per-run state lives in a [`RunContext`] created for that run; the
//! orchestrator itself only holds configuration, the secondary circuit and
//! cumulative usage.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::Instrument;

use conclave_core::{
    extract_json, parse_response, validate_response, AgentConfig, AgentResponse, ClassicMetrics,
    EvaluationInput, Evaluator, ReasoningStep, RuleTable, SecurityReport, SecurityScanner,
    ValidationReport,
};

use crate::agents::{Agent, Persona, PersonaKind};
use crate::config::RuntimeConfig;
use crate::consistency::SelfConsistencyEngine;
use crate::critique::{CritiqueOutcome, SelfCritiqueLoop};
use crate::error::RuntimeError;
use crate::gateway::{GenerationParams, ModelGateway};
use crate::prompts::{
    meta_evaluation_user_prompt, pipeline_context, second_opinion_user_prompt,
    SECOND_OPINION_PROMPT,
};
use crate::providers::{LlmProvider, ProviderRegistry};
use crate::resilience::CircuitBreaker;
use crate::telemetry::{RunRecord, TelemetrySink, TracingSink};
use crate::usage::UsageLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvocationState {
    Start,
    Generating,
    Critiquing,
    MetaEvaluating,
    SecondOpinion,
    Evaluating,
    Done,
    Failed,
}

impl InvocationState {
    pub fn as_str(self) -> &'static str {
        match self {
            InvocationState::Start => "START",
            InvocationState::Generating => "GENERATING",
            InvocationState::Critiquing => "CRITIQUING",
            InvocationState::MetaEvaluating => "META_EVALUATING",
            InvocationState::SecondOpinion => "SECOND_OPINION",
            InvocationState::Evaluating => "EVALUATING",
            InvocationState::Done => "DONE",
            InvocationState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, InvocationState::Done | InvocationState::Failed)
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// No failed checks, no detections, no warnings
    Success,
    /// Completed, with findings or degraded optional stages
    Partial,
    /// Errored; the error code travels alongside
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencySummary {
    pub consensus_score: f64,
    pub paths_evaluated: usize,
    pub disagreements: Vec<String>,
}

/// The secondary provider's rating of the final answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecondOpinion {
    pub provider: String,
    /// 1 to 10
    pub rating: u8,
    pub agrees: bool,
    pub concerns: Vec<String>,
    pub summary: String,
}

#[derive(Debug, Deserialize)]
struct SecondOpinionReply {
    rating: f64,
    agrees: bool,
    #[serde(default)]
    concerns: Vec<String>,
    #[serde(default)]
    summary: String,
}

fn parse_second_opinion(raw: &str, provider: &str) -> Option<SecondOpinion> {
    let reply: SecondOpinionReply = serde_json::from_str(extract_json(raw)).ok()?;
    if !reply.rating.is_finite() {
        return None;
    }
    Some(SecondOpinion {
        provider: provider.to_string(),
        rating: reply.rating.round().clamp(1.0, 10.0) as u8,
        agrees: reply.agrees,
        concerns: reply.concerns,
        summary: reply.summary,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityScans {
    pub input: SecurityReport,
    pub output: SecurityReport,
}

impl SecurityScans {
    pub fn has_findings(&self) -> bool {
        self.input.has_findings() || self.output.has_findings()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInvocationResult {
    pub run_id: String,
    pub agent: String,
    pub response: AgentResponse,
    pub metrics: ClassicMetrics,
    pub consistency: ConsistencySummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critique: Option<CritiqueOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_evaluation: Option<AgentResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second_opinion: Option<SecondOpinion>,
    pub validation: ValidationReport,
    pub security: SecurityScans,
    pub outcome: Outcome,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl AgentInvocationResult {
    pub fn recommendation(&self) -> &str {
        &self.response.recommendation
    }
}

/// Progress of one invocation, sent while it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum InvocationEvent {
    StateChanged(InvocationState),
    ReasoningStep(ReasoningStep),
    Completed(Box<AgentInvocationResult>),
    Failed { code: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub stages: Vec<AgentInvocationResult>,
    pub final_recommendation: String,
}

/// Per-run state. Never shared between invocations.
#[derive(Debug)]
pub struct RunContext {
    run_id: String,
    agent: &'static str,
    started: Instant,
    events: Option<mpsc::Sender<InvocationEvent>>,
}

impl RunContext {
    fn new(agent: &'static str, events: Option<mpsc::Sender<InvocationEvent>>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            agent,
            started: Instant::now(),
            events,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn agent(&self) -> &'static str {
        self.agent
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    async fn emit(&self, event: InvocationEvent) {
        if let Some(events) = &self.events {
            // receiver gone: nobody is listening, keep going
            let _ = events.send(event).await;
        }
    }

    async fn enter(&self, state: InvocationState) {
        tracing::info!(run_id = %self.run_id, agent = self.agent, state = %state, "State transition");
        self.emit(InvocationEvent::StateChanged(state)).await;
    }
}

/// Token and timing totals across every call of one run.
#[derive(Debug, Default)]
struct Tally {
    input_tokens: u64,
    output_tokens: u64,
    per_step_ms: Vec<u64>,
}

impl Tally {
    fn add(&mut self, input_tokens: u64, output_tokens: u64, stage_started: Instant) {
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
        self.step(stage_started);
    }

    fn step(&mut self, stage_started: Instant) {
        self.per_step_ms.push(stage_started.elapsed().as_millis() as u64);
    }
}

pub struct Orchestrator {
    primary: ModelGateway,
    secondary: Option<ModelGateway>,
    secondary_model: String,
    config: RuntimeConfig,
    scanner: SecurityScanner,
    evaluator: Evaluator,
    circuit_breaker: CircuitBreaker,
    usage: UsageLedger,
    telemetry: Arc<dyn TelemetrySink>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("primary", &self.primary)
            .field("secondary", &self.secondary)
            .field("rules", &self.scanner.rules().len())
            .finish()
    }
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Build providers through `registry` as `config` describes.
    pub fn from_config(
        config: RuntimeConfig,
        registry: &ProviderRegistry,
    ) -> Result<Self, RuntimeError> {
        let primary = registry.create(&config.provider.kind, &config.provider.factory_config())?;
        let mut builder = OrchestratorBuilder::new().provider(primary);
        if let Some(secondary) = &config.secondary {
            builder = builder.secondary(registry.create(&secondary.kind, &secondary.factory_config())?);
        }
        builder.config(config).build()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Invocation settings from the config file.
    pub fn defaults(&self) -> &AgentConfig {
        &self.config.defaults
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    pub fn usage(&self) -> &UsageLedger {
        &self.usage
    }

    pub fn agent(&self, kind: PersonaKind) -> Agent<'_> {
        Agent::new(kind, self)
    }

    pub async fn invoke(
        &self,
        kind: PersonaKind,
        prompt: &str,
        config: &AgentConfig,
    ) -> Result<AgentInvocationResult, RuntimeError> {
        self.run(kind, prompt, None, config, None).await
    }

    /// Like [`invoke`](Self::invoke), reporting progress on `events`.
    ///
    /// The stream ends with exactly one `Completed` or `Failed` event.
    pub async fn invoke_with_events(
        &self,
        kind: PersonaKind,
        prompt: &str,
        config: &AgentConfig,
        events: mpsc::Sender<InvocationEvent>,
    ) -> Result<AgentInvocationResult, RuntimeError> {
        self.run(kind, prompt, None, config, Some(events)).await
    }

    /// Run personas in order; each stage sees the previous recommendation.
    ///
    /// Only the caller's prompt goes through the input scan. The carried
    /// recommendation was already scanned as the previous stage's output.
    pub async fn run_pipeline(
        &self,
        stages: &[PersonaKind],
        prompt: &str,
        config: &AgentConfig,
    ) -> Result<PipelineResult, RuntimeError> {
        if stages.is_empty() {
            return Err(RuntimeError::Configuration(
                "pipeline needs at least one stage".to_string(),
            ));
        }

        let mut results: Vec<AgentInvocationResult> = Vec::with_capacity(stages.len());
        for (index, kind) in stages.iter().enumerate() {
            let context = results
                .last()
                .map(|previous| pipeline_context(&previous.agent, previous.recommendation()));
            tracing::info!(stage = index, agent = %kind, "Pipeline stage starting");
            results.push(self.run(*kind, prompt, context.as_deref(), config, None).await?);
        }

        let final_recommendation = results
            .last()
            .map(|r| r.response.recommendation.clone())
            .unwrap_or_default();

        Ok(PipelineResult {
            stages: results,
            final_recommendation,
        })
    }

    async fn run(
        &self,
        kind: PersonaKind,
        prompt: &str,
        context: Option<&str>,
        config: &AgentConfig,
        events: Option<mpsc::Sender<InvocationEvent>>,
    ) -> Result<AgentInvocationResult, RuntimeError> {
        let persona = kind.persona();
        let ctx = RunContext::new(persona.name, events);
        let span = tracing::info_span!("invoke", run_id = %ctx.run_id, agent = persona.name);

        let result = self
            .execute(persona, prompt, context, config, &ctx)
            .instrument(span)
            .await;

        match &result {
            Ok(done) => {
                ctx.enter(InvocationState::Done).await;
                ctx.emit(InvocationEvent::Completed(Box::new(done.clone()))).await;

                self.usage.record_success(
                    persona.name,
                    done.metrics.cost.input_tokens,
                    done.metrics.cost.output_tokens,
                    done.metrics.cost.estimated_cost,
                );
                self.record_telemetry(&ctx, done.outcome, None, Some(done.metrics.clone()));
            }
            Err(e) => {
                tracing::warn!(
                    run_id = %ctx.run_id,
                    agent = persona.name,
                    code = e.code(),
                    error = %e,
                    "Invocation failed"
                );
                ctx.enter(InvocationState::Failed).await;
                ctx.emit(InvocationEvent::Failed {
                    code: e.code().to_string(),
                    message: e.to_string(),
                })
                .await;

                self.usage.record_failure(persona.name);
                self.record_telemetry(&ctx, Outcome::Failed, Some(e.code()), None);
            }
        }

        result
    }

    async fn execute(
        &self,
        persona: &'static Persona,
        prompt: &str,
        context: Option<&str>,
        config: &AgentConfig,
        ctx: &RunContext,
    ) -> Result<AgentInvocationResult, RuntimeError> {
        ctx.enter(InvocationState::Start).await;

        if !self.primary.health_check().await {
            return Err(RuntimeError::Configuration(format!(
                "provider '{}' has no credential configured",
                self.primary.provider_name()
            )));
        }
        config.validate().map_err(RuntimeError::Configuration)?;

        let input_scan = self
            .scanner
            .run_security_checks(prompt, &self.config.security.input);
        if input_scan.blocked {
            return Err(RuntimeError::Security {
                stage: "input".to_string(),
                patterns: input_scan.blocking_patterns(&self.config.security.input),
            });
        }

        let task = match context {
            Some(context) => format!("{}{}", prompt, context),
            None => prompt.to_string(),
        };

        let mut tally = Tally::default();
        let mut warnings = Vec::new();
        let system = persona.system_prompt();
        let params = GenerationParams::for_config(config, &self.config.provider.model);

        ctx.enter(InvocationState::Generating).await;
        let stage = Instant::now();
        let run = SelfConsistencyEngine::new(&self.primary)
            .run(&system, &task, config.consistency, config.robust_paths, &params)
            .await?;
        tally.add(run.input_tokens, run.output_tokens, stage);
        let mut response = run.selected_response.clone();

        let critique = if config.self_critique {
            ctx.enter(InvocationState::Critiquing).await;
            let stage = Instant::now();
            let outcome = SelfCritiqueLoop::new(&self.primary)
                .run(&response.recommendation, &system, &params)
                .await?;
            tally.add(outcome.input_tokens, outcome.output_tokens, stage);
            if let Some(improved) = &outcome.improved {
                response = improved.clone();
            }
            Some(outcome)
        } else {
            None
        };

        // the answer is final from here on; later stages only annotate it
        for step in &response.reasoning {
            ctx.emit(InvocationEvent::ReasoningStep(step.clone())).await;
        }

        let meta_evaluation = if config.meta_evaluation {
            ctx.enter(InvocationState::MetaEvaluating).await;
            self.meta_evaluate(&task, &response, &params, ctx, &mut tally, &mut warnings)
                .await
        } else {
            None
        };

        let second_opinion = if config.second_opinion {
            self.second_opinion(&task, &response, config, ctx, &mut tally, &mut warnings)
                .await
        } else {
            None
        };

        ctx.enter(InvocationState::Evaluating).await;
        let validation = validate_response(&response, config.validation_level);

        let response_value = serde_json::to_value(&response)
            .unwrap_or_else(|_| serde_json::Value::String(response.recommendation.clone()));
        let output_scan = self
            .scanner
            .run_deep_security_checks(&response_value, &self.config.security.output);
        if output_scan.blocked {
            return Err(RuntimeError::Security {
                stage: "output".to_string(),
                patterns: output_scan.blocking_patterns(&self.config.security.output),
            });
        }
        if self.config.validation.enforce && !validation.failed.is_empty() {
            return Err(RuntimeError::Validation {
                failed: validation.failed.clone(),
            });
        }

        let paths_evaluated = run.paths_evaluated();
        let metrics = self.evaluator.evaluate(EvaluationInput {
            started: ctx.started,
            input_tokens: tally.input_tokens,
            output_tokens: tally.output_tokens,
            response: &response,
            consensus_score: run.consensus_score,
            paths_evaluated,
            per_step_ms: tally.per_step_ms,
            validation_level: config.validation_level,
        });

        let security = SecurityScans {
            input: input_scan,
            output: output_scan,
        };
        let outcome = if validation.is_clean() && !security.has_findings() && warnings.is_empty() {
            Outcome::Success
        } else {
            Outcome::Partial
        };

        Ok(AgentInvocationResult {
            run_id: ctx.run_id.clone(),
            agent: persona.name.to_string(),
            response,
            metrics,
            consistency: ConsistencySummary {
                consensus_score: run.consensus_score,
                paths_evaluated,
                disagreements: run.disagreements,
            },
            critique,
            meta_evaluation,
            second_opinion,
            validation,
            security,
            outcome,
            warnings,
        })
    }

    /// Philosopher pass over the final answer. Failures become warnings.
    async fn meta_evaluate(
        &self,
        task: &str,
        response: &AgentResponse,
        params: &GenerationParams,
        ctx: &RunContext,
        tally: &mut Tally,
        warnings: &mut Vec<String>,
    ) -> Option<AgentResponse> {
        let stage = Instant::now();
        let system = PersonaKind::Philosopher.persona().system_prompt();
        let user = meta_evaluation_user_prompt(task, &response.recommendation);

        match self.primary.generate(&system, &user, params).await {
            Ok(generation) => {
                tally.add(generation.input_tokens, generation.output_tokens, stage);
                Some(parse_response(&generation.text))
            }
            Err(e) => {
                tally.step(stage);
                tracing::warn!(run_id = %ctx.run_id, error = %e, "Meta-evaluation failed");
                warnings.push(format!("meta-evaluation skipped: {}", e));
                None
            }
        }
    }

    /// Rating from the secondary provider. Failures become warnings.
    async fn second_opinion(
        &self,
        task: &str,
        response: &AgentResponse,
        config: &AgentConfig,
        ctx: &RunContext,
        tally: &mut Tally,
        warnings: &mut Vec<String>,
    ) -> Option<SecondOpinion> {
        let Some(secondary) = &self.secondary else {
            tracing::warn!(run_id = %ctx.run_id, "Second opinion requested without a secondary provider");
            warnings.push("second opinion skipped: no secondary provider configured".to_string());
            return None;
        };

        ctx.enter(InvocationState::SecondOpinion).await;
        let provider = secondary.provider_name().to_string();

        if self.circuit_breaker.is_open(&provider) {
            tracing::warn!(run_id = %ctx.run_id, provider = %provider, "Circuit open, skipping second opinion");
            warnings.push(format!("second opinion skipped: circuit open for '{}'", provider));
            return None;
        }

        let params = GenerationParams {
            model: self.secondary_model.clone(),
            ..GenerationParams::for_config(config, &self.secondary_model)
        };
        let stage = Instant::now();
        let outcome = secondary
            .generate(
                SECOND_OPINION_PROMPT,
                &second_opinion_user_prompt(task, &response.recommendation),
                &params,
            )
            .await;

        match outcome {
            Ok(generation) => {
                self.circuit_breaker.record_success(&provider);
                tally.add(generation.input_tokens, generation.output_tokens, stage);
                let opinion = parse_second_opinion(&generation.text, &provider);
                if opinion.is_none() {
                    tracing::warn!(run_id = %ctx.run_id, provider = %provider, "Second opinion reply unreadable");
                    warnings.push("second opinion skipped: reply was not a rating".to_string());
                }
                opinion
            }
            Err(e) => {
                self.circuit_breaker.record_failure(&provider);
                tally.step(stage);
                tracing::warn!(run_id = %ctx.run_id, provider = %provider, error = %e, "Second opinion failed");
                warnings.push(format!("second opinion skipped: {}", e));
                None
            }
        }
    }

    fn record_telemetry(
        &self,
        ctx: &RunContext,
        outcome: Outcome,
        error_code: Option<&str>,
        metrics: Option<ClassicMetrics>,
    ) {
        let record = RunRecord {
            run_id: ctx.run_id.clone(),
            agent: ctx.agent.to_string(),
            outcome,
            error_code: error_code.map(str::to_string),
            metrics,
            recorded_at: Utc::now(),
            duration_ms: ctx.started.elapsed().as_millis() as u64,
        };
        if let Err(e) = self.telemetry.record(&record) {
            tracing::warn!(run_id = %ctx.run_id, error = %e, "Telemetry sink rejected run record");
        }
    }
}

pub struct OrchestratorBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    secondary: Option<Arc<dyn LlmProvider>>,
    config: RuntimeConfig,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    rules: Option<RuleTable>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            secondary: None,
            config: RuntimeConfig::default(),
            telemetry: None,
            rules: None,
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Provider asked for second opinions.
    pub fn secondary(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.secondary = Some(provider);
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// Replace the built-in security rules.
    pub fn rules(mut self, rules: RuleTable) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn build(self) -> Result<Orchestrator, RuntimeError> {
        let provider = self
            .provider
            .ok_or_else(|| RuntimeError::Configuration("no provider set".to_string()))?;
        self.config.validate()?;

        let timeout = self.config.request_timeout;
        let secondary_model = self
            .config
            .secondary
            .as_ref()
            .map(|s| s.model.clone())
            .unwrap_or_else(|| self.config.provider.model.clone());

        Ok(Orchestrator {
            primary: ModelGateway::new(provider, timeout),
            secondary: self.secondary.map(|p| ModelGateway::new(p, timeout)),
            secondary_model,
            scanner: SecurityScanner::new(self.rules.unwrap_or_else(RuleTable::builtin)),
            evaluator: Evaluator::new(self.config.effective_cost_rates()),
            circuit_breaker: CircuitBreaker::new(self.config.circuit_breaker.clone()),
            usage: UsageLedger::new(),
            telemetry: self.telemetry.unwrap_or_else(|| Arc::new(TracingSink)),
            config: self.config,
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
