//! # conclave-runtime
//!
//! Persona invocations over LLM providers.
//!
//! This crate does the network I/O that `conclave-core` stays away from:
//! it calls models, runs several independent paths and votes on them,
//! optionally critiques and re-rates the answer, and then hands the result
//! to the core evaluator, validator and security scanner.
//!
//! ## Guarantees
//!
//! - Every model call has a timeout; nothing is retried automatically
//! - Consistency paths run concurrently and share no state
//! - Configuration and credential problems fail before any model call
//! - Every invocation produces exactly one telemetry record
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use conclave_runtime::{AgentConfig, Orchestrator, PersonaKind, ScriptedProvider};
//!
//! # async fn demo() -> Result<(), conclave_runtime::RuntimeError> {
//! let provider = Arc::new(ScriptedProvider::new("offline").with_fallback(
//!     r#"{"reasoning": [{"step": 1, "thought": "Check the hot path"}],
//!         "recommendation": "Add an index on orders.user_id", "confidence": 0.8}"#,
//! ));
//! let orchestrator = Orchestrator::builder().provider(provider).build()?;
//!
//! let result = orchestrator
//!     .agent(PersonaKind::Mechanic)
//!     .diagnose("Order history page takes 9 seconds", &AgentConfig::default())
//!     .await?;
//! println!("{} ({:?})", result.recommendation(), result.outcome);
//! # Ok(())
//! # }
//! ```

pub mod agents;
pub mod config;
pub mod consistency;
pub mod critique;
pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod resilience;
pub mod telemetry;
pub mod usage;

pub use agents::{Agent, HelperOperation, Invoker, Persona, PersonaKind};
pub use config::{ConfigError, ProviderSettings, RuntimeConfig, SecurityPolicy, ValidationPolicy};
pub use consistency::{ConsistencyRun, SelfConsistencyEngine};
pub use critique::{CritiqueOutcome, SelfCritiqueLoop, Severity};
pub use error::{ErrorClass, RuntimeError};
pub use gateway::{Generation, GenerationParams, ModelGateway};
pub use orchestrator::{
    AgentInvocationResult, ConsistencySummary, InvocationEvent, InvocationState, Orchestrator,
    OrchestratorBuilder, Outcome, PipelineResult, RunContext, SecondOpinion, SecurityScans,
};
pub use providers::{
    LlmProvider, ProviderError, ProviderFactory, ProviderRegistry, ScriptedProvider, ScriptedReply,
};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use telemetry::{MemorySink, RunRecord, TelemetryError, TelemetrySink, TracingSink};
pub use usage::{LlmUsage, UsageLedger};

pub use conclave_core::AgentConfig;
