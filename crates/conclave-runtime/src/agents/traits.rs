//! Shared invocation capability.

use async_trait::async_trait;

use conclave_core::AgentConfig;

use crate::agents::Persona;
use crate::error::RuntimeError;
use crate::orchestrator::AgentInvocationResult;

/// Anything that can run a prompt through the persona pipeline.
///
/// # Isolation Contract
/// - Each call owns its own run state; concurrent calls never observe
///   each other's paths, tokens or events
/// - `config` is read-only for the duration of the call
#[async_trait]
pub trait Invoker: Send + Sync {
    fn persona(&self) -> &'static Persona;

    async fn invoke(
        &self,
        prompt: &str,
        config: &AgentConfig,
    ) -> Result<AgentInvocationResult, RuntimeError>;
}
