use async_trait::async_trait;

use conclave_core::AgentConfig;

use crate::agents::{Invoker, Persona, PersonaKind};
use crate::error::RuntimeError;
use crate::orchestrator::{AgentInvocationResult, Orchestrator};

/// A persona bound to an orchestrator.
#[derive(Clone, Copy)]
pub struct Agent<'a> {
    persona: &'static Persona,
    orchestrator: &'a Orchestrator,
}

impl std::fmt::Debug for Agent<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent").field("persona", &self.persona.name).finish()
    }
}

impl<'a> Agent<'a> {
    pub fn new(kind: PersonaKind, orchestrator: &'a Orchestrator) -> Self {
        Self {
            persona: kind.persona(),
            orchestrator,
        }
    }

    pub fn kind(&self) -> PersonaKind {
        self.persona.kind
    }

    /// Prompt text for the named helper.
    pub fn render_helper(&self, name: &str, input: &str) -> Result<String, RuntimeError> {
        self.persona
            .helper(name)
            .map(|helper| helper.render(input))
            .ok_or_else(|| {
                RuntimeError::Configuration(format!(
                    "persona '{}' has no helper '{}' (available: {})",
                    self.persona.name,
                    name,
                    self.persona.helper_names().collect::<Vec<_>>().join(", ")
                ))
            })
    }

    /// Render the named helper template and invoke it.
    pub async fn run_helper(
        &self,
        name: &str,
        input: &str,
        config: &AgentConfig,
    ) -> Result<AgentInvocationResult, RuntimeError> {
        let prompt = self.render_helper(name, input)?;
        self.invoke(&prompt, config).await
    }

    pub async fn design(
        &self,
        requirements: &str,
        config: &AgentConfig,
    ) -> Result<AgentInvocationResult, RuntimeError> {
        self.run_helper("design", requirements, config).await
    }

    pub async fn diagnose(
        &self,
        problem: &str,
        config: &AgentConfig,
    ) -> Result<AgentInvocationResult, RuntimeError> {
        self.run_helper("diagnose", problem, config).await
    }

    pub async fn implement(
        &self,
        task: &str,
        config: &AgentConfig,
    ) -> Result<AgentInvocationResult, RuntimeError> {
        self.run_helper("implement", task, config).await
    }

    pub async fn evaluate(
        &self,
        claim: &str,
        config: &AgentConfig,
    ) -> Result<AgentInvocationResult, RuntimeError> {
        self.run_helper("evaluate", claim, config).await
    }
}

#[async_trait]
impl<'a> Invoker for Agent<'a> {
    fn persona(&self) -> &'static Persona {
        self.persona
    }

    async fn invoke(
        &self,
        prompt: &str,
        config: &AgentConfig,
    ) -> Result<AgentInvocationResult, RuntimeError> {
        self.orchestrator.invoke(self.persona.kind, prompt, config).await
    }
}
