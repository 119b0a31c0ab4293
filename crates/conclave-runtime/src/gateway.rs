//! Single entry point for model calls.
//!
//! Wraps a provider with a mandatory timeout and maps provider failures
//! into [`RuntimeError`]. Nothing here retries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use conclave_core::AgentConfig;

use crate::error::RuntimeError;
use crate::providers::{ChatMessage, CompletionConfig, LlmProvider};

/// Knobs for one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Force a JSON object reply
    pub json: bool,
}

impl GenerationParams {
    /// Params for an invocation, using `default_model` unless the config
    /// overrides it.
    pub fn for_config(config: &AgentConfig, default_model: &str) -> Self {
        Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            json: true,
        }
    }

    pub fn json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

/// Raw model output plus usage.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency: Duration,
}

#[derive(Clone)]
pub struct ModelGateway {
    provider: Arc<dyn LlmProvider>,
    timeout: Duration,
}

impl std::fmt::Debug for ModelGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelGateway")
            .field("provider", &self.provider.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ModelGateway {
    pub fn new(provider: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn health_check(&self) -> bool {
        self.provider.health_check().await
    }

    /// One model call.
    pub async fn generate(
        &self,
        system: &str,
        user: &str,
        params: &GenerationParams,
    ) -> Result<Generation, RuntimeError> {
        let messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
        let config = CompletionConfig {
            model: params.model.clone(),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            timeout: self.timeout,
            json_mode: params.json,
        };

        let started = Instant::now();
        let outcome =
            tokio::time::timeout(self.timeout, self.provider.complete(messages, &config)).await;
        let latency = started.elapsed();

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::debug!(provider = self.provider.name(), error = %e, "Model call failed");
                return Err(e.into());
            }
            Err(_) => {
                tracing::warn!(
                    provider = self.provider.name(),
                    timeout = ?self.timeout,
                    "Model call timed out"
                );
                return Err(RuntimeError::Timeout(self.timeout));
            }
        };

        tracing::debug!(
            provider = self.provider.name(),
            model = %response.model,
            input_tokens = response.usage.prompt_tokens,
            output_tokens = response.usage.completion_tokens,
            latency_ms = latency.as_millis() as u64,
            "Model call completed"
        );

        Ok(Generation {
            text: response.content,
            input_tokens: u64::from(response.usage.prompt_tokens),
            output_tokens: u64::from(response.usage.completion_tokens),
            latency,
        })
    }
}
