//! Self-consistency: several independent generations, one majority answer.

use futures::future::try_join_all;

use conclave_core::{parse_response, vote, AgentResponse, ConsistencyMode, ConsistencyPath};

use crate::error::RuntimeError;
use crate::gateway::{GenerationParams, ModelGateway};
use crate::prompts::attempt_marker;

/// Everything one consistency run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsistencyRun {
    pub selected_path: ConsistencyPath,
    pub selected_response: AgentResponse,
    pub all_paths: Vec<ConsistencyPath>,
    pub consensus_score: f64,
    pub disagreements: Vec<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub path_latencies_ms: Vec<u64>,
}

impl ConsistencyRun {
    pub fn paths_evaluated(&self) -> usize {
        self.all_paths.len()
    }
}

pub struct SelfConsistencyEngine<'a> {
    gateway: &'a ModelGateway,
}

impl<'a> SelfConsistencyEngine<'a> {
    pub fn new(gateway: &'a ModelGateway) -> Self {
        Self { gateway }
    }

    /// Issue all paths concurrently and vote on their conclusions.
    ///
    /// Fails as soon as any path fails; no partial result is returned.
    pub async fn run(
        &self,
        system: &str,
        user: &str,
        mode: ConsistencyMode,
        robust_paths: usize,
        params: &GenerationParams,
    ) -> Result<ConsistencyRun, RuntimeError> {
        let count = mode.path_count(robust_paths);

        let calls = (0..count).map(|index| {
            let prompt = if index == 0 {
                user.to_string()
            } else {
                format!("{}{}", user, attempt_marker(index))
            };
            async move {
                let generation = self.gateway.generate(system, &prompt, params).await?;
                tracing::debug!(
                    path = index,
                    latency_ms = generation.latency.as_millis() as u64,
                    "Consistency path finished"
                );
                Ok::<_, RuntimeError>(generation)
            }
        });

        let generations = try_join_all(calls).await?;

        let mut responses = Vec::with_capacity(generations.len());
        let mut path_latencies_ms = Vec::with_capacity(generations.len());
        let mut input_tokens = 0;
        let mut output_tokens = 0;

        for generation in generations {
            input_tokens += generation.input_tokens;
            output_tokens += generation.output_tokens;
            path_latencies_ms.push(generation.latency.as_millis() as u64);
            responses.push(parse_response(&generation.text));
        }

        let all_paths: Vec<ConsistencyPath> = responses.iter().map(ConsistencyPath::from).collect();
        let outcome = vote(&all_paths).ok_or_else(|| {
            RuntimeError::Configuration("consistency run produced no paths".to_string())
        })?;

        tracing::info!(
            mode = %mode,
            paths = all_paths.len(),
            consensus = outcome.consensus_score,
            "Consistency vote complete"
        );

        Ok(ConsistencyRun {
            selected_path: all_paths[outcome.selected_index].clone(),
            selected_response: responses.swap_remove(outcome.selected_index),
            all_paths,
            consensus_score: outcome.consensus_score,
            disagreements: outcome.disagreements,
            input_tokens,
            output_tokens,
            path_latencies_ms,
        })
    }
}
