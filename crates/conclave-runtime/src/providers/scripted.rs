//! In-memory provider that replays scripted replies.
//!
//! Used by tests and offline demos. Replies are served in queue order; once
//! the queue is empty the responder (if any) is asked, then the fallback
//! text. Every request is recorded so tests can inspect prompts, call
//! counts and how many calls overlapped.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{
    factory::ProviderFactory, ChatMessage, CompletionConfig, CompletionResponse, LlmProvider,
    ProviderError, TokenUsage,
};

/// One scripted outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedReply {
    Text(String),
    Fail(ProviderError),
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        ScriptedReply::Text(text.into())
    }

    /// A reply serialized from a JSON value.
    pub fn json(value: &JsonValue) -> Self {
        ScriptedReply::Text(value.to_string())
    }
}

type Responder = Arc<dyn Fn(&[ChatMessage]) -> Option<ScriptedReply> + Send + Sync>;

pub struct ScriptedProvider {
    name: String,
    queue: Mutex<VecDeque<ScriptedReply>>,
    responder: Option<Responder>,
    fallback: Option<String>,
    delay: Duration,
    healthy: AtomicBool,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl fmt::Debug for ScriptedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedProvider")
            .field("name", &self.name)
            .field("queued", &self.queue.lock().len())
            .field("calls", &self.call_count())
            .finish()
    }
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
            responder: None,
            fallback: None,
            delay: Duration::ZERO,
            healthy: AtomicBool::new(true),
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.push(ScriptedReply::Text(text.into()));
        self
    }

    pub fn with_replies<I, S>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for reply in replies {
            self.push(ScriptedReply::Text(reply.into()));
        }
        self
    }

    pub fn with_error(self, error: ProviderError) -> Self {
        self.push(ScriptedReply::Fail(error));
        self
    }

    /// Reply computed from the request once the queue runs dry.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&[ChatMessage]) -> Option<ScriptedReply> + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(responder));
        self
    }

    /// Reply used when nothing else answers.
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Report a missing credential from `health_check`.
    pub fn unhealthy(self) -> Self {
        self.healthy.store(false, Ordering::SeqCst);
        self
    }

    pub fn push(&self, reply: ScriptedReply) {
        self.queue.lock().push_back(reply);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Highest number of calls that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Every request received, in arrival order.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().clone()
    }

    /// User turns of every request, in arrival order.
    pub fn user_prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .filter_map(|messages| {
                messages
                    .iter()
                    .rev()
                    .find(|m| m.role == "user")
                    .map(|m| m.content.clone())
            })
            .collect()
    }

    fn next_reply(&self, messages: &[ChatMessage]) -> ScriptedReply {
        if let Some(reply) = self.queue.lock().pop_front() {
            return reply;
        }
        if let Some(reply) = self.responder.as_ref().and_then(|r| r(messages)) {
            return reply;
        }
        match &self.fallback {
            Some(text) => ScriptedReply::Text(text.clone()),
            None => ScriptedReply::Fail(ProviderError::NotConfigured(format!(
                "scripted provider '{}' has no reply left",
                self.name
            ))),
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        _config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        // Reply is picked before any await so queue order follows call order.
        let reply = self.next_reply(&messages);
        let prompt_text: String = messages.iter().map(|m| m.content.as_str()).collect();
        self.requests.lock().push(messages);

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match reply {
            ScriptedReply::Text(content) => Ok(CompletionResponse {
                usage: TokenUsage {
                    prompt_tokens: self.estimate_tokens(&prompt_text),
                    completion_tokens: self.estimate_tokens(&content),
                },
                content,
                model: format!("{}-scripted", self.name),
                stop_reason: Some("end_turn".to_string()),
            }),
            ScriptedReply::Fail(error) => Err(error),
        }
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Factory for [`ScriptedProvider`].
///
/// ```json
/// { "name": "offline", "replies": ["..."], "fallback": "..." }
/// ```
pub struct ScriptedProviderFactory;

impl ProviderFactory for ScriptedProviderFactory {
    fn provider_type(&self) -> &'static str {
        "scripted"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.validate_config(config)?;

        let name = config["name"].as_str().unwrap_or("scripted");
        let mut provider = ScriptedProvider::new(name);

        if let Some(replies) = config["replies"].as_array() {
            for reply in replies {
                provider.push(match reply {
                    JsonValue::String(text) => ScriptedReply::text(text.clone()),
                    other => ScriptedReply::json(other),
                });
            }
        }
        if let Some(text) = config["fallback"].as_str() {
            provider = provider.with_fallback(text);
        }

        Ok(Arc::new(provider))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if !config["replies"].is_null() && !config["replies"].is_array() {
            return Err(ProviderError::NotConfigured(
                "'replies' must be an array".to_string(),
            ));
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "In-memory provider replaying scripted replies"
    }
}
