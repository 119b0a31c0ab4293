//! Runtime configuration.
//!
//! Loaded from YAML or built in code. Durations are humantime strings
//! (`"45s"`, `"2m"`). Keys are camelCase to match the invocation wire
//! format.
//!
//! ```yaml
//! provider:
//!   type: anthropic
//!   model: claude-sonnet-4-5
//! secondary:
//!   type: openai
//!   model: gpt-4o
//! requestTimeout: 45s
//! defaults:
//!   consistency: robust
//!   validationLevel: high
//! security:
//!   input: { blockOnDetection: true }
//!   output: { blockOnDetection: false }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use conclave_core::{AgentConfig, CostRates, SecurityOptions};

use crate::error::RuntimeError;
use crate::resilience::CircuitBreakerConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for RuntimeError {
    fn from(error: ConfigError) -> Self {
        RuntimeError::Configuration(error.to_string())
    }
}

/// Serde adapter for humantime duration strings.
pub(crate) mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Which provider to build and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSettings {
    /// Registry key: "anthropic", "openai", "scripted"
    #[serde(rename = "type")]
    pub kind: String,

    /// Model used when the invocation does not override it
    pub model: String,

    /// Passed verbatim to the provider factory (api_key, base_url, ...)
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub options: JsonValue,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: "anthropic".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            options: JsonValue::Null,
        }
    }
}

impl ProviderSettings {
    pub fn new(kind: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            model: model.into(),
            options: JsonValue::Null,
        }
    }

    /// Factory config, never null.
    pub fn factory_config(&self) -> JsonValue {
        match &self.options {
            JsonValue::Null => serde_json::json!({}),
            other => other.clone(),
        }
    }
}

/// Scan options for prompts going in and answers coming out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityPolicy {
    pub input: SecurityOptions,
    pub output: SecurityOptions,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            // prompts quote the code being debugged; only injection blocks
            input: SecurityOptions::injection_only(),
            // generated code legitimately mentions exec/eval; report, don't fail
            output: SecurityOptions::report_only(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationPolicy {
    /// Fail the invocation when any structural check fails
    pub enforce: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    pub provider: ProviderSettings,

    /// Provider for second opinions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<ProviderSettings>,

    /// Hard limit on every model call
    #[serde(with = "humantime_duration")]
    pub request_timeout: Duration,

    /// Invocation settings used when the caller passes none
    pub defaults: AgentConfig,

    pub security: SecurityPolicy,

    pub validation: ValidationPolicy,

    /// Cost rates; derived from the primary model when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_rates: Option<CostRates>,

    pub circuit_breaker: CircuitBreakerConfig,

    /// Capacity of the event channel the CLI opens for `--stream`
    pub event_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            provider: ProviderSettings::default(),
            secondary: None,
            request_timeout: Duration::from_secs(60),
            defaults: AgentConfig::default(),
            security: SecurityPolicy::default(),
            validation: ValidationPolicy::default(),
            cost_rates: None,
            circuit_breaker: CircuitBreakerConfig::default(),
            event_buffer: 64,
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "requestTimeout must be greater than zero".to_string(),
            ));
        }
        if self.provider.model.trim().is_empty() {
            return Err(ConfigError::Invalid("provider.model must not be empty".to_string()));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid("eventBuffer must be at least 1".to_string()));
        }
        self.defaults.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }

    /// Explicit rates, or the table entry for the primary model.
    pub fn effective_cost_rates(&self) -> CostRates {
        self.cost_rates
            .unwrap_or_else(|| CostRates::for_model(&self.provider.model))
    }
}
