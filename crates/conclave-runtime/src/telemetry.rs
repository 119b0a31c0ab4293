//! Run records and the sinks that receive them.
//!
//! One [`RunRecord`] is produced per invocation, successful or not. Where the
//! records go is up to the caller; a sink that fails only costs a log line.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use conclave_core::ClassicMetrics;

use crate::orchestrator::Outcome;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TelemetryError {
    #[error("Telemetry sink unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to encode run record: {0}")]
    Encoding(String),
}

/// Summary of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: String,
    pub agent: String,
    pub outcome: Outcome,
    /// `RuntimeError::code()` when the outcome is failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ClassicMetrics>,
    pub recorded_at: DateTime<Utc>,
    pub duration_ms: u64,
}

pub trait TelemetrySink: Send + Sync {
    fn record(&self, record: &RunRecord) -> Result<(), TelemetryError>;
}

/// Logs each record as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&self, record: &RunRecord) -> Result<(), TelemetryError> {
        let (tokens, cost) = record
            .metrics
            .as_ref()
            .map(|m| (m.cost.tokens, m.cost.estimated_cost))
            .unwrap_or_default();

        tracing::info!(
            target: "conclave::telemetry",
            run_id = %record.run_id,
            agent = %record.agent,
            outcome = ?record.outcome,
            error_code = record.error_code.as_deref().unwrap_or(""),
            duration_ms = record.duration_ms,
            tokens,
            cost,
            "Run recorded"
        );
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<RunRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RunRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl TelemetrySink for MemorySink {
    fn record(&self, record: &RunRecord) -> Result<(), TelemetryError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}
