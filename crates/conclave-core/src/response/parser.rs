//! Parsing model replies into [`AgentResponse`].
//!
//! Parsing never fails. A reply that is not a schema-valid JSON object
//! degrades to an unstructured response carrying the raw text.

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::types::{AgentResponse, ReasoningStep, Validations, DEFAULT_CONFIDENCE};

use super::schema::validate_response_schema;

/// Lenient mirror of the wire shape. Nullable everywhere the schema is.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResponse {
    recommendation: String,
    #[serde(default)]
    confidence: Option<JsonValue>,
    #[serde(default)]
    reasoning: Option<Vec<ReasoningStep>>,
    #[serde(default)]
    alternatives: Option<Vec<String>>,
    #[serde(default)]
    warnings: Option<Vec<String>>,
    #[serde(default)]
    code_output: Option<String>,
    #[serde(default)]
    validations: Option<Validations>,
}

impl From<RawResponse> for AgentResponse {
    fn from(raw: RawResponse) -> Self {
        Self {
            recommendation: raw.recommendation,
            confidence: normalize_confidence(raw.confidence.as_ref()),
            reasoning: raw.reasoning.unwrap_or_default(),
            alternatives: raw.alternatives,
            warnings: raw.warnings,
            code_output: raw.code_output,
            validations: raw.validations.unwrap_or_default(),
        }
    }
}

/// Parse raw model text into an [`AgentResponse`].
///
/// Falls back to [`AgentResponse::unstructured`] with the raw text verbatim
/// when the text holds no JSON object, the object fails the schema, or the
/// fields cannot be deserialized.
pub fn parse_response(raw: &str) -> AgentResponse {
    match try_parse_structured(raw) {
        Ok(response) => response,
        Err(reason) => {
            tracing::debug!(reason = %reason, "Reply is not structured, using raw text");
            AgentResponse::unstructured(raw)
        }
    }
}

/// Parse strictly, reporting why the reply is not structured.
pub fn try_parse_structured(raw: &str) -> Result<AgentResponse, String> {
    let candidate = extract_json(raw);
    let value: JsonValue =
        serde_json::from_str(candidate).map_err(|e| format!("invalid JSON: {}", e))?;

    if !value.is_object() {
        return Err("reply is not a JSON object".to_string());
    }

    validate_response_schema(&value).map_err(|errors| errors.join("; "))?;

    let raw: RawResponse =
        serde_json::from_value(value).map_err(|e| format!("unexpected field shape: {}", e))?;

    Ok(raw.into())
}

/// Confidence in [0, 1], or [`DEFAULT_CONFIDENCE`] for anything else.
fn normalize_confidence(value: Option<&JsonValue>) -> f64 {
    match value.and_then(JsonValue::as_f64) {
        Some(c) if (0.0..=1.0).contains(&c) => c,
        _ => DEFAULT_CONFIDENCE,
    }
}

/// Locate the JSON object inside a reply.
///
/// Models often wrap the object in prose or markdown fences; this returns
/// the first balanced `{...}` span, or the trimmed input if there is none.
pub fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();

    if let Some(start) = trimmed.find('{') {
        let remainder = &trimmed[start..];
        if let Some(end) = find_matching_brace(remainder) {
            return &remainder[..end];
        }
    }

    trimmed
}

/// Byte offset just past the brace closing the one at position 0.
/// Braces inside JSON strings are ignored.
fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        if c == '\\' && in_string {
            escape = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }

    None
}
