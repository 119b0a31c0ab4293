//! Response parsing.
//!
//! Every persona is instructed to reply with a single JSON object in the
//! [`AgentResponse`](crate::types::AgentResponse) shape. This module turns
//! whatever the model actually sent back into that shape.

mod parser;
mod schema;

pub use parser::{extract_json, parse_response, try_parse_structured};
pub use schema::{validate_response_schema, SchemaError};
