//! MCP tool implementations.
//!
//! Each tool exposes one Azure DevOps capability. Tools are registered in
//! the [`ToolRegistry`] and dispatched by name; the dispatcher validates
//! arguments against the tool's input schema before the handler runs.
//!
//! # Tool categories
//!
//! - **Queries**: wiql-query, odata-query (materialize query handles)
//! - **Handles**: query-handle-info, select-items-from-query-handle
//! - **Bulk**: execute-bulk-operations plus one-action convenience tools
//! - **Linking**: link-work-items
//! - **AI**: analyze-work-items (requires host sampling)
//! - **Introspection**: get-prompts, get-metrics

mod registry;

mod analyze;
mod bulk_ops;
mod handle;
mod introspect;
mod link;
mod query;

pub use registry::ToolRegistry;

use crate::bulk::BulkEngine;
use crate::config::ServerConfig;
use crate::handles::QueryHandleStore;
use crate::metrics::MetricsRegistry;
use crate::sampling::SamplingClient;
use adowit_auth::TokenProvider;
use adowit_client::AdoClient;
use adowit_protocol::{ToolDefinition, ToolResponse};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Shared state handed to every tool execution.
pub struct ToolContext {
    pub config: ServerConfig,
    pub store: Arc<QueryHandleStore>,
    pub client: Arc<dyn AdoClient>,
    pub tokens: Arc<TokenProvider>,
    pub engine: Arc<BulkEngine>,
    pub metrics: Arc<MetricsRegistry>,
    pub sampling: Option<Arc<dyn SamplingClient>>,
}

/// Trait for MCP tools.
#[async_trait]
pub trait McpTool: Send + Sync {
    /// Tool name (e.g. "wiql-query")
    fn name(&self) -> &'static str;

    /// Human-readable description
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters
    fn input_schema(&self) -> Value;

    /// AI tools need the host's sampling capability.
    fn requires_sampling(&self) -> bool {
        false
    }

    /// Bulk tools run under the longer timeout.
    fn is_bulk(&self) -> bool {
        false
    }

    /// Execute the tool. Every outcome is an envelope; no error escapes.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResponse;

    /// Definition for tools/list.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Validate arguments against a tool input schema.
///
/// Checks required fields, primitive types, and enum membership; unknown
/// fields pass through. Errors carry the field path.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), Vec<String>> {
    let empty = serde_json::Map::new();
    let object = match args {
        Value::Null => &empty,
        Value::Object(map) => map,
        _ => {
            return Err(vec![
                "Validation error: arguments: expected an object".to_string()
            ])
        }
    };

    let mut errors = Vec::new();

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(field) {
                errors.push(format!("Validation error: {field}: required field is missing"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (field, property) in properties {
            let Some(value) = object.get(field) else {
                continue;
            };
            if let Some(expected) = property.get("type").and_then(Value::as_str) {
                if !type_matches(expected, value) {
                    errors.push(format!(
                        "Validation error: {field}: expected {expected}, got {}",
                        type_name(value)
                    ));
                    continue;
                }
            }
            if let Some(allowed) = property.get("enum").and_then(Value::as_array) {
                if !allowed.contains(value) {
                    let rendered: Vec<String> =
                        allowed.iter().map(|v| v.to_string()).collect();
                    errors.push(format!(
                        "Validation error: {field}: must be one of {}",
                        rendered.join(", ")
                    ));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// One-line usage tip rendered from a tool schema.
pub fn schema_tip(schema: &Value) -> String {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let optional: Vec<&str> = schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .keys()
                .map(String::as_str)
                .filter(|name| !required.contains(name))
                .collect()
        })
        .unwrap_or_default();

    match (required.is_empty(), optional.is_empty()) {
        (true, true) => "Tip: this tool takes no arguments".to_string(),
        (true, false) => format!("Tip: optional fields: {}", optional.join(", ")),
        (false, true) => format!("Tip: required fields: {}", required.join(", ")),
        (false, false) => format!(
            "Tip: required fields: {}; optional: {}",
            required.join(", "),
            optional.join(", ")
        ),
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
