//! The uniform tool result envelope.
//!
//! Every tool returns this shape regardless of outcome. `success=false`
//! always carries at least one error; `success=true` may still carry
//! warnings (partial preconditions, skipped items, deprecations).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Uniform result envelope returned by every tool handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,
    pub data: Option<Value>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl ToolResponse {
    /// Successful envelope with payload; `source` names the producing component.
    pub fn ok(data: Value, source: &str) -> Self {
        Self {
            success: true,
            data: Some(data),
            errors: Vec::new(),
            warnings: Vec::new(),
            metadata: source_metadata(source),
        }
    }

    /// Failed envelope. An empty error list is coerced to a generic message
    /// so the `success=false ⇒ errors non-empty` invariant holds.
    pub fn failure(errors: Vec<String>, source: &str) -> Self {
        let errors = if errors.is_empty() {
            vec!["Unknown error".to_string()]
        } else {
            errors
        };
        Self {
            success: false,
            data: None,
            errors,
            warnings: Vec::new(),
            metadata: source_metadata(source),
        }
    }

    /// Single-error convenience.
    pub fn error(message: impl Into<String>, source: &str) -> Self {
        Self::failure(vec![message.into()], source)
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    /// Attach partial data to a failed envelope (e.g. per-item counts).
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

fn source_metadata(source: &str) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("source".to_string(), Value::String(source.to_string()));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ok_carries_source() {
        let resp = ToolResponse::ok(json!({"count": 3}), "wiql-query");
        assert!(resp.success);
        assert_eq!(resp.metadata["source"], "wiql-query");
        assert!(resp.errors.is_empty());
    }

    #[test]
    fn failure_never_has_empty_errors() {
        let resp = ToolResponse::failure(Vec::new(), "bulk-engine");
        assert!(!resp.success);
        assert!(!resp.errors.is_empty());
    }

    #[test]
    fn failure_may_carry_partial_data() {
        let resp = ToolResponse::error("1 item(s) failed", "bulk-engine")
            .with_data(json!({"successful": 3, "failed": 1}));
        assert!(!resp.success);
        assert_eq!(resp.data.unwrap()["failed"], 1);
    }

    #[test]
    fn warnings_survive_success() {
        let resp = ToolResponse::ok(json!({}), "x").with_warning("item already in target state");
        assert!(resp.success);
        assert_eq!(resp.warnings.len(), 1);
    }
}
