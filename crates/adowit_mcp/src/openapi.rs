//! Generated OpenAPI 3.0 document.
//!
//! Every registered tool becomes a `POST /tools/<tool-name>` operation whose
//! request body is the tool's input schema. Tools needing AI sampling carry
//! the `x-requires-sampling` extension flag.

use crate::tools::ToolRegistry;
use serde_json::{json, Map, Value};

/// Build the OpenAPI document for the current tool surface.
pub fn build_document(registry: &ToolRegistry, name: &str, version: &str) -> Value {
    let mut paths = Map::new();

    for tool in registry.iter_sorted() {
        let mut operation = json!({
            "operationId": tool.name(),
            "summary": tool.description(),
            "requestBody": {
                "required": true,
                "content": {
                    "application/json": { "schema": tool.input_schema() }
                }
            },
            "responses": {
                "200": {
                    "description": "Tool result envelope",
                    "content": {
                        "application/json": {
                            "schema": { "$ref": "#/components/schemas/ToolResponse" }
                        }
                    }
                },
                "400": { "description": "Validation failure" },
                "500": { "description": "Internal error" }
            }
        });
        if tool.requires_sampling() {
            operation["x-requires-sampling"] = json!(true);
        }
        paths.insert(
            format!("/tools/{}", tool.name()),
            json!({ "post": operation }),
        );
    }

    json!({
        "openapi": "3.0.3",
        "info": {
            "title": name,
            "version": version,
            "description": "MCP tool surface for Azure DevOps work tracking, \
                            rendered as HTTP operations"
        },
        "paths": paths,
        "components": {
            "schemas": {
                "ToolResponse": envelope_schema()
            }
        }
    })
}

fn envelope_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "success": { "type": "boolean" },
            "data": { "nullable": true },
            "errors": { "type": "array", "items": { "type": "string" } },
            "warnings": { "type": "array", "items": { "type": "string" } },
            "metadata": {
                "type": "object",
                "properties": { "source": { "type": "string" } },
                "required": ["source"]
            }
        },
        "required": ["success", "errors", "warnings", "metadata"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_covers_every_tool() {
        let registry = ToolRegistry::new();
        let document = build_document(&registry, "adowit", "0.1.0");

        assert_eq!(document["openapi"], "3.0.3");
        let paths = document["paths"].as_object().unwrap();
        assert_eq!(paths.len(), registry.len());
        assert!(paths.contains_key("/tools/wiql-query"));

        let bulk = &paths["/tools/execute-bulk-operations"]["post"];
        assert_eq!(bulk["requestBody"]["required"], true);
        assert!(bulk["responses"]["200"].is_object());
        assert!(bulk["responses"]["400"].is_object());
        assert!(bulk["responses"]["500"].is_object());
    }

    #[test]
    fn ai_tools_carry_the_sampling_flag() {
        let registry = ToolRegistry::new();
        let document = build_document(&registry, "adowit", "0.1.0");

        let analyze = &document["paths"]["/tools/analyze-work-items"]["post"];
        assert_eq!(analyze["x-requires-sampling"], true);

        let wiql = &document["paths"]["/tools/wiql-query"]["post"];
        assert!(wiql.get("x-requires-sampling").is_none());
    }

    #[test]
    fn envelope_schema_is_referenced() {
        let registry = ToolRegistry::new();
        let document = build_document(&registry, "adowit", "0.1.0");
        assert!(document["components"]["schemas"]["ToolResponse"].is_object());
    }
}
