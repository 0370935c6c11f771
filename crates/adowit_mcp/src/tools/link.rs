//! The two-handle link tool.

use super::{McpTool, ToolContext};
use crate::bulk::LinkRequest;
use adowit_protocol::ToolResponse;
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct LinkWorkItemsTool;

#[async_trait]
impl McpTool for LinkWorkItemsTool {
    fn name(&self) -> &'static str {
        "link-work-items"
    }

    fn description(&self) -> &'static str {
        "Link items from a source query handle to items from a target handle under a pairing strategy"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sourceQueryHandle": { "type": "string" },
                "targetQueryHandle": { "type": "string" },
                "linkType": {
                    "type": "string",
                    "enum": ["Parent", "Child", "Related", "Successor", "Predecessor"]
                },
                "linkStrategy": {
                    "type": "string",
                    "enum": ["one-to-one", "one-to-many", "many-to-one", "many-to-many"]
                },
                "skipExisting": {
                    "type": "boolean",
                    "description": "Skip pairs where an identical relation already exists"
                },
                "dryRun": { "type": "boolean" },
                "maxPreviewItems": { "type": "integer" }
            },
            "required": ["sourceQueryHandle", "targetQueryHandle", "linkType", "linkStrategy"]
        })
    }

    fn is_bulk(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResponse {
        let request: LinkRequest = match serde_json::from_value(args) {
            Ok(request) => request,
            Err(err) => {
                return ToolResponse::error(format!("Validation error: {err}"), self.name())
            }
        };
        ctx.engine.execute_link(request).await
    }
}
