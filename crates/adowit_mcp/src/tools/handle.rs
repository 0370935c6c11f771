//! Handle introspection tools.

use super::{McpTool, ToolContext};
use adowit_protocol::ToolResponse;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HandleInfoArgs {
    query_handle: String,
}

pub struct QueryHandleInfoTool;

#[async_trait]
impl McpTool for QueryHandleInfoTool {
    fn name(&self) -> &'static str {
        "query-handle-info"
    }

    fn description(&self) -> &'static str {
        "Inspect a query handle: item count, source query, metadata, and remaining lifetime"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "queryHandle": { "type": "string", "description": "Handle returned by a query tool" }
            },
            "required": ["queryHandle"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResponse {
        let args: HandleInfoArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(err) => {
                return ToolResponse::error(format!("Validation error: {err}"), self.name())
            }
        };

        let Some(record) = ctx.store.get_query_data(&args.query_handle) else {
            return ToolResponse::error(
                format!("Query handle '{}' not found or expired", args.query_handle),
                self.name(),
            );
        };

        let expires_in_secs = (record.expires_at - Utc::now()).num_seconds().max(0);
        let data = json!({
            "query_handle": args.query_handle,
            "work_item_count": record.work_item_ids.len(),
            "source_query": record.source_query,
            "project": record.metadata.project,
            "query_type": record.metadata.query_type,
            "has_item_context": record.item_context.is_some(),
            "analysis_metadata": record.analysis_metadata,
            "created_at": record.created_at.to_rfc3339(),
            "expires_at": record.expires_at.to_rfc3339(),
            "expires_in_secs": expires_in_secs,
        });
        ToolResponse::ok(data, self.name())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectItemsArgs {
    query_handle: String,
    #[serde(default)]
    item_selector: Option<Value>,
    #[serde(default)]
    preview_count: Option<usize>,
}

pub struct SelectItemsTool;

#[async_trait]
impl McpTool for SelectItemsTool {
    fn name(&self) -> &'static str {
        "select-items-from-query-handle"
    }

    fn description(&self) -> &'static str {
        "Resolve an item selector against a query handle and preview the selected items"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "queryHandle": { "type": "string" },
                "itemSelector": {
                    "description": "\"all\", an array of indices, or a criteria object (default all)"
                },
                "previewCount": { "type": "integer", "description": "Items to include in the preview (default 10)" }
            },
            "required": ["queryHandle"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResponse {
        let args: SelectItemsArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(err) => {
                return ToolResponse::error(format!("Validation error: {err}"), self.name())
            }
        };

        let Some(record) = ctx.store.get_query_data(&args.query_handle) else {
            return ToolResponse::error(
                format!("Query handle '{}' not found or expired", args.query_handle),
                self.name(),
            );
        };

        let selector = args.item_selector.unwrap_or_else(|| json!("all"));
        let Some(selected) = ctx.store.resolve_item_selector(&args.query_handle, &selector) else {
            return ToolResponse::error(
                "Validation error: itemSelector: unrecognized selector shape \
                 (expected \"all\", an index array, or a criteria object)",
                self.name(),
            );
        };

        let preview_count = args.preview_count.unwrap_or(10).min(selected.len());
        let preview: Vec<Value> = selected[..preview_count]
            .iter()
            .map(|id| {
                match record
                    .item_context
                    .as_ref()
                    .and_then(|context| context.get(id))
                {
                    Some(item) => json!({
                        "id": id,
                        "title": item.title,
                        "state": item.state,
                        "type": item.work_item_type,
                        "daysInactive": item.days_inactive,
                    }),
                    None => json!({ "id": id }),
                }
            })
            .collect();

        let data = json!({
            "query_handle": args.query_handle,
            "selected_items_count": selected.len(),
            "total_items_in_handle": record.work_item_ids.len(),
            "selected_ids": selected,
            "preview_items": preview,
        });
        ToolResponse::ok(data, self.name())
    }
}
