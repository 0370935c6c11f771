//! Tool registry: discovery and dispatch by name.

use super::{analyze, bulk_ops, handle, introspect, link, query, McpTool, ToolContext};
use adowit_protocol::{ToolDefinition, ToolResponse};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

pub struct ToolRegistry {
    tools: HashMap<&'static str, Box<dyn McpTool>>,
}

impl ToolRegistry {
    /// Registry with every tool registered.
    pub fn new() -> Self {
        let mut registry = Self {
            tools: HashMap::new(),
        };

        registry.register(Box::new(query::WiqlQueryTool));
        registry.register(Box::new(query::OdataQueryTool));
        registry.register(Box::new(handle::QueryHandleInfoTool));
        registry.register(Box::new(handle::SelectItemsTool));
        registry.register(Box::new(bulk_ops::ExecuteBulkOperationsTool));
        registry.register(Box::new(bulk_ops::BulkCommentTool));
        registry.register(Box::new(bulk_ops::BulkAssignTool));
        registry.register(Box::new(bulk_ops::BulkUpdateTool));
        registry.register(Box::new(bulk_ops::BulkRemoveTool));
        registry.register(Box::new(bulk_ops::BulkTransitionStateTool));
        registry.register(Box::new(bulk_ops::BulkMoveIterationTool));
        registry.register(Box::new(bulk_ops::BulkAddTagTool));
        registry.register(Box::new(bulk_ops::BulkRemoveTagTool));
        registry.register(Box::new(link::LinkWorkItemsTool));
        registry.register(Box::new(analyze::AnalyzeWorkItemsTool));
        registry.register(Box::new(introspect::GetPromptsTool));
        registry.register(Box::new(introspect::GetMetricsTool));

        debug!("Registered {} tools", registry.tools.len());
        registry
    }

    fn register(&mut self, tool: Box<dyn McpTool>) {
        self.tools.insert(tool.name(), tool);
    }

    /// Definitions for tools/list, sorted by name for stable output.
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn get(&self, name: &str) -> Option<&dyn McpTool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Iterate tools in name order (OpenAPI generation).
    pub fn iter_sorted(&self) -> impl Iterator<Item = &dyn McpTool> {
        let mut tools: Vec<&dyn McpTool> = self.tools.values().map(|t| t.as_ref()).collect();
        tools.sort_by_key(|t| t.name());
        tools.into_iter()
    }

    /// Dispatch a call by name. An unknown tool yields a structured failure
    /// envelope, not a protocol error.
    pub async fn call_tool(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResponse {
        let Some(tool) = self.get(name) else {
            return ToolResponse::error(format!("Unknown tool: {name}"), "dispatcher");
        };

        if let Err(errors) = super::validate_args(&tool.input_schema(), &args) {
            return ToolResponse::failure(errors, "dispatcher")
                .with_warning(super::schema_tip(&tool.input_schema()));
        }

        tool.execute(args, ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
