//! AI-assisted analysis over a query handle selection.

use super::{McpTool, ToolContext};
use crate::prompts;
use crate::sampling::{PromptMessage, SAMPLING_UNAVAILABLE};
use adowit_protocol::ToolResponse;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// Cap on items fed into a single prompt.
const MAX_ANALYZED_ITEMS: usize = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeArgs {
    query_handle: String,
    #[serde(default)]
    item_selector: Option<Value>,
    #[serde(default)]
    focus: Option<String>,
    #[serde(default)]
    prompt_name: Option<String>,
}

pub struct AnalyzeWorkItemsTool;

#[async_trait]
impl McpTool for AnalyzeWorkItemsTool {
    fn name(&self) -> &'static str {
        "analyze-work-items"
    }

    fn description(&self) -> &'static str {
        "Run an AI analysis prompt over the selected work items (requires host sampling support)"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "queryHandle": { "type": "string" },
                "itemSelector": {
                    "description": "\"all\", an array of indices, or a criteria object (default all)"
                },
                "focus": { "type": "string", "description": "What the analysis should concentrate on" },
                "promptName": {
                    "type": "string",
                    "description": "Registered prompt template (default work-item-analyzer)"
                }
            },
            "required": ["queryHandle"]
        })
    }

    fn requires_sampling(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResponse {
        let args: AnalyzeArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(err) => {
                return ToolResponse::error(format!("Validation error: {err}"), self.name())
            }
        };

        let Some(sampling) = ctx.sampling.as_ref() else {
            return ToolResponse::error(SAMPLING_UNAVAILABLE, self.name());
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
                "Validation error: itemSelector: unrecognized selector shape",
                self.name(),
            );
        };
        if selected.is_empty() {
            return ToolResponse::error("No work items matched the item selector", self.name());
        }

        let prompt_name = args.prompt_name.as_deref().unwrap_or("work-item-analyzer");
        let Some(template) = prompts::find(prompt_name) else {
            return ToolResponse::error(
                format!("Validation error: promptName: unknown prompt '{prompt_name}'"),
                self.name(),
            );
        };

        let analyzed = &selected[..selected.len().min(MAX_ANALYZED_ITEMS)];
        let items_text: Vec<String> = analyzed
            .iter()
            .map(|id| {
                match record
                    .item_context
                    .as_ref()
                    .and_then(|context| context.get(id))
                {
                    Some(item) => format!(
                        "#{id} {} ({}, {}{})",
                        item.title,
                        item.state,
                        item.work_item_type,
                        item.days_inactive
                            .map(|d| format!(", {d}d inactive"))
                            .unwrap_or_default()
                    ),
                    None => format!("#{id}"),
                }
            })
            .collect();

        let mut template_args = Map::new();
        template_args.insert("items".to_string(), json!(items_text.join("\n")));
        template_args.insert(
            "focus".to_string(),
            json!(args.focus.as_deref().unwrap_or("general triage")),
        );
        let prompt = template.render(&template_args);

        let reply = match sampling
            .create_message(&[PromptMessage::user(prompt)])
            .await
        {
            Ok(reply) => reply,
            Err(err) => {
                return ToolResponse::error(format!("Sampling failed: {err}"), self.name())
            }
        };

        ctx.metrics.increment_counter("ai_analyses", &[]);

        let mut warnings = Vec::new();
        if analyzed.len() < selected.len() {
            warnings.push(format!(
                "Analyzed the first {} of {} selected item(s)",
                analyzed.len(),
                selected.len()
            ));
        }

        let data = json!({
            "prompt_name": template.name,
            "analyzed_items_count": analyzed.len(),
            "selected_items_count": selected.len(),
            "analysis": reply.text,
            "usage": reply.usage,
        });
        ToolResponse::ok(data, self.name()).with_warnings(warnings)
    }
}
