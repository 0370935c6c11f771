//! Introspection tools: prompt templates and server metrics.

use super::{McpTool, ToolContext};
use crate::prompts;
use adowit_protocol::ToolResponse;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetPromptsArgs {
    #[serde(default)]
    prompt_name: Option<String>,
    #[serde(default)]
    include_content: bool,
    #[serde(default)]
    args: Option<Map<String, Value>>,
}

pub struct GetPromptsTool;

#[async_trait]
impl McpTool for GetPromptsTool {
    fn name(&self) -> &'static str {
        "get-prompts"
    }

    fn description(&self) -> &'static str {
        "List registered prompt templates, optionally rendering one with arguments"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "promptName": { "type": "string", "description": "Return only this template" },
                "includeContent": { "type": "boolean", "description": "Include (rendered) template content" },
                "args": { "type": "object", "description": "Arguments substituted into {{placeholders}}" }
            }
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolResponse {
        let args: GetPromptsArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(err) => {
                return ToolResponse::error(format!("Validation error: {err}"), self.name())
            }
        };

        let selected: Vec<&prompts::PromptTemplate> = match &args.prompt_name {
            Some(name) => match prompts::find(name) {
                Some(template) => vec![template],
                None => {
                    return ToolResponse::error(
                        format!("Validation error: promptName: unknown prompt '{name}'"),
                        self.name(),
                    )
                }
            },
            None => prompts::all().iter().collect(),
        };

        let template_args = args.args.unwrap_or_default();
        let rendered: Vec<Value> = selected
            .iter()
            .map(|template| {
                let mut entry = json!({
                    "name": template.name,
                    "description": template.description,
                    "arguments": template.arguments,
                });
                if args.include_content {
                    entry["content"] = json!(template.render(&template_args));
                }
                entry
            })
            .collect();

        ToolResponse::ok(json!({ "prompts": rendered }), self.name())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetMetricsArgs {
    #[serde(default)]
    reset_uptime: bool,
}

pub struct GetMetricsTool;

#[async_trait]
impl McpTool for GetMetricsTool {
    fn name(&self) -> &'static str {
        "get-metrics"
    }

    fn description(&self) -> &'static str {
        "Snapshot server metrics: counters, histogram statistics, gauges, and uptime"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "resetUptime": { "type": "boolean", "description": "Reset the uptime clock after reading" }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResponse {
        let args: GetMetricsArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(err) => {
                return ToolResponse::error(format!("Validation error: {err}"), self.name())
            }
        };

        ctx.metrics
            .set_gauge("handles_live", &[], ctx.store.handle_count() as f64);
        let snapshot = ctx.metrics.snapshot();
        if args.reset_uptime {
            ctx.metrics.reset_uptime();
        }

        let token = ctx.tokens.token_info().map(|info| {
            json!({ "expires_in_secs": info.expires_in_secs, "is_cached": info.is_cached })
        });

        let data = json!({
            "uptime_secs": snapshot.uptime_secs,
            "counters": snapshot.counters,
            "gauges": snapshot.gauges,
            "histograms": snapshot.histograms,
            "token": token,
        });
        ToolResponse::ok(data, self.name())
    }
}
