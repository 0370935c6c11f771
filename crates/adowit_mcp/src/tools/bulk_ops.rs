//! Bulk operation tools.
//!
//! `execute-bulk-operations` exposes the full multi-action engine; the
//! remaining tools are one-action conveniences over the same engine. The
//! comment and update conveniences default to a larger preview slice than
//! the engine's own default.

use super::{McpTool, ToolContext};
use crate::bulk::{BulkAction, BulkRequest};
use adowit_client::PatchOp;
use adowit_protocol::ToolResponse;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

/// Preview default for the comment/update convenience tools.
const WIDE_PREVIEW_ITEMS: usize = 10;

/// Fields shared by every bulk convenience tool.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommonArgs {
    query_handle: String,
    #[serde(default)]
    item_selector: Option<Value>,
    #[serde(default)]
    dry_run: bool,
    #[serde(default)]
    max_preview_items: Option<usize>,
}

/// Schema for a convenience tool: the shared fields plus action-specific
/// properties.
fn bulk_schema(extra_properties: Value, required: &[&str]) -> Value {
    let mut properties = json!({
        "queryHandle": { "type": "string", "description": "Handle returned by a query tool" },
        "itemSelector": {
            "description": "\"all\", an array of indices, or a criteria object (default all)"
        },
        "dryRun": { "type": "boolean", "description": "Preview without touching the backend" },
        "maxPreviewItems": { "type": "integer" }
    });
    if let (Some(base), Some(extra)) = (properties.as_object_mut(), extra_properties.as_object()) {
        for (key, value) in extra {
            base.insert(key.clone(), value.clone());
        }
    }
    let mut all_required = vec!["queryHandle"];
    all_required.extend_from_slice(required);
    json!({ "type": "object", "properties": properties, "required": all_required })
}

/// Run a single action through the engine.
async fn run_single(
    ctx: &ToolContext,
    common: CommonArgs,
    action: BulkAction,
    default_preview: Option<usize>,
) -> ToolResponse {
    let request = BulkRequest {
        query_handle: common.query_handle,
        item_selector: common.item_selector,
        actions: vec![action],
        dry_run: common.dry_run,
        stop_on_error: false,
        max_preview_items: common.max_preview_items.or(default_preview),
    };
    ctx.engine.execute(request).await
}

fn args_error(err: impl std::fmt::Display, source: &str) -> ToolResponse {
    ToolResponse::error(format!("Validation error: {err}"), source)
}

// ---------------------------------------------------------------------------
// The unified executor
// ---------------------------------------------------------------------------

pub struct ExecuteBulkOperationsTool;

#[async_trait]
impl McpTool for ExecuteBulkOperationsTool {
    fn name(&self) -> &'static str {
        "execute-bulk-operations"
    }

    fn description(&self) -> &'static str {
        "Apply an ordered list of actions (comment, assign, update, remove, transition-state, \
         move-iteration, add-tag, remove-tag) to the items a selector picks from a query handle"
    }

    fn input_schema(&self) -> Value {
        bulk_schema(
            json!({
                "actions": {
                    "type": "array",
                    "description": "Actions executed in order; each has a \"type\" and its fields"
                },
                "stopOnError": {
                    "type": "boolean",
                    "description": "Skip remaining actions once an action records a failure"
                }
            }),
            &["actions"],
        )
    }

    fn is_bulk(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResponse {
        let request: BulkRequest = match serde_json::from_value(args) {
            Ok(request) => request,
            Err(err) => return args_error(err, self.name()),
        };
        ctx.engine.execute(request).await
    }
}

// ---------------------------------------------------------------------------
// One-action conveniences
// ---------------------------------------------------------------------------

pub struct BulkCommentTool;

#[derive(Debug, Deserialize)]
struct BulkCommentArgs {
    #[serde(flatten)]
    common: CommonArgs,
    comment: String,
}

#[async_trait]
impl McpTool for BulkCommentTool {
    fn name(&self) -> &'static str {
        "bulk-comment"
    }

    fn description(&self) -> &'static str {
        "Append the same comment to every selected work item"
    }

    fn input_schema(&self) -> Value {
        bulk_schema(
            json!({ "comment": { "type": "string", "description": "Comment text" } }),
            &["comment"],
        )
    }

    fn is_bulk(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResponse {
        let args: BulkCommentArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(err) => return args_error(err, self.name()),
        };
        run_single(
            ctx,
            args.common,
            BulkAction::Comment {
                comment: args.comment,
            },
            Some(WIDE_PREVIEW_ITEMS),
        )
        .await
    }
}

pub struct BulkAssignTool;

#[derive(Debug, Deserialize)]
struct BulkAssignArgs {
    #[serde(flatten)]
    common: CommonArgs,
    #[serde(rename = "assignTo")]
    assign_to: String,
    #[serde(default)]
    comment: Option<String>,
}

#[async_trait]
impl McpTool for BulkAssignTool {
    fn name(&self) -> &'static str {
        "bulk-assign"
    }

    fn description(&self) -> &'static str {
        "Assign every selected work item to the given identity"
    }

    fn input_schema(&self) -> Value {
        bulk_schema(
            json!({
                "assignTo": { "type": "string", "description": "Assignee email or display name" },
                "comment": { "type": "string", "description": "Optional comment appended after assignment" }
            }),
            &["assignTo"],
        )
    }

    fn is_bulk(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResponse {
        let args: BulkAssignArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(err) => return args_error(err, self.name()),
        };
        run_single(
            ctx,
            args.common,
            BulkAction::Assign {
                assign_to: args.assign_to,
                comment: args.comment,
            },
            None,
        )
        .await
    }
}

pub struct BulkUpdateTool;

#[derive(Debug, Deserialize)]
struct BulkUpdateArgs {
    #[serde(flatten)]
    common: CommonArgs,
    updates: Vec<PatchOp>,
}

#[async_trait]
impl McpTool for BulkUpdateTool {
    fn name(&self) -> &'static str {
        "bulk-update"
    }

    fn description(&self) -> &'static str {
        "Apply JSON-patch field operations to every selected work item"
    }

    fn input_schema(&self) -> Value {
        bulk_schema(
            json!({
                "updates": {
                    "type": "array",
                    "description": "JSON-patch operations, e.g. {\"op\":\"add\",\"path\":\"/fields/System.Priority\",\"value\":1}"
                }
            }),
            &["updates"],
        )
    }

    fn is_bulk(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResponse {
        let args: BulkUpdateArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(err) => return args_error(err, self.name()),
        };
        run_single(
            ctx,
            args.common,
            BulkAction::Update {
                updates: args.updates,
            },
            Some(WIDE_PREVIEW_ITEMS),
        )
        .await
    }
}

pub struct BulkRemoveTool;

#[derive(Debug, Deserialize)]
struct BulkRemoveArgs {
    #[serde(flatten)]
    common: CommonArgs,
    #[serde(rename = "removeReason")]
    remove_reason: String,
}

#[async_trait]
impl McpTool for BulkRemoveTool {
    fn name(&self) -> &'static str {
        "bulk-remove"
    }

    fn description(&self) -> &'static str {
        "Comment the removal reason on every selected item, then transition it to Removed"
    }

    fn input_schema(&self) -> Value {
        bulk_schema(
            json!({ "removeReason": { "type": "string", "description": "Reason recorded before removal" } }),
            &["removeReason"],
        )
    }

    fn is_bulk(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResponse {
        let args: BulkRemoveArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(err) => return args_error(err, self.name()),
        };
        run_single(
            ctx,
            args.common,
            BulkAction::Remove {
                remove_reason: args.remove_reason,
            },
            None,
        )
        .await
    }
}

pub struct BulkTransitionStateTool;

#[derive(Debug, Deserialize)]
struct BulkTransitionArgs {
    #[serde(flatten)]
    common: CommonArgs,
    #[serde(rename = "targetState")]
    target_state: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    comment: Option<String>,
}

#[async_trait]
impl McpTool for BulkTransitionStateTool {
    fn name(&self) -> &'static str {
        "bulk-transition-state"
    }

    fn description(&self) -> &'static str {
        "Transition every selected work item to the target state"
    }

    fn input_schema(&self) -> Value {
        bulk_schema(
            json!({
                "targetState": { "type": "string" },
                "reason": { "type": "string", "description": "Optional state reason" },
                "comment": { "type": "string", "description": "Optional history comment" }
            }),
            &["targetState"],
        )
    }

    fn is_bulk(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResponse {
        let args: BulkTransitionArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(err) => return args_error(err, self.name()),
        };
        run_single(
            ctx,
            args.common,
            BulkAction::TransitionState {
                target_state: args.target_state,
                reason: args.reason,
                comment: args.comment,
            },
            None,
        )
        .await
    }
}

pub struct BulkMoveIterationTool;

#[derive(Debug, Deserialize)]
struct BulkMoveIterationArgs {
    #[serde(flatten)]
    common: CommonArgs,
    #[serde(rename = "targetIterationPath")]
    target_iteration_path: String,
    #[serde(default)]
    comment: Option<String>,
    #[serde(rename = "updateChildItems", default)]
    update_child_items: bool,
}

#[async_trait]
impl McpTool for BulkMoveIterationTool {
    fn name(&self) -> &'static str {
        "bulk-move-iteration"
    }

    fn description(&self) -> &'static str {
        "Move every selected work item to the target iteration (path validated first)"
    }

    fn input_schema(&self) -> Value {
        bulk_schema(
            json!({
                "targetIterationPath": { "type": "string", "description": "e.g. Project\\Sprint 13" },
                "comment": { "type": "string" },
                "updateChildItems": { "type": "boolean", "description": "Also move child items" }
            }),
            &["targetIterationPath"],
        )
    }

    fn is_bulk(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResponse {
        let args: BulkMoveIterationArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(err) => return args_error(err, self.name()),
        };
        run_single(
            ctx,
            args.common,
            BulkAction::MoveIteration {
                target_iteration_path: args.target_iteration_path,
                comment: args.comment,
                update_child_items: args.update_child_items,
            },
            None,
        )
        .await
    }
}

pub struct BulkAddTagTool;

#[derive(Debug, Deserialize)]
struct BulkTagArgs {
    #[serde(flatten)]
    common: CommonArgs,
    /// Semicolon-separated tag list
    tags: String,
}

#[async_trait]
impl McpTool for BulkAddTagTool {
    fn name(&self) -> &'static str {
        "bulk-add-tag"
    }

    fn description(&self) -> &'static str {
        "Add semicolon-separated tags to every selected work item (existing tags preserved)"
    }

    fn input_schema(&self) -> Value {
        bulk_schema(
            json!({ "tags": { "type": "string", "description": "e.g. \"tech-debt; needs-triage\"" } }),
            &["tags"],
        )
    }

    fn is_bulk(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResponse {
        let args: BulkTagArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(err) => return args_error(err, self.name()),
        };
        run_single(ctx, args.common, BulkAction::AddTag { tags: args.tags }, None).await
    }
}

pub struct BulkRemoveTagTool;

#[async_trait]
impl McpTool for BulkRemoveTagTool {
    fn name(&self) -> &'static str {
        "bulk-remove-tag"
    }

    fn description(&self) -> &'static str {
        "Remove semicolon-separated tags from every selected work item"
    }

    fn input_schema(&self) -> Value {
        bulk_schema(
            json!({ "tags": { "type": "string", "description": "Tags to remove (match is case-insensitive)" } }),
            &["tags"],
        )
    }

    fn is_bulk(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResponse {
        let args: BulkTagArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(err) => return args_error(err, self.name()),
        };
        run_single(ctx, args.common, BulkAction::RemoveTag { tags: args.tags }, None).await
    }
}
