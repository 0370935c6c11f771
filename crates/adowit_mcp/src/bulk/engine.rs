//! The sequential multi-action executor.

use super::actions::BulkAction;
use super::link::{self, LinkRequest};
use crate::handles::{QueryHandleRecord, QueryHandleStore};
use crate::metrics::MetricsRegistry;
use adowit_client::AdoClient;
use adowit_protocol::{ItemSelector, ToolResponse, WorkItemContext};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Uniform preview default; convenience tools may pass their own.
pub const DEFAULT_PREVIEW_ITEMS: usize = 5;

const SOURCE: &str = "bulk-engine";

/// Inputs of a single-handle bulk call.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRequest {
    pub query_handle: String,

    /// `"all"`, an index array, or a criteria object. Defaults to all.
    #[serde(default)]
    pub item_selector: Option<Value>,

    pub actions: Vec<BulkAction>,

    #[serde(default)]
    pub dry_run: bool,

    /// Skip remaining actions once an action records a failure.
    #[serde(default)]
    pub stop_on_error: bool,

    #[serde(default)]
    pub max_preview_items: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ItemSuccess {
    id: i64,
    result: String,
}

#[derive(Debug, Serialize)]
struct ItemFailure {
    id: i64,
    error: String,
}

/// Per-action outcome in the result payload.
#[derive(Debug, Serialize)]
struct ActionReport {
    action: &'static str,
    executed: bool,
    succeeded: Vec<ItemSuccess>,
    failed: Vec<ItemFailure>,
}

/// Runs bulk requests against the ADO client, addressing items through the
/// query handle store.
pub struct BulkEngine {
    client: Arc<dyn AdoClient>,
    store: Arc<QueryHandleStore>,
    metrics: Arc<MetricsRegistry>,
}

impl BulkEngine {
    pub fn new(
        client: Arc<dyn AdoClient>,
        store: Arc<QueryHandleStore>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            client,
            store,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<QueryHandleStore> {
        &self.store
    }

    pub fn client(&self) -> &Arc<dyn AdoClient> {
        &self.client
    }

    pub(crate) fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Execute a single-handle bulk request.
    pub async fn execute(&self, request: BulkRequest) -> ToolResponse {
        let Some(record) = self.store.get_query_data(&request.query_handle) else {
            return ToolResponse::error(
                format!(
                    "Query handle '{}' not found or expired; re-run the query to get a fresh handle",
                    handle_prefix(&request.query_handle)
                ),
                SOURCE,
            );
        };

        if request.actions.is_empty() {
            return ToolResponse::error(
                "Validation error: actions: at least one action is required",
                SOURCE,
            );
        }

        let selector_value = request.item_selector.clone().unwrap_or_else(|| json!("all"));
        let Some(selector) = ItemSelector::from_value(&selector_value) else {
            return ToolResponse::error(
                "Validation error: itemSelector: unrecognized selector shape \
                 (expected \"all\", an index array, or a criteria object)",
                SOURCE,
            );
        };

        let Some(selected) = self.store.resolve_selector(&request.query_handle, &selector) else {
            // The handle raced expiry between the reads.
            return ToolResponse::error(
                format!(
                    "Query handle '{}' not found or expired; re-run the query to get a fresh handle",
                    handle_prefix(&request.query_handle)
                ),
                SOURCE,
            );
        };

        if selected.is_empty() {
            return ToolResponse::error("No work items matched the item selector", SOURCE);
        }

        let total = record.work_item_ids.len();
        let max_preview = request.max_preview_items.unwrap_or(DEFAULT_PREVIEW_ITEMS);
        let preview_count = max_preview.min(selected.len());
        let preview_items = build_preview(&record, &selected[..preview_count]);
        let preview_message = (preview_count < selected.len())
            .then(|| format!("Showing {} of {} items...", preview_count, selected.len()));

        if request.dry_run {
            debug!(
                handle = %request.query_handle,
                selected = selected.len(),
                "Bulk dry run"
            );
            let mut data = json!({
                "dry_run": true,
                "preview_items": preview_items,
                "selected_items_count": selected.len(),
                "total_items_in_handle": total,
                "actions": request.actions.iter().map(|a| a.label()).collect::<Vec<_>>(),
            });
            if let Some(message) = &preview_message {
                data["preview_message"] = json!(message);
            }
            return ToolResponse::ok(data, SOURCE);
        }

        // Actions referencing external entities validate before any mutation.
        if let Err(response) = self.validate_actions(&request.actions).await {
            return response;
        }

        let mut warnings = Vec::new();
        let mut reports: Vec<ActionReport> = Vec::with_capacity(request.actions.len());
        let mut stopped = false;

        for action in &request.actions {
            if stopped {
                reports.push(ActionReport {
                    action: action.label(),
                    executed: false,
                    succeeded: Vec::new(),
                    failed: Vec::new(),
                });
                continue;
            }

            let mut report = ActionReport {
                action: action.label(),
                executed: true,
                succeeded: Vec::new(),
                failed: Vec::new(),
            };

            for &id in &selected {
                let ctx = item_context(&record, id);
                match action.apply(self.client.as_ref(), id, ctx, &mut warnings).await {
                    Ok(result) => report.succeeded.push(ItemSuccess { id, result }),
                    Err(err) => report.failed.push(ItemFailure {
                        id,
                        error: err.to_string(),
                    }),
                }
            }

            self.metrics.add_to_counter(
                "bulk_items_succeeded",
                &[("action", action.label())],
                report.succeeded.len() as u64,
            );
            self.metrics.add_to_counter(
                "bulk_items_failed",
                &[("action", action.label())],
                report.failed.len() as u64,
            );

            if request.stop_on_error && !report.failed.is_empty() {
                stopped = true;
            }
            reports.push(report);
        }

        let actions_completed = reports
            .iter()
            .filter(|r| r.executed && r.failed.is_empty())
            .count();
        let actions_failed = reports.len() - actions_completed;
        let items_succeeded: usize = reports.iter().map(|r| r.succeeded.len()).sum();
        let items_failed: usize = reports.iter().map(|r| r.failed.len()).sum();

        if stopped {
            warnings.push("Stopped on error; remaining actions were not executed".to_string());
        }
        if items_failed > 0 {
            warnings.push(format!("{items_failed} item(s) failed"));
        }

        info!(
            handle = %request.query_handle,
            actions = reports.len(),
            items_succeeded,
            items_failed,
            "Bulk operation finished"
        );

        let mut data = json!({
            "selected_items_count": selected.len(),
            "total_items_in_handle": total,
            "preview_items": preview_items,
            "successful": items_succeeded,
            "failed": items_failed,
            "actions_completed": actions_completed,
            "actions_failed": actions_failed,
            "actions": reports,
        });
        if let Some(message) = &preview_message {
            data["preview_message"] = json!(message);
        }

        if actions_failed == 0 {
            ToolResponse::ok(data, SOURCE).with_warnings(warnings)
        } else {
            ToolResponse::failure(
                vec![format!(
                    "{actions_failed} of {} action(s) had failures",
                    reports.len()
                )],
                SOURCE,
            )
            .with_data(data)
            .with_warnings(warnings)
        }
    }

    /// Two-handle link operation.
    pub async fn execute_link(&self, request: LinkRequest) -> ToolResponse {
        link::execute(self, request).await
    }

    /// Pre-flight validation of external references.
    async fn validate_actions(&self, actions: &[BulkAction]) -> Result<(), ToolResponse> {
        for action in actions {
            if let BulkAction::MoveIteration {
                target_iteration_path,
                ..
            } = action
            {
                match self.client.iteration_path_exists(target_iteration_path).await {
                    Ok(true) => {}
                    Ok(false) => {
                        return Err(ToolResponse::error(
                            format!("Iteration path '{target_iteration_path}' does not exist"),
                            SOURCE,
                        ));
                    }
                    Err(err) => {
                        return Err(ToolResponse::error(
                            format!(
                                "Could not validate iteration path '{target_iteration_path}': {err}"
                            ),
                            SOURCE,
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

pub(super) fn handle_prefix(handle: &str) -> String {
    handle.chars().take(12).collect()
}

pub(super) fn item_context(record: &QueryHandleRecord, id: i64) -> Option<&WorkItemContext> {
    record.item_context.as_ref().and_then(|map| map.get(&id))
}

pub(super) fn build_preview(record: &QueryHandleRecord, ids: &[i64]) -> Vec<Value> {
    ids.iter()
        .map(|id| match item_context(record, *id) {
            Some(ctx) => json!({
                "id": id,
                "title": ctx.title,
                "state": ctx.state,
                "type": ctx.work_item_type,
            }),
            None => json!({ "id": id }),
        })
        .collect()
}
