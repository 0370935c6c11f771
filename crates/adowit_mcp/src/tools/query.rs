//! Query tools: forward WIQL/OData strings and materialize query handles.

use super::{McpTool, ToolContext};
use crate::handles::QueryMetadata;
use adowit_client::{fields, AdoError, WorkItem};
use adowit_protocol::{ToolResponse, WorkItemContext};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;

/// Cap on materialized result sets; larger queries should narrow down.
const MAX_RESULTS: usize = 1000;

const PREVIEW_COUNT: usize = 5;

/// Context fields fetched for every materialized item.
const CONTEXT_FIELDS: &[&str] = &[
    fields::TITLE,
    fields::STATE,
    fields::WORK_ITEM_TYPE,
    fields::ASSIGNED_TO,
    fields::TAGS,
    fields::ITERATION_PATH,
    fields::CHANGED_DATE,
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WiqlArgs {
    wiql_query: String,
    #[serde(default)]
    max_results: Option<usize>,
    #[serde(default)]
    ttl_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OdataArgs {
    odata_query: String,
    #[serde(default)]
    max_results: Option<usize>,
    #[serde(default)]
    ttl_ms: Option<u64>,
}

pub struct WiqlQueryTool;

#[async_trait]
impl McpTool for WiqlQueryTool {
    fn name(&self) -> &'static str {
        "wiql-query"
    }

    fn description(&self) -> &'static str {
        "Run a WIQL query and materialize the results into a query handle for bulk operations"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "wiqlQuery": {
                    "type": "string",
                    "description": "WIQL query text, forwarded unmodified"
                },
                "maxResults": {
                    "type": "integer",
                    "description": "Cap on materialized items (default 200, max 1000)"
                },
                "ttlMs": {
                    "type": "integer",
                    "description": "Handle lifetime in milliseconds (default 1 hour)"
                }
            },
            "required": ["wiqlQuery"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResponse {
        let args: WiqlArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(err) => {
                return ToolResponse::error(format!("Validation error: {err}"), self.name())
            }
        };

        let ids = match ctx.client.run_wiql(&args.wiql_query).await {
            Ok(ids) => ids,
            Err(err) => return query_failure(err, self.name()),
        };

        materialize(
            ctx,
            ids,
            args.wiql_query,
            "wiql",
            args.max_results,
            args.ttl_ms,
            self.name(),
        )
        .await
    }
}

pub struct OdataQueryTool;

#[async_trait]
impl McpTool for OdataQueryTool {
    fn name(&self) -> &'static str {
        "odata-query"
    }

    fn description(&self) -> &'static str {
        "Run an Analytics OData query and materialize the results into a query handle"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "odataQuery": {
                    "type": "string",
                    "description": "OData query string, forwarded unmodified to the Analytics surface"
                },
                "maxResults": {
                    "type": "integer",
                    "description": "Cap on materialized items (default 200, max 1000)"
                },
                "ttlMs": {
                    "type": "integer",
                    "description": "Handle lifetime in milliseconds (default 1 hour)"
                }
            },
            "required": ["odataQuery"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResponse {
        let args: OdataArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(err) => {
                return ToolResponse::error(format!("Validation error: {err}"), self.name())
            }
        };

        let ids = match ctx.client.run_odata(&args.odata_query).await {
            Ok(ids) => ids,
            Err(err) => return query_failure(err, self.name()),
        };

        materialize(
            ctx,
            ids,
            args.odata_query,
            "odata",
            args.max_results,
            args.ttl_ms,
            self.name(),
        )
        .await
    }
}

/// Fetch per-item context, store the handle, and shape the response.
async fn materialize(
    ctx: &ToolContext,
    mut ids: Vec<i64>,
    source_query: String,
    query_type: &str,
    max_results: Option<usize>,
    ttl_ms: Option<u64>,
    source: &str,
) -> ToolResponse {
    let cap = max_results.unwrap_or(200).min(MAX_RESULTS);
    let truncated = ids.len() > cap;
    ids.truncate(cap);

    let context = if ids.is_empty() {
        HashMap::new()
    } else {
        match ctx.client.get_work_items_batch(&ids, CONTEXT_FIELDS).await {
            Ok(items) => build_context(&items),
            Err(err) => return query_failure(err, source),
        }
    };

    let metadata = QueryMetadata {
        project: ctx.config.project.clone(),
        query_type: query_type.to_string(),
        extra: Map::new(),
    };
    let count = ids.len();
    let preview: Vec<Value> = ids
        .iter()
        .take(PREVIEW_COUNT)
        .map(|id| match context.get(id) {
            Some(item) => json!({
                "id": id,
                "title": item.title,
                "state": item.state,
                "type": item.work_item_type,
            }),
            None => json!({ "id": id }),
        })
        .collect();

    let handle = ctx.store.store_query(
        ids,
        source_query,
        metadata,
        ttl_ms.map(Duration::from_millis),
        Some(context),
        None,
    );
    ctx.metrics
        .increment_counter("queries_materialized", &[("type", query_type)]);
    ctx.metrics
        .set_gauge("handles_live", &[], ctx.store.handle_count() as f64);

    let record = ctx.store.get_query_data(&handle);
    let mut data = json!({
        "query_handle": handle,
        "work_item_count": count,
        "preview_items": preview,
        "next_steps": "Pass query_handle to bulk tools, or inspect it with query-handle-info",
    });
    if let Some(record) = record {
        data["expires_at"] = json!(record.expires_at.to_rfc3339());
    }

    let response = ToolResponse::ok(data, source);
    if truncated {
        response.with_warning(format!("Result set truncated to the first {cap} item(s)"))
    } else {
        response
    }
}

/// Shared failure shaping for query tools.
fn query_failure(err: AdoError, source: &str) -> ToolResponse {
    ToolResponse::error(format!("Query failed: {err}"), source)
}

/// Build the per-item context map from a batch fetch.
pub(super) fn build_context(items: &[WorkItem]) -> HashMap<i64, WorkItemContext> {
    items
        .iter()
        .map(|item| {
            let changed_date = item
                .field_str(fields::CHANGED_DATE)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|at| at.with_timezone(&Utc));
            let days_inactive = changed_date
                .map(|at| (Utc::now() - at).num_days().max(0) as u32);

            let mut context = WorkItemContext::new(
                item.title(),
                item.state(),
                item.work_item_type(),
            );
            context.assigned_to = assigned_to(item);
            let tags = item.tags();
            context.tags = (!tags.is_empty()).then_some(tags);
            context.days_inactive = days_inactive;
            context.iteration_path = item
                .field_str(fields::ITERATION_PATH)
                .map(str::to_string);
            context.changed_date = changed_date;
            (item.id, context)
        })
        .collect()
}

/// `System.AssignedTo` is an identity object or a display string.
fn assigned_to(item: &WorkItem) -> Option<String> {
    match item.fields.get(fields::ASSIGNED_TO)? {
        Value::String(name) => Some(name.clone()),
        Value::Object(identity) => identity
            .get("uniqueName")
            .or_else(|| identity.get("displayName"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_builds_from_batch_fields() {
        let items: Vec<WorkItem> = serde_json::from_value(json!([
            {
                "id": 101,
                "fields": {
                    "System.Title": "Fix login",
                    "System.State": "Active",
                    "System.WorkItemType": "Bug",
                    "System.Tags": "critical; auth",
                    "System.AssignedTo": { "uniqueName": "dev@contoso.com" },
                    "System.IterationPath": "Platform\\Sprint 12"
                }
            },
            { "id": 102, "fields": { "System.Title": "Spike", "System.State": "New", "System.WorkItemType": "Task" } }
        ]))
        .unwrap();

        let context = build_context(&items);
        let first = &context[&101];
        assert_eq!(first.title, "Fix login");
        assert_eq!(first.assigned_to.as_deref(), Some("dev@contoso.com"));
        assert_eq!(first.tags.as_ref().unwrap().len(), 2);
        assert_eq!(first.iteration_path.as_deref(), Some("Platform\\Sprint 12"));
        assert!(context[&102].tags.is_none());
    }

    #[test]
    fn days_inactive_derives_from_changed_date() {
        let past = (Utc::now() - chrono::Duration::days(12)).to_rfc3339();
        let items: Vec<WorkItem> = serde_json::from_value(json!([
            { "id": 1, "fields": { "System.Title": "t", "System.State": "New",
                "System.WorkItemType": "Bug", "System.ChangedDate": past } }
        ]))
        .unwrap();
        let context = build_context(&items);
        assert_eq!(context[&1].days_inactive, Some(12));
    }
}
