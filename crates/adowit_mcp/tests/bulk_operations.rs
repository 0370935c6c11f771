//! End-to-end tests for the bulk operation engine.
//!
//! A recording mock stands in for the ADO REST client; everything else is
//! the real engine, store, and selector machinery.

use adowit_client::{fields, AdoClient, AdoError, PatchOp, Relation, WorkItem};
use adowit_mcp::bulk::{BulkEngine, BulkRequest, LinkRequest};
use adowit_mcp::handles::{QueryHandleStore, QueryMetadata};
use adowit_mcp::metrics::MetricsRegistry;
use adowit_protocol::WorkItemContext;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Recording mock over the `AdoClient` boundary.
#[derive(Default)]
struct MockAdo {
    calls: Mutex<Vec<String>>,
    fail_ids: HashSet<i64>,
    tags_by_id: Mutex<HashMap<i64, String>>,
    relations_by_id: HashMap<i64, Vec<Relation>>,
    iteration_paths: HashSet<String>,
}

impl MockAdo {
    fn new() -> Self {
        Self::default()
    }

    fn failing_on(mut self, ids: &[i64]) -> Self {
        self.fail_ids = ids.iter().copied().collect();
        self
    }

    fn with_tags(self, id: i64, tags: &str) -> Self {
        self.tags_by_id.lock().unwrap().insert(id, tags.to_string());
        self
    }

    fn with_iteration(mut self, path: &str) -> Self {
        self.iteration_paths.insert(path.to_string());
        self
    }

    fn with_relation(mut self, id: i64, rel: &str, url: &str) -> Self {
        self.relations_by_id.entry(id).or_default().push(Relation {
            rel: rel.to_string(),
            url: url.to_string(),
            attributes: None,
        });
        self
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn check(&self, id: i64) -> Result<(), AdoError> {
        if self.fail_ids.contains(&id) {
            Err(AdoError::BadRequest(format!("synthetic failure for {id}")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AdoClient for MockAdo {
    async fn get_work_item(&self, id: i64) -> Result<WorkItem, AdoError> {
        self.record(format!("get:{id}"));
        self.check(id)?;
        let mut item_fields = Map::new();
        if let Some(tags) = self.tags_by_id.lock().unwrap().get(&id) {
            item_fields.insert(fields::TAGS.to_string(), json!(tags));
        }
        Ok(WorkItem {
            id,
            fields: item_fields,
            relations: self.relations_by_id.get(&id).cloned().unwrap_or_default(),
        })
    }

    async fn get_work_items_batch(
        &self,
        ids: &[i64],
        _fields: &[&str],
    ) -> Result<Vec<WorkItem>, AdoError> {
        self.record(format!("batch:{ids:?}"));
        Ok(ids
            .iter()
            .map(|&id| WorkItem {
                id,
                fields: Map::new(),
                relations: Vec::new(),
            })
            .collect())
    }

    async fn update_work_item(&self, id: i64, ops: Vec<PatchOp>) -> Result<WorkItem, AdoError> {
        let paths: Vec<&str> = ops.iter().map(|op| op.path.as_str()).collect();
        self.record(format!("update:{id}:{}", paths.join(",")));
        self.check(id)?;
        for op in &ops {
            if op.path == format!("/fields/{}", fields::TAGS) {
                if let Some(tags) = op.value.as_str() {
                    self.tags_by_id.lock().unwrap().insert(id, tags.to_string());
                }
            }
        }
        Ok(WorkItem {
            id,
            fields: Map::new(),
            relations: Vec::new(),
        })
    }

    async fn add_comment(&self, id: i64, _text: &str) -> Result<(), AdoError> {
        self.record(format!("comment:{id}"));
        self.check(id)
    }

    async fn get_relations(&self, id: i64) -> Result<Vec<Relation>, AdoError> {
        self.record(format!("relations:{id}"));
        Ok(self.relations_by_id.get(&id).cloned().unwrap_or_default())
    }

    async fn add_relation(
        &self,
        id: i64,
        reference_name: &str,
        target_url: &str,
    ) -> Result<(), AdoError> {
        self.record(format!("link:{id}:{reference_name}:{target_url}"));
        self.check(id)
    }

    fn work_item_url(&self, id: i64) -> String {
        format!("https://dev.azure.com/contoso/_apis/wit/workItems/{id}")
    }

    async fn iteration_path_exists(&self, path: &str) -> Result<bool, AdoError> {
        self.record(format!("iteration:{path}"));
        Ok(self.iteration_paths.contains(path))
    }

    async fn run_wiql(&self, _query: &str) -> Result<Vec<i64>, AdoError> {
        self.record("wiql".to_string());
        Ok(vec![101, 102])
    }

    async fn run_odata(&self, _query: &str) -> Result<Vec<i64>, AdoError> {
        self.record("odata".to_string());
        Ok(vec![101, 102])
    }
}

fn metadata() -> QueryMetadata {
    QueryMetadata {
        project: "Platform".to_string(),
        query_type: "wiql".to_string(),
        extra: Map::new(),
    }
}

fn context_for(entries: &[(i64, &str, &str)]) -> HashMap<i64, WorkItemContext> {
    entries
        .iter()
        .map(|&(id, state, tag)| {
            let mut ctx = WorkItemContext::new(format!("Item {id}"), state, "Bug");
            ctx.tags = Some(vec![tag.to_string()]);
            (id, ctx)
        })
        .collect()
}

struct Harness {
    engine: BulkEngine,
    store: Arc<QueryHandleStore>,
    client: Arc<MockAdo>,
}

fn harness(client: MockAdo) -> Harness {
    let client = Arc::new(client);
    let store = Arc::new(QueryHandleStore::new());
    let metrics = Arc::new(MetricsRegistry::new());
    let engine = BulkEngine::new(
        Arc::clone(&client) as Arc<dyn AdoClient>,
        Arc::clone(&store),
        metrics,
    );
    Harness {
        engine,
        store,
        client,
    }
}

fn store_handle(
    store: &QueryHandleStore,
    ids: Vec<i64>,
    context: Option<HashMap<i64, WorkItemContext>>,
) -> String {
    store.store_query(ids, "SELECT [System.Id] FROM WorkItems", metadata(), None, context, None)
}

fn request(handle: &str, actions: Value) -> BulkRequest {
    serde_json::from_value(json!({
        "queryHandle": handle,
        "actions": actions,
    }))
    .unwrap()
}

#[tokio::test]
async fn dry_run_previews_without_side_effects() {
    let h = harness(MockAdo::new());
    let ids: Vec<i64> = (1..=20).collect();
    let handle = store_handle(&h.store, ids, None);

    let response = h
        .engine
        .execute(
            serde_json::from_value(json!({
                "queryHandle": handle,
                "itemSelector": "all",
                "actions": [{ "type": "comment", "comment": "X" }],
                "dryRun": true,
                "maxPreviewItems": 5
            }))
            .unwrap(),
        )
        .await;

    assert!(response.success, "{:?}", response.errors);
    let data = response.data.unwrap();
    assert_eq!(data["dry_run"], true);
    assert_eq!(data["preview_items"].as_array().unwrap().len(), 5);
    assert_eq!(data["selected_items_count"], 20);
    assert_eq!(data["total_items_in_handle"], 20);
    assert_eq!(data["preview_message"], "Showing 5 of 20 items...");
    assert!(h.client.calls().is_empty(), "dry run must not touch the backend");
}

#[tokio::test]
async fn preview_message_is_absent_without_truncation() {
    let h = harness(MockAdo::new());
    let handle = store_handle(&h.store, vec![1, 2, 3], None);

    let response = h
        .engine
        .execute(
            serde_json::from_value(json!({
                "queryHandle": handle,
                "actions": [{ "type": "comment", "comment": "X" }],
                "dryRun": true,
                "maxPreviewItems": 3
            }))
            .unwrap(),
        )
        .await;

    let data = response.data.unwrap();
    assert!(data.get("preview_message").is_none());
    assert_eq!(data["preview_items"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn criteria_selector_filters_before_execution() {
    let h = harness(MockAdo::new());
    let context = context_for(&[
        (101, "Active", "critical"),
        (102, "New", "critical"),
        (103, "Active", "backend"),
        (104, "Done", "critical"),
    ]);
    let handle = store_handle(&h.store, vec![101, 102, 103, 104], Some(context));

    let response = h
        .engine
        .execute(
            serde_json::from_value(json!({
                "queryHandle": handle,
                "itemSelector": { "states": ["Active"], "tags": ["critical"] },
                "actions": [{ "type": "comment", "comment": "ping" }]
            }))
            .unwrap(),
        )
        .await;

    assert!(response.success);
    assert_eq!(h.client.calls(), vec!["comment:101"]);
}

#[tokio::test]
async fn partial_failure_flips_the_envelope_but_keeps_counts() {
    let h = harness(MockAdo::new().failing_on(&[102]));
    let handle = store_handle(&h.store, vec![101, 102], None);

    let response = h
        .engine
        .execute(request(
            &handle,
            json!([{ "type": "assign", "assignTo": "u@x" }]),
        ))
        .await;

    assert!(!response.success);
    let data = response.data.as_ref().unwrap();
    assert_eq!(data["successful"], 1);
    assert_eq!(data["failed"], 1);
    assert!(response
        .warnings
        .iter()
        .any(|w| w.contains("1 item(s) failed")));
    // 101 succeeded, 102 failed; both appear exactly once.
    let action = &data["actions"][0];
    assert_eq!(action["succeeded"][0]["id"], 101);
    assert_eq!(action["failed"][0]["id"], 102);
}

#[tokio::test]
async fn per_item_failures_do_not_abort_the_loop() {
    let h = harness(MockAdo::new().failing_on(&[2]));
    let handle = store_handle(&h.store, vec![1, 2, 3], None);

    let response = h
        .engine
        .execute(request(&handle, json!([{ "type": "comment", "comment": "x" }])))
        .await;

    assert!(!response.success);
    assert_eq!(
        h.client.calls(),
        vec!["comment:1", "comment:2", "comment:3"],
        "the loop continues past the failing item"
    );
}

#[tokio::test]
async fn stop_on_error_skips_remaining_actions() {
    let h = harness(MockAdo::new().failing_on(&[1]));
    let handle = store_handle(&h.store, vec![1], None);

    let response = h
        .engine
        .execute(
            serde_json::from_value(json!({
                "queryHandle": handle,
                "actions": [
                    { "type": "comment", "comment": "first" },
                    { "type": "assign", "assignTo": "u@x" }
                ],
                "stopOnError": true
            }))
            .unwrap(),
        )
        .await;

    assert!(!response.success);
    let data = response.data.unwrap();
    assert_eq!(data["actions"][1]["executed"], false);
    assert_eq!(data["actions_failed"], 2);
    assert_eq!(data["actions_completed"], 0);
    // Only the first action reached the backend.
    assert_eq!(h.client.calls(), vec!["comment:1"]);
}

#[tokio::test]
async fn expired_handle_surfaces_not_found_or_expired() {
    let h = harness(MockAdo::new());
    let handle = h.store.store_query(
        vec![1, 2],
        "q",
        metadata(),
        Some(Duration::from_millis(1)),
        None,
        None,
    );
    tokio::time::sleep(Duration::from_millis(10)).await;

    let response = h
        .engine
        .execute(request(&handle, json!([{ "type": "comment", "comment": "x" }])))
        .await;

    assert!(!response.success);
    assert!(response.errors[0].contains("not found or expired"));
    assert!(h.client.calls().is_empty());
}

#[tokio::test]
async fn empty_selection_is_an_error() {
    let h = harness(MockAdo::new());
    let handle = store_handle(&h.store, Vec::new(), None);

    let response = h
        .engine
        .execute(request(&handle, json!([{ "type": "comment", "comment": "x" }])))
        .await;

    assert!(!response.success);
    assert!(response.errors[0].contains("No work items matched"));
}

#[tokio::test]
async fn invalid_selector_shape_is_a_validation_error() {
    let h = harness(MockAdo::new());
    let handle = store_handle(&h.store, vec![1], None);

    let response = h
        .engine
        .execute(
            serde_json::from_value(json!({
                "queryHandle": handle,
                "itemSelector": 3,
                "actions": [{ "type": "comment", "comment": "x" }]
            }))
            .unwrap(),
        )
        .await;

    assert!(!response.success);
    assert!(response.errors[0].contains("Validation error"));
}

#[tokio::test]
async fn add_then_remove_tag_round_trips() {
    let h = harness(MockAdo::new().with_tags(7, "keep-me; And-Me"));
    let handle = store_handle(&h.store, vec![7], None);

    let add = h
        .engine
        .execute(request(&handle, json!([{ "type": "add-tag", "tags": "transient" }])))
        .await;
    assert!(add.success);
    assert_eq!(
        h.client.tags_by_id.lock().unwrap()[&7],
        "keep-me; And-Me; transient"
    );

    let remove = h
        .engine
        .execute(request(&handle, json!([{ "type": "remove-tag", "tags": "TRANSIENT" }])))
        .await;
    assert!(remove.success);
    assert_eq!(h.client.tags_by_id.lock().unwrap()[&7], "keep-me; And-Me");
}

#[tokio::test]
async fn transition_to_current_state_warns_and_skips() {
    let h = harness(MockAdo::new());
    let context = context_for(&[(9, "Active", "x")]);
    let handle = store_handle(&h.store, vec![9], Some(context));

    let response = h
        .engine
        .execute(request(
            &handle,
            json!([{ "type": "transition-state", "targetState": "Active" }]),
        ))
        .await;

    assert!(response.success);
    assert!(response
        .warnings
        .iter()
        .any(|w| w.contains("already in state")));
    assert!(h.client.calls().is_empty(), "no API call for a no-op transition");
}

#[tokio::test]
async fn move_iteration_validates_the_path_first() {
    let h = harness(MockAdo::new());
    let handle = store_handle(&h.store, vec![1], None);

    let response = h
        .engine
        .execute(request(
            &handle,
            json!([{ "type": "move-iteration", "targetIterationPath": "Platform\\Nope" }]),
        ))
        .await;

    assert!(!response.success);
    assert!(response.errors[0].contains("does not exist"));
    assert_eq!(h.client.calls(), vec!["iteration:Platform\\Nope"]);
}

#[tokio::test]
async fn move_iteration_runs_once_validated() {
    let h = harness(MockAdo::new().with_iteration("Platform\\Sprint 13"));
    let handle = store_handle(&h.store, vec![4], None);

    let response = h
        .engine
        .execute(request(
            &handle,
            json!([{ "type": "move-iteration", "targetIterationPath": "Platform\\Sprint 13" }]),
        ))
        .await;

    assert!(response.success, "{:?}", response.errors);
    let calls = h.client.calls();
    assert!(calls.contains(&format!("update:4:/fields/{}", fields::ITERATION_PATH)));
}

#[tokio::test]
async fn remove_comments_then_transitions() {
    let h = harness(MockAdo::new());
    let handle = store_handle(&h.store, vec![3], None);

    let response = h
        .engine
        .execute(request(
            &handle,
            json!([{ "type": "remove", "removeReason": "stale" }]),
        ))
        .await;

    assert!(response.success);
    assert_eq!(
        h.client.calls(),
        vec![
            "comment:3".to_string(),
            format!("update:3:/fields/{}", fields::STATE)
        ]
    );
}

#[tokio::test]
async fn link_one_to_one_skips_self_links_and_existing() {
    let client = MockAdo::new().with_relation(
        1,
        "System.LinkTypes.Related",
        "https://dev.azure.com/contoso/_apis/wit/workItems/10",
    );
    let h = harness(client);
    let source = store_handle(&h.store, vec![1, 2, 3], None);
    let target = store_handle(&h.store, vec![10, 2, 30], None);

    let request: LinkRequest = serde_json::from_value(json!({
        "sourceQueryHandle": source,
        "targetQueryHandle": target,
        "linkType": "Related",
        "linkStrategy": "one-to-one",
        "skipExisting": true
    }))
    .unwrap();

    let response = h.engine.execute_link(request).await;
    assert!(response.success, "{:?}", response.errors);
    let data = response.data.unwrap();
    // Pair (1,10) exists already, (2,2) is a self-link, (3,30) is created.
    assert_eq!(data["successful"], 1);
    assert_eq!(data["skipped"], 1);
    assert!(response.warnings.iter().any(|w| w.contains("self-link")));
    let calls = h.client.calls();
    assert!(calls
        .iter()
        .any(|c| c.starts_with("link:3:System.LinkTypes.Related")));
    assert!(!calls.iter().any(|c| c.starts_with("link:1:")));
}

#[tokio::test]
async fn link_hierarchy_sanity_warns_on_task_parenting_a_feature() {
    let h = harness(MockAdo::new());
    let mut source_ctx = HashMap::new();
    source_ctx.insert(1, WorkItemContext::new("A feature", "New", "Feature"));
    let mut target_ctx = HashMap::new();
    target_ctx.insert(10, WorkItemContext::new("A task", "New", "Task"));

    let source = h.store.store_query(vec![1], "q", metadata(), None, Some(source_ctx), None);
    let target = h.store.store_query(vec![10], "q", metadata(), None, Some(target_ctx), None);

    let request: LinkRequest = serde_json::from_value(json!({
        "sourceQueryHandle": source,
        "targetQueryHandle": target,
        "linkType": "Parent",
        "linkStrategy": "one-to-one",
        "dryRun": true
    }))
    .unwrap();

    let response = h.engine.execute_link(request).await;
    assert!(response.success);
    assert!(response
        .warnings
        .iter()
        .any(|w| w.contains("unusual for a backlog hierarchy")));
}
