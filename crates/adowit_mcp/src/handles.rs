//! Query handle store.
//!
//! Every bulk and analysis flow addresses work items through opaque,
//! time-limited handles so large result sets never ship through the peer.
//! The store is a map behind a mutex and never suspends; expiry is checked
//! lazily on every read and swept by a background ticker.

use adowit_protocol::{ItemSelector, SelectionCriteria, WorkItemContext};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default handle lifetime: one hour.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Background sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const HANDLE_PREFIX: &str = "qh_";
const HANDLE_SUFFIX_BYTES: usize = 8;

/// Query provenance stored with each handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMetadata {
    pub project: String,
    pub query_type: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The immutable record a handle names.
#[derive(Debug, Clone)]
pub struct QueryHandleRecord {
    /// Stored order is the canonical index space; duplicates preserved.
    pub work_item_ids: Vec<i64>,
    pub source_query: String,
    pub metadata: QueryMetadata,
    pub item_context: Option<HashMap<i64, WorkItemContext>>,
    pub analysis_metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl QueryHandleRecord {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Process-wide handle map with TTL expiry.
pub struct QueryHandleStore {
    handles: Arc<Mutex<HashMap<String, QueryHandleRecord>>>,
    default_ttl: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl QueryHandleStore {
    pub fn new() -> Self {
        Self::with_default_ttl(DEFAULT_TTL)
    }

    pub fn with_default_ttl(default_ttl: Duration) -> Self {
        Self {
            handles: Arc::new(Mutex::new(HashMap::new())),
            default_ttl,
            sweeper: Mutex::new(None),
        }
    }

    /// Spawn the background expiry ticker. Requires a tokio runtime; tests
    /// that only exercise lazy expiry can skip it.
    pub fn start_cleanup(&self) {
        let handles = Arc::clone(&self.handles);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let now = Utc::now();
                let mut map = handles.lock().expect("handle map lock poisoned");
                let before = map.len();
                map.retain(|_, record| !record.is_expired(now));
                let swept = before - map.len();
                if swept > 0 {
                    debug!(swept, "Expired query handles released");
                }
            }
        });
        *self.sweeper.lock().expect("sweeper lock poisoned") = Some(task);
    }

    /// Stop the background ticker (shutdown path).
    pub fn stop_cleanup(&self) {
        if let Some(task) = self.sweeper.lock().expect("sweeper lock poisoned").take() {
            task.abort();
        }
    }

    /// Materialize a result set under a fresh opaque handle.
    pub fn store_query(
        &self,
        work_item_ids: Vec<i64>,
        source_query: impl Into<String>,
        metadata: QueryMetadata,
        ttl: Option<Duration>,
        item_context: Option<HashMap<i64, WorkItemContext>>,
        analysis_metadata: Option<Value>,
    ) -> String {
        let now = Utc::now();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let record = QueryHandleRecord {
            work_item_ids,
            source_query: source_query.into(),
            metadata,
            item_context,
            analysis_metadata,
            created_at: now,
            expires_at: now
                + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(1)),
        };

        let mut map = self.handles.lock().expect("handle map lock poisoned");
        let mut handle = new_handle_id();
        while map.contains_key(&handle) {
            handle = new_handle_id();
        }
        map.insert(handle.clone(), record);
        debug!(%handle, "Stored query handle");
        handle
    }

    /// Full record for a live handle; `None` for unknown or expired.
    pub fn get_query_data(&self, handle: &str) -> Option<QueryHandleRecord> {
        let now = Utc::now();
        let mut map = self.handles.lock().expect("handle map lock poisoned");
        match map.get(handle) {
            Some(record) if record.is_expired(now) => {
                map.remove(handle);
                None
            }
            Some(record) => Some(record.clone()),
            None => None,
        }
    }

    /// Resolve index positions to ids. Negative and out-of-range indices are
    /// dropped, duplicates preserved in input order. `None` means the handle
    /// itself is invalid, which is distinct from an empty selection.
    pub fn get_items_by_indices(&self, handle: &str, indices: &[i64]) -> Option<Vec<i64>> {
        let record = self.get_query_data(handle)?;
        let ids = &record.work_item_ids;
        Some(
            indices
                .iter()
                .filter_map(|&index| {
                    let index = usize::try_from(index).ok()?;
                    ids.get(index).copied()
                })
                .collect(),
        )
    }

    /// Resolve a criteria predicate against the stored per-item context.
    pub fn get_items_by_criteria(
        &self,
        handle: &str,
        criteria: &SelectionCriteria,
    ) -> Option<Vec<i64>> {
        let record = self.get_query_data(handle)?;
        let matches_all = criteria.is_empty();
        Some(
            record
                .work_item_ids
                .iter()
                .filter(|id| {
                    if matches_all {
                        return true;
                    }
                    // Without context an item has no attributes, and a
                    // criteria needing one excludes it.
                    record
                        .item_context
                        .as_ref()
                        .and_then(|context| context.get(*id))
                        .map(|ctx| criteria.matches(ctx))
                        .unwrap_or(false)
                })
                .copied()
                .collect(),
        )
    }

    /// Dispatch a loose-JSON selector. `None` for an invalid handle or an
    /// unrecognized selector shape.
    pub fn resolve_item_selector(&self, handle: &str, selector: &Value) -> Option<Vec<i64>> {
        let selector = ItemSelector::from_value(selector)?;
        self.resolve_selector(handle, &selector)
    }

    /// Dispatch an already-parsed selector. `None` only for invalid handles.
    pub fn resolve_selector(&self, handle: &str, selector: &ItemSelector) -> Option<Vec<i64>> {
        match selector {
            ItemSelector::All => self.get_query_data(handle).map(|r| r.work_item_ids),
            ItemSelector::Indices(indices) => self.get_items_by_indices(handle, indices),
            ItemSelector::Criteria(criteria) => self.get_items_by_criteria(handle, criteria),
        }
    }

    /// Number of live handles (diagnostics).
    pub fn handle_count(&self) -> usize {
        let now = Utc::now();
        let map = self.handles.lock().expect("handle map lock poisoned");
        map.values().filter(|r| !r.is_expired(now)).count()
    }

    /// Drop every handle.
    pub fn clear_all(&self) {
        self.handles
            .lock()
            .expect("handle map lock poisoned")
            .clear();
    }
}

impl Default for QueryHandleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for QueryHandleStore {
    fn drop(&mut self) {
        self.stop_cleanup();
    }
}

fn new_handle_id() -> String {
    let mut bytes = [0u8; HANDLE_SUFFIX_BYTES];
    rand::thread_rng().fill(&mut bytes);
    let mut id = String::with_capacity(HANDLE_PREFIX.len() + HANDLE_SUFFIX_BYTES * 2);
    id.push_str(HANDLE_PREFIX);
    for byte in bytes {
        id.push_str(&format!("{byte:02x}"));
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata() -> QueryMetadata {
        QueryMetadata {
            project: "Platform".to_string(),
            query_type: "wiql".to_string(),
            extra: Map::new(),
        }
    }

    fn store_with(ids: Vec<i64>, context: Option<HashMap<i64, WorkItemContext>>) -> (QueryHandleStore, String) {
        let store = QueryHandleStore::new();
        let handle = store.store_query(
            ids,
            "SELECT [System.Id] FROM WorkItems",
            metadata(),
            None,
            context,
            None,
        );
        (store, handle)
    }

    fn four_item_context() -> HashMap<i64, WorkItemContext> {
        let mut context = HashMap::new();
        for (id, state, tag) in [
            (101, "Active", "critical"),
            (102, "New", "critical"),
            (103, "Active", "backend"),
            (104, "Done", "critical"),
        ] {
            let mut ctx = WorkItemContext::new(format!("Item {id}"), state, "Bug");
            ctx.tags = Some(vec![tag.to_string()]);
            context.insert(id, ctx);
        }
        context
    }

    #[test]
    fn handles_look_opaque() {
        let id = new_handle_id();
        assert!(id.starts_with("qh_"));
        assert_eq!(id.len(), 3 + HANDLE_SUFFIX_BYTES * 2);
        assert_ne!(id, new_handle_id());
    }

    #[test]
    fn unknown_handle_reads_null() {
        let store = QueryHandleStore::new();
        assert!(store.get_query_data("qh_missing").is_none());
        assert!(store.get_items_by_indices("qh_missing", &[0]).is_none());
        assert!(store
            .resolve_item_selector("qh_missing", &json!("all"))
            .is_none());
    }

    #[test]
    fn index_prefix_matches_stored_prefix() {
        let (store, handle) = store_with(vec![7, 8, 9, 10], None);
        for k in 0..4i64 {
            let indices: Vec<i64> = (0..k).collect();
            let expected: Vec<i64> = vec![7, 8, 9, 10][..k as usize].to_vec();
            assert_eq!(store.get_items_by_indices(&handle, &indices).unwrap(), expected);
        }
    }

    #[test]
    fn indices_drop_out_of_range_and_keep_duplicates() {
        let (store, handle) = store_with(vec![101, 102, 103], None);
        let resolved = store
            .get_items_by_indices(&handle, &[-1, 0, 2, 2, 9])
            .unwrap();
        assert_eq!(resolved, vec![101, 103, 103]);
    }

    #[test]
    fn empty_index_selection_is_not_an_error() {
        let (store, handle) = store_with(vec![101], None);
        assert_eq!(store.get_items_by_indices(&handle, &[]).unwrap(), Vec::<i64>::new());
    }

    #[test]
    fn criteria_filters_on_state_and_tag() {
        let (store, handle) = store_with(vec![101, 102, 103, 104], Some(four_item_context()));
        let criteria: SelectionCriteria =
            serde_json::from_value(json!({"states": ["Active"], "tags": ["critical"]})).unwrap();
        assert_eq!(store.get_items_by_criteria(&handle, &criteria).unwrap(), vec![101]);
    }

    #[test]
    fn empty_criteria_returns_every_id_even_without_context() {
        let (store, handle) = store_with(vec![5, 6, 6], None);
        let criteria = SelectionCriteria::default();
        assert_eq!(store.get_items_by_criteria(&handle, &criteria).unwrap(), vec![5, 6, 6]);
    }

    #[test]
    fn criteria_needing_context_excludes_contextless_items() {
        let (store, handle) = store_with(vec![5, 6], None);
        let criteria: SelectionCriteria =
            serde_json::from_value(json!({"tags": ["x"]})).unwrap();
        assert_eq!(store.get_items_by_criteria(&handle, &criteria).unwrap(), Vec::<i64>::new());
    }

    #[test]
    fn selector_dispatch_covers_all_shapes() {
        let (store, handle) = store_with(vec![101, 102], None);
        assert_eq!(
            store.resolve_item_selector(&handle, &json!("all")).unwrap(),
            vec![101, 102]
        );
        assert_eq!(
            store.resolve_item_selector(&handle, &json!([1])).unwrap(),
            vec![102]
        );
        assert_eq!(
            store.resolve_item_selector(&handle, &json!({})).unwrap(),
            vec![101, 102]
        );
        assert!(store.resolve_item_selector(&handle, &json!(null)).is_none());
        assert!(store.resolve_item_selector(&handle, &json!(3)).is_none());
        assert!(store
            .resolve_item_selector(&handle, &json!("everything"))
            .is_none());
    }

    #[test]
    fn zero_ttl_expires_on_next_read() {
        let store = QueryHandleStore::new();
        let handle = store.store_query(
            vec![1, 2],
            "q",
            metadata(),
            Some(Duration::ZERO),
            None,
            None,
        );
        assert!(store.get_query_data(&handle).is_none());
        assert!(store.resolve_item_selector(&handle, &json!("all")).is_none());
        assert!(store.resolve_item_selector(&handle, &json!([0])).is_none());
        assert!(store.resolve_item_selector(&handle, &json!({})).is_none());
    }

    #[test]
    fn expired_handles_are_released_on_read() {
        let store = QueryHandleStore::new();
        let handle = store.store_query(
            vec![1],
            "q",
            metadata(),
            Some(Duration::from_millis(1)),
            None,
            None,
        );
        std::thread::sleep(Duration::from_millis(10));
        assert!(store.get_query_data(&handle).is_none());
        assert_eq!(store.handle_count(), 0);
    }

    #[test]
    fn clear_all_drops_everything() {
        let (store, handle) = store_with(vec![1], None);
        store.clear_all();
        assert!(store.get_query_data(&handle).is_none());
    }

    #[tokio::test]
    async fn sweeper_releases_expired_entries() {
        let store = QueryHandleStore::new();
        store.store_query(
            vec![1],
            "q",
            metadata(),
            Some(Duration::ZERO),
            None,
            None,
        );
        store.start_cleanup();
        // First tick fires immediately.
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.stop_cleanup();
        assert_eq!(store.handle_count(), 0);
    }
}
