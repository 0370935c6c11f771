//! The two-handle link operation.
//!
//! Pairs items from a source and a target handle under a link strategy,
//! then adds one relation per pair on the source side. Self-links are
//! skipped, and implausible parent/child pairings draw a warning before the
//! backend gets the final say.

use super::engine::{build_preview, handle_prefix, BulkEngine, DEFAULT_PREVIEW_ITEMS};
use crate::handles::QueryHandleRecord;
use adowit_protocol::{LinkType, ToolResponse, WorkItemContext};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::info;

const SOURCE: &str = "link-engine";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkStrategy {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRequest {
    pub source_query_handle: String,
    pub target_query_handle: String,
    pub link_type: LinkType,
    pub link_strategy: LinkStrategy,

    /// Skip pairs where an identical relation already exists on the source.
    #[serde(default)]
    pub skip_existing: bool,

    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub max_preview_items: Option<usize>,
}

pub(super) async fn execute(engine: &BulkEngine, request: LinkRequest) -> ToolResponse {
    let Some(source) = engine.store().get_query_data(&request.source_query_handle) else {
        return ToolResponse::error(
            format!(
                "Source query handle '{}' not found or expired",
                handle_prefix(&request.source_query_handle)
            ),
            SOURCE,
        );
    };
    let Some(target) = engine.store().get_query_data(&request.target_query_handle) else {
        return ToolResponse::error(
            format!(
                "Target query handle '{}' not found or expired",
                handle_prefix(&request.target_query_handle)
            ),
            SOURCE,
        );
    };

    let mut warnings = Vec::new();
    let pairs = match build_pairs(
        &source.work_item_ids,
        &target.work_item_ids,
        request.link_strategy,
        &mut warnings,
    ) {
        Ok(pairs) => pairs,
        Err(message) => return ToolResponse::error(message, SOURCE),
    };

    // Self-links are skipped, never attempted.
    let pairs: Vec<(i64, i64)> = pairs
        .into_iter()
        .filter(|(s, t)| {
            if s == t {
                warnings.push(format!("Skipping self-link on work item {s}"));
                false
            } else {
                true
            }
        })
        .collect();

    if pairs.is_empty() {
        return ToolResponse::error("No link pairs to create", SOURCE).with_warnings(warnings);
    }

    hierarchy_sanity(&pairs, request.link_type, &source, &target, &mut warnings);

    let preview_count = request
        .max_preview_items
        .unwrap_or(DEFAULT_PREVIEW_ITEMS)
        .min(pairs.len());
    let preview: Vec<Value> = pairs[..preview_count]
        .iter()
        .map(|(s, t)| json!({ "source": s, "target": t, "linkType": request.link_type.to_string() }))
        .collect();
    let preview_message = (preview_count < pairs.len())
        .then(|| format!("Showing {} of {} items...", preview_count, pairs.len()));

    if request.dry_run {
        let mut data = json!({
            "dry_run": true,
            "link_type": request.link_type.to_string(),
            "reference_name": request.link_type.reference_name(),
            "pair_count": pairs.len(),
            "preview_items": preview,
            "source_preview": build_preview(&source, &source.work_item_ids[..source.work_item_ids.len().min(preview_count)]),
        });
        if let Some(message) = &preview_message {
            data["preview_message"] = json!(message);
        }
        return ToolResponse::ok(data, SOURCE).with_warnings(warnings);
    }

    let reference_name = request.link_type.reference_name();
    let client = engine.client();

    // One relation fetch per distinct source id when skipping existing links.
    let mut existing: HashMap<i64, Vec<String>> = HashMap::new();
    if request.skip_existing {
        for &(source_id, _) in &pairs {
            if existing.contains_key(&source_id) {
                continue;
            }
            match client.get_relations(source_id).await {
                Ok(relations) => {
                    let urls = relations
                        .into_iter()
                        .filter(|rel| rel.rel == reference_name)
                        .map(|rel| rel.url)
                        .collect();
                    existing.insert(source_id, urls);
                }
                Err(err) => {
                    warnings.push(format!(
                        "Could not fetch relations for work item {source_id}: {err}"
                    ));
                    existing.insert(source_id, Vec::new());
                }
            }
        }
    }

    let mut succeeded = Vec::new();
    let mut skipped = 0usize;
    let mut failed = Vec::new();

    for &(source_id, target_id) in &pairs {
        let target_url = client.work_item_url(target_id);
        if request.skip_existing {
            let already = existing
                .get(&source_id)
                .map(|urls| urls.iter().any(|url| url == &target_url))
                .unwrap_or(false);
            if already {
                skipped += 1;
                continue;
            }
        }
        match client.add_relation(source_id, reference_name, &target_url).await {
            Ok(()) => succeeded.push(json!({ "source": source_id, "target": target_id })),
            Err(err) => failed.push(json!({
                "source": source_id,
                "target": target_id,
                "error": err.to_string(),
            })),
        }
    }

    engine
        .metrics()
        .add_to_counter("links_created", &[], succeeded.len() as u64);

    if skipped > 0 {
        warnings.push(format!("{skipped} existing link(s) skipped"));
    }
    if !failed.is_empty() {
        warnings.push(format!("{} item(s) failed", failed.len()));
    }

    info!(
        link_type = %request.link_type,
        created = succeeded.len(),
        skipped,
        failed = failed.len(),
        "Link operation finished"
    );

    let data = json!({
        "link_type": request.link_type.to_string(),
        "reference_name": reference_name,
        "successful": succeeded.len(),
        "skipped": skipped,
        "failed": failed.len(),
        "created": succeeded,
        "failures": failed,
    });

    if failed.is_empty() {
        ToolResponse::ok(data, SOURCE).with_warnings(warnings)
    } else {
        ToolResponse::failure(
            vec![format!("{} link(s) could not be created", failed.len())],
            SOURCE,
        )
        .with_data(data)
        .with_warnings(warnings)
    }
}

/// Pair source and target ids under the strategy.
fn build_pairs(
    source: &[i64],
    target: &[i64],
    strategy: LinkStrategy,
    warnings: &mut Vec<String>,
) -> Result<Vec<(i64, i64)>, String> {
    match strategy {
        LinkStrategy::OneToOne => {
            if source.len() != target.len() {
                let pairs = source.len().min(target.len());
                warnings.push(format!(
                    "one-to-one size mismatch ({} source vs {} target); pairing the first {}",
                    source.len(),
                    target.len(),
                    pairs
                ));
            }
            Ok(source.iter().copied().zip(target.iter().copied()).collect())
        }
        LinkStrategy::OneToMany => {
            let [single] = source else {
                return Err(format!(
                    "Validation error: linkStrategy: one-to-many requires exactly one source item, got {}",
                    source.len()
                ));
            };
            Ok(target.iter().map(|&t| (*single, t)).collect())
        }
        LinkStrategy::ManyToOne => {
            let [single] = target else {
                return Err(format!(
                    "Validation error: linkStrategy: many-to-one requires exactly one target item, got {}",
                    target.len()
                ));
            };
            Ok(source.iter().map(|&s| (s, *single)).collect())
        }
        LinkStrategy::ManyToMany => Ok(source
            .iter()
            .flat_map(|&s| target.iter().map(move |&t| (s, t)))
            .collect()),
    }
}

/// Coarse backlog-hierarchy ranks for the plausibility warning.
fn hierarchy_rank(work_item_type: &str) -> Option<u8> {
    match work_item_type.to_lowercase().as_str() {
        "epic" => Some(4),
        "feature" => Some(3),
        "user story" | "product backlog item" | "requirement" | "bug" => Some(2),
        "task" => Some(1),
        _ => None,
    }
}

/// Warn when a parent/child pairing runs against the usual hierarchy
/// (e.g. a Task as the parent of a Feature). The backend still decides.
fn hierarchy_sanity(
    pairs: &[(i64, i64)],
    link_type: LinkType,
    source: &QueryHandleRecord,
    target: &QueryHandleRecord,
    warnings: &mut Vec<String>,
) {
    let type_of = |record: &QueryHandleRecord, id: i64| -> Option<String> {
        record
            .item_context
            .as_ref()
            .and_then(|map| map.get(&id))
            .map(|ctx: &WorkItemContext| ctx.work_item_type.clone())
    };

    for &(source_id, target_id) in pairs {
        // For Parent links the target is the parent; for Child the source is.
        let (parent_id, parent_type, child_id, child_type) = match link_type {
            LinkType::Parent => (
                target_id,
                type_of(target, target_id),
                source_id,
                type_of(source, source_id),
            ),
            LinkType::Child => (
                source_id,
                type_of(source, source_id),
                target_id,
                type_of(target, target_id),
            ),
            _ => continue,
        };
        let (Some(parent_type), Some(child_type)) = (parent_type, child_type) else {
            continue;
        };
        let (Some(parent_rank), Some(child_rank)) = (
            hierarchy_rank(&parent_type),
            hierarchy_rank(&child_type),
        ) else {
            continue;
        };
        if parent_rank <= child_rank {
            warnings.push(format!(
                "'{parent_type}' {parent_id} as parent of '{child_type}' {child_id} \
                 is unusual for a backlog hierarchy"
            ));
        }
    }
}
