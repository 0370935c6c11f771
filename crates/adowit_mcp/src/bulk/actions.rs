//! Bulk action variants and their per-item execution.
//!
//! An action is a small state machine over the ADO client: tag edits are a
//! read-modify-write, removal is a comment followed by a state patch. Each
//! per-item application returns a short result description or the error
//! that gets recorded against that item.

use adowit_client::{fields, format_tags, parse_tags, AdoClient, AdoError, PatchOp};
use adowit_protocol::WorkItemContext;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Terminal state used by the `remove` action.
const REMOVED_STATE: &str = "Removed";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BulkAction {
    Comment {
        comment: String,
    },
    Assign {
        #[serde(rename = "assignTo")]
        assign_to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    Update {
        updates: Vec<PatchOp>,
    },
    Remove {
        #[serde(rename = "removeReason")]
        remove_reason: String,
    },
    TransitionState {
        #[serde(rename = "targetState")]
        target_state: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    MoveIteration {
        #[serde(rename = "targetIterationPath")]
        target_iteration_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
        #[serde(rename = "updateChildItems", default)]
        update_child_items: bool,
    },
    AddTag {
        /// Semicolon-separated tag list
        tags: String,
    },
    RemoveTag {
        tags: String,
    },
}

impl BulkAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Comment { .. } => "comment",
            Self::Assign { .. } => "assign",
            Self::Update { .. } => "update",
            Self::Remove { .. } => "remove",
            Self::TransitionState { .. } => "transition-state",
            Self::MoveIteration { .. } => "move-iteration",
            Self::AddTag { .. } => "add-tag",
            Self::RemoveTag { .. } => "remove-tag",
        }
    }

    /// Apply this action to a single work item. Warnings collect non-fatal
    /// notes (already in target state, questionable transition).
    pub async fn apply(
        &self,
        client: &dyn AdoClient,
        id: i64,
        ctx: Option<&WorkItemContext>,
        warnings: &mut Vec<String>,
    ) -> Result<String, AdoError> {
        match self {
            Self::Comment { comment } => {
                client.add_comment(id, comment).await?;
                Ok("comment added".to_string())
            }

            Self::Assign { assign_to, comment } => {
                let ops = vec![PatchOp::set_field(fields::ASSIGNED_TO, json!(assign_to))];
                client.update_work_item(id, ops).await?;
                if let Some(comment) = comment {
                    client.add_comment(id, comment).await?;
                }
                Ok(format!("assigned to {assign_to}"))
            }

            Self::Update { updates } => {
                client.update_work_item(id, updates.clone()).await?;
                Ok(format!("{} field operation(s) applied", updates.len()))
            }

            Self::Remove { remove_reason } => {
                client.add_comment(id, remove_reason).await?;
                let ops = vec![PatchOp::set_field(fields::STATE, json!(REMOVED_STATE))];
                client.update_work_item(id, ops).await?;
                Ok("removed".to_string())
            }

            Self::TransitionState {
                target_state,
                reason,
                comment,
            } => {
                if let Some(ctx) = ctx {
                    if ctx.state.eq_ignore_ascii_case(target_state) {
                        warnings.push(format!(
                            "Work item {id} is already in state '{target_state}'; skipped"
                        ));
                        return Ok("skipped (already in target state)".to_string());
                    }
                    if ctx.state.eq_ignore_ascii_case(REMOVED_STATE)
                        && !target_state.eq_ignore_ascii_case(REMOVED_STATE)
                    {
                        warnings.push(format!(
                            "Work item {id} is in state 'Removed'; transition to \
                             '{target_state}' may be rejected by the backend"
                        ));
                    }
                }
                let mut ops = vec![PatchOp::set_field(fields::STATE, json!(target_state))];
                if let Some(reason) = reason {
                    ops.push(PatchOp::set_field(fields::REASON, json!(reason)));
                }
                client.update_work_item(id, ops).await?;
                if let Some(comment) = comment {
                    client.add_comment(id, comment).await?;
                }
                Ok(format!("transitioned to {target_state}"))
            }

            Self::MoveIteration {
                target_iteration_path,
                comment,
                update_child_items,
            } => {
                let ops = vec![PatchOp::set_field(
                    fields::ITERATION_PATH,
                    json!(target_iteration_path),
                )];
                client.update_work_item(id, ops).await?;
                if let Some(comment) = comment {
                    client.add_comment(id, comment).await?;
                }
                let mut moved_children = 0usize;
                if *update_child_items {
                    for child in child_ids(client, id).await? {
                        let ops = vec![PatchOp::set_field(
                            fields::ITERATION_PATH,
                            json!(target_iteration_path),
                        )];
                        match client.update_work_item(child, ops).await {
                            Ok(_) => moved_children += 1,
                            Err(err) => warnings.push(format!(
                                "Child {child} of work item {id} could not be moved: {err}"
                            )),
                        }
                    }
                }
                if moved_children > 0 {
                    Ok(format!(
                        "moved to {target_iteration_path} (with {moved_children} child item(s))"
                    ))
                } else {
                    Ok(format!("moved to {target_iteration_path}"))
                }
            }

            Self::AddTag { tags } => {
                let item = client.get_work_item(id).await?;
                let current = item.tags();
                let (merged, changed) = merge_tags(&current, &parse_tags(tags));
                if !changed {
                    return Ok("tags unchanged".to_string());
                }
                let ops = vec![PatchOp::set_field(fields::TAGS, json!(format_tags(&merged)))];
                client.update_work_item(id, ops).await?;
                Ok(format!("tags now: {}", format_tags(&merged)))
            }

            Self::RemoveTag { tags } => {
                let item = client.get_work_item(id).await?;
                let current = item.tags();
                let (remaining, changed) = subtract_tags(&current, &parse_tags(tags));
                if !changed {
                    return Ok("tags unchanged".to_string());
                }
                let ops = vec![PatchOp::set_field(
                    fields::TAGS,
                    json!(format_tags(&remaining)),
                )];
                client.update_work_item(id, ops).await?;
                Ok(format!("tags now: {}", format_tags(&remaining)))
            }
        }
    }
}

/// Child ids from the item's hierarchy-forward relations.
async fn child_ids(client: &dyn AdoClient, id: i64) -> Result<Vec<i64>, AdoError> {
    let relations = client.get_relations(id).await?;
    Ok(relations
        .iter()
        .filter(|rel| rel.rel == "System.LinkTypes.Hierarchy-Forward")
        .filter_map(|rel| rel.url.rsplit('/').next()?.parse::<i64>().ok())
        .collect())
}

/// Union, case-insensitive on membership, preserving the casing of retained
/// tags and the provided casing of new ones.
fn merge_tags(current: &[String], incoming: &[String]) -> (Vec<String>, bool) {
    let mut merged = current.to_vec();
    let mut changed = false;
    for tag in incoming {
        if !merged.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            merged.push(tag.clone());
            changed = true;
        }
    }
    (merged, changed)
}

/// Set subtraction, case-insensitive on membership.
fn subtract_tags(current: &[String], incoming: &[String]) -> (Vec<String>, bool) {
    let remaining: Vec<String> = current
        .iter()
        .filter(|tag| !incoming.iter().any(|t| t.eq_ignore_ascii_case(tag)))
        .cloned()
        .collect();
    let changed = remaining.len() != current.len();
    (remaining, changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn action_tags_deserialize_kebab_case() {
        let action: BulkAction = serde_json::from_value(json!({
            "type": "transition-state",
            "targetState": "Resolved"
        }))
        .unwrap();
        assert_eq!(action.label(), "transition-state");

        let action: BulkAction = serde_json::from_value(json!({
            "type": "assign",
            "assignTo": "dev@contoso.com"
        }))
        .unwrap();
        assert_eq!(action.label(), "assign");
    }

    #[test]
    fn merge_preserves_existing_casing() {
        let (merged, changed) = merge_tags(&tags(&["Critical", "backend"]), &tags(&["critical", "new-tag"]));
        assert!(changed);
        assert_eq!(merged, tags(&["Critical", "backend", "new-tag"]));
    }

    #[test]
    fn merge_of_present_tags_is_a_noop() {
        let (merged, changed) = merge_tags(&tags(&["a", "b"]), &tags(&["A", "B"]));
        assert!(!changed);
        assert_eq!(merged, tags(&["a", "b"]));
    }

    #[test]
    fn subtract_is_case_insensitive() {
        let (remaining, changed) = subtract_tags(&tags(&["Critical", "backend"]), &tags(&["CRITICAL"]));
        assert!(changed);
        assert_eq!(remaining, tags(&["backend"]));
    }

    #[test]
    fn add_then_remove_restores_the_tag_set() {
        let original = tags(&["keep-me", "And-Me"]);
        let extra = tags(&["transient"]);
        let (merged, _) = merge_tags(&original, &extra);
        let (restored, _) = subtract_tags(&merged, &extra);
        assert_eq!(restored, original);
    }
}
