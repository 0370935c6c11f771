//! Work-item wire types and the tag string format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical ADO field reference names.
pub mod fields {
    pub const TITLE: &str = "System.Title";
    pub const STATE: &str = "System.State";
    pub const REASON: &str = "System.Reason";
    pub const TAGS: &str = "System.Tags";
    pub const ASSIGNED_TO: &str = "System.AssignedTo";
    pub const ITERATION_PATH: &str = "System.IterationPath";
    pub const CHANGED_DATE: &str = "System.ChangedDate";
    pub const WORK_ITEM_TYPE: &str = "System.WorkItemType";
    pub const HISTORY: &str = "System.History";
}

/// A work item as returned by the REST API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: i64,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<Relation>,
}

impl WorkItem {
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn title(&self) -> &str {
        self.field_str(fields::TITLE).unwrap_or("")
    }

    pub fn state(&self) -> &str {
        self.field_str(fields::STATE).unwrap_or("")
    }

    pub fn work_item_type(&self) -> &str {
        self.field_str(fields::WORK_ITEM_TYPE).unwrap_or("")
    }

    pub fn tags(&self) -> Vec<String> {
        self.field_str(fields::TAGS).map(parse_tags).unwrap_or_default()
    }
}

/// A relation entry on a work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub rel: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Map<String, Value>>,
}

/// A JSON-patch operation against work-item fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: String,
    pub path: String,
    pub value: Value,
}

impl PatchOp {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: "add".to_string(),
            path: path.into(),
            value,
        }
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: "replace".to_string(),
            path: path.into(),
            value,
        }
    }

    /// Field patch at `/fields/<reference name>`.
    pub fn set_field(field: &str, value: Value) -> Self {
        Self::add(format!("/fields/{field}"), value)
    }
}

/// Split a `System.Tags` value on semicolons, trimming segments and
/// dropping empties.
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Join tags back into the `"a; b; c"` wire form.
pub fn format_tags(tags: &[String]) -> String {
    tags.join("; ")
}
