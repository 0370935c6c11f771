//! Work-item context and link-type vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-item context carried alongside each work-item id inside a query
/// handle. Populated by the query handler that created the handle and
/// read-only thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemContext {
    pub title: String,
    pub state: String,
    #[serde(rename = "type")]
    pub work_item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_inactive: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_date: Option<DateTime<Utc>>,
}

impl WorkItemContext {
    /// Minimal context for tests and sparse query results.
    pub fn new(title: impl Into<String>, state: impl Into<String>, work_item_type: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            state: state.into(),
            work_item_type: work_item_type.into(),
            assigned_to: None,
            tags: None,
            days_inactive: None,
            iteration_path: None,
            changed_date: None,
        }
    }
}

/// Symbolic work-item link types and their backend reference names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkType {
    Parent,
    Child,
    Related,
    Successor,
    Predecessor,
}

impl LinkType {
    /// The relation reference name the ADO backend expects.
    pub fn reference_name(self) -> &'static str {
        match self {
            Self::Parent => "System.LinkTypes.Hierarchy-Reverse",
            Self::Child => "System.LinkTypes.Hierarchy-Forward",
            Self::Related => "System.LinkTypes.Related",
            Self::Successor => "System.LinkTypes.Dependency-Forward",
            Self::Predecessor => "System.LinkTypes.Dependency-Reverse",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Parent => "Parent",
            Self::Child => "Child",
            Self::Related => "Related",
            Self::Successor => "Successor",
            Self::Predecessor => "Predecessor",
        };
        write!(f, "{}", name)
    }
}
