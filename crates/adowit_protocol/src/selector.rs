//! Item selector sum type.
//!
//! Bulk operations address items inside a query handle through one of three
//! shapes: the string `"all"`, a list of zero-based indices into the handle's
//! stored order, or a criteria predicate over the per-item context. Any other
//! JSON shape is an invalid selector and must be rejected before the handle
//! is touched.

use crate::work_item::WorkItemContext;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// One of the three selector shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemSelector {
    /// Every id in the handle, in stored order.
    All,
    /// Zero-based indices; negatives and out-of-range are dropped at
    /// resolution time, duplicates are preserved.
    Indices(Vec<i64>),
    /// Criteria predicate over the stored per-item context.
    Criteria(SelectionCriteria),
}

impl ItemSelector {
    /// Parse a selector from loose JSON. Returns `None` for shapes the spec
    /// does not recognize (null, numbers, strings other than "all", arrays
    /// with non-integer entries, objects with unknown fields).
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if s == "all" => Some(Self::All),
            Value::Array(entries) => {
                let mut indices = Vec::with_capacity(entries.len());
                for entry in entries {
                    indices.push(entry.as_i64()?);
                }
                Some(Self::Indices(indices))
            }
            Value::Object(_) => serde_json::from_value(value.clone()).ok().map(Self::Criteria),
            _ => None,
        }
    }
}

impl Serialize for ItemSelector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::All => serializer.serialize_str("all"),
            Self::Indices(indices) => indices.serialize(serializer),
            Self::Criteria(criteria) => criteria.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ItemSelector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).ok_or_else(|| {
            D::Error::custom("expected \"all\", an array of indices, or a criteria object")
        })
    }
}

impl Default for ItemSelector {
    fn default() -> Self {
        Self::All
    }
}

/// Criteria predicate. Provided fields are ANDed; membership inside
/// `states`/`tags`/`title_contains` is OR, case-insensitive. Inactive-day
/// bounds are inclusive. An item missing the context attribute a specified
/// field needs does not match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SelectionCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_contains: Option<StringOrList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_inactive_min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_inactive_max: Option<u32>,
}

impl SelectionCriteria {
    /// True when no field is provided; an empty criteria matches every item.
    pub fn is_empty(&self) -> bool {
        self.states.is_none()
            && self.tags.is_none()
            && self.title_contains.is_none()
            && self.days_inactive_min.is_none()
            && self.days_inactive_max.is_none()
    }

    /// Evaluate the predicate against one item's context.
    pub fn matches(&self, ctx: &WorkItemContext) -> bool {
        if let Some(states) = &self.states {
            if !states.iter().any(|s| s.eq_ignore_ascii_case(&ctx.state)) {
                return false;
            }
        }

        if let Some(wanted) = &self.tags {
            let Some(item_tags) = &ctx.tags else {
                return false;
            };
            let hit = wanted.iter().any(|wanted_tag| {
                item_tags.iter().any(|t| t.eq_ignore_ascii_case(wanted_tag))
            });
            if !hit {
                return false;
            }
        }

        if let Some(needles) = &self.title_contains {
            let title = ctx.title.to_lowercase();
            let hit = needles
                .iter()
                .any(|needle| title.contains(&needle.to_lowercase()));
            if !hit {
                return false;
            }
        }

        if self.days_inactive_min.is_some() || self.days_inactive_max.is_some() {
            let Some(days) = ctx.days_inactive else {
                return false;
            };
            if let Some(min) = self.days_inactive_min {
                if days < min {
                    return false;
                }
            }
            if let Some(max) = self.days_inactive_max {
                if days > max {
                    return false;
                }
            }
        }

        true
    }
}

/// A single string or a list of strings; both appear in the wild for
/// `titleContains`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            Self::One(s) => std::slice::from_ref(s),
            Self::Many(list) => list.as_slice(),
        };
        slice.iter().map(String::as_str)
    }
}
