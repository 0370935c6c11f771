//! Registered prompt templates.
//!
//! Templates use `{{name}}` placeholders. The `get-prompts` tool lists them
//! and optionally renders one with arguments; the AI analysis tool feeds a
//! rendered template into the sampling client.

use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize)]
pub struct PromptTemplate {
    pub name: &'static str,
    pub description: &'static str,
    pub arguments: &'static [&'static str],
    #[serde(skip)]
    pub content: &'static str,
}

impl PromptTemplate {
    /// Substitute `{{arg}}` placeholders. Unknown placeholders stay as-is so
    /// a missing argument is visible in the output rather than silently
    /// blanked.
    pub fn render(&self, args: &Map<String, Value>) -> String {
        let mut text = self.content.to_string();
        for (key, value) in args {
            let needle = format!("{{{{{key}}}}}");
            let replacement = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            text = text.replace(&needle, &replacement);
        }
        text
    }
}

const WORK_ITEM_ANALYZER: PromptTemplate = PromptTemplate {
    name: "work-item-analyzer",
    description: "Categorize work items and flag candidates for closure, follow-up, or escalation",
    arguments: &["items", "focus"],
    content: "You are reviewing Azure DevOps work items.\n\
Analyze the following items and group them into: actionable now, needs \
clarification, stale candidate for closure, and escalate.\n\
Focus area: {{focus}}\n\nItems:\n{{items}}\n\n\
Reply with one line per item: <id>: <category> - <one sentence rationale>.",
};

const BACKLOG_CLEANUP_PLANNER: PromptTemplate = PromptTemplate {
    name: "backlog-cleanup-planner",
    description: "Propose a bulk cleanup plan (remove, re-assign, re-tag) for a stale backlog slice",
    arguments: &["items", "days_inactive"],
    content: "These Azure DevOps work items have been inactive for at least \
{{days_inactive}} days:\n{{items}}\n\n\
Propose a cleanup plan. For each item suggest exactly one of: remove (with \
reason), reassign (to whom), re-tag (which tags), or keep (why). Be terse.",
};

const SPRINT_HEALTH_REVIEW: PromptTemplate = PromptTemplate {
    name: "sprint-health-review",
    description: "Summarize sprint health from the states and ages of the selected items",
    arguments: &["items", "iteration"],
    content: "Sprint under review: {{iteration}}\nWork items:\n{{items}}\n\n\
Summarize sprint health in three short paragraphs: throughput, risks, and \
recommended next actions.",
};

const TEMPLATES: &[PromptTemplate] = &[
    WORK_ITEM_ANALYZER,
    BACKLOG_CLEANUP_PLANNER,
    SPRINT_HEALTH_REVIEW,
];

/// All registered templates.
pub fn all() -> &'static [PromptTemplate] {
    TEMPLATES
}

/// Look up a template by name.
pub fn find(name: &str) -> Option<&'static PromptTemplate> {
    TEMPLATES.iter().find(|t| t.name == name)
}
