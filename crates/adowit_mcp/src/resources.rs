//! Documentation resources.
//!
//! A fixed catalogue of markdown blobs served by URI. The content is
//! embedded at compile time; `resources/read` of an unknown slug fails with
//! "Resource not found".

use adowit_protocol::{ResourceContent, ResourceDescriptor};

const MIME_TYPE: &str = "text/markdown";

struct Resource {
    uri: &'static str,
    name: &'static str,
    description: &'static str,
    text: &'static str,
}

const CATALOGUE: &[Resource] = &[
    Resource {
        uri: "ado://docs/wiql-quick-reference",
        name: "WIQL Quick Reference",
        description: "Common WIQL query shapes, predicates, and gotchas",
        text: include_str!("../docs/wiql-quick-reference.md"),
    },
    Resource {
        uri: "ado://docs/odata-quick-reference",
        name: "OData Analytics Quick Reference",
        description: "Aggregate query shapes for the Analytics OData surface",
        text: include_str!("../docs/odata-quick-reference.md"),
    },
    Resource {
        uri: "ado://docs/query-handle-pattern",
        name: "Query Handle Pattern",
        description: "How query handles, selectors, and expiry work",
        text: include_str!("../docs/query-handle-pattern.md"),
    },
    Resource {
        uri: "ado://docs/bulk-operations-guide",
        name: "Bulk Operations Guide",
        description: "Action variants, execution order, dry runs, and linking",
        text: include_str!("../docs/bulk-operations-guide.md"),
    },
];

/// `resources/list`.
pub fn list() -> Vec<ResourceDescriptor> {
    CATALOGUE
        .iter()
        .map(|resource| ResourceDescriptor {
            uri: resource.uri.to_string(),
            name: resource.name.to_string(),
            description: resource.description.to_string(),
            mime_type: MIME_TYPE.to_string(),
        })
        .collect()
}

/// `resources/read`.
pub fn read(uri: &str) -> Result<ResourceContent, String> {
    CATALOGUE
        .iter()
        .find(|resource| resource.uri == uri)
        .map(|resource| ResourceContent {
            uri: resource.uri.to_string(),
            mime_type: MIME_TYPE.to_string(),
            text: resource.text.to_string(),
        })
        .ok_or_else(|| format!("Resource not found: {uri}"))
}
