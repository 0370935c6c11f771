//! Azure DevOps REST client boundary.
//!
//! The bulk engine and the query tools talk to ADO exclusively through the
//! [`AdoClient`] trait. [`RestAdoClient`] is the production implementation
//! over `reqwest`; tests substitute recording mocks.

mod client;
mod error;
mod types;

pub use client::{AdoClient, RestAdoClient};
pub use error::AdoError;
pub use types::{fields, format_tags, parse_tags, PatchOp, Relation, WorkItem};
