//! Unified bulk-operation engine.
//!
//! A bulk call resolves a query handle plus an item selector to a concrete
//! work-item set, then runs an ordered list of actions over it. Failures are
//! isolated per item; dry runs preview the selection without side effects.

mod actions;
mod engine;
mod link;

pub use actions::BulkAction;
pub use engine::{BulkEngine, BulkRequest, DEFAULT_PREVIEW_ITEMS};
pub use link::{LinkRequest, LinkStrategy};
