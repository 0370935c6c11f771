//! MCP server for Azure DevOps work tracking.
//!
//! # Architecture
//!
//! A reader task drains the peer byte stream through the framing state
//! machine, a writer task drains the outbound queue, and tool invocations
//! run as worker tasks so slow ADO round-trips never block the wire.
//!
//! Bulk operations never ship result sets through the peer: queries
//! materialize into the in-process [`handles::QueryHandleStore`] and tools
//! address items through opaque, time-limited query handles.

pub mod bulk;
pub mod config;
pub mod handles;
pub mod metrics;
pub mod openapi;
pub mod prompts;
pub mod resources;
pub mod sampling;
pub mod server;
pub mod tools;
pub mod transport;

pub use config::ServerConfig;
pub use server::McpServer;
