//! Shared wire and domain types for the adowit MCP server.
//!
//! Three layers live here:
//!
//! - `jsonrpc`: JSON-RPC 2.0 message types (transport payloads)
//! - `mcp`: Model Context Protocol message types (initialize, tools, resources)
//! - domain: the tool result envelope, work-item context, and the item
//!   selector sum type shared by the query handle store and every bulk tool

pub mod envelope;
pub mod jsonrpc;
pub mod mcp;
pub mod selector;
pub mod work_item;

pub use envelope::ToolResponse;
pub use jsonrpc::{ErrorCode, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};
pub use mcp::{
    ContentBlock, InitializeParams, InitializeResult, ResourceContent, ResourceDescriptor,
    ServerCapabilities, ServerInfo, ToolCallParams, ToolCallResult, ToolDefinition,
    ToolsListResult, JSONRPC_VERSION, MCP_PROTOCOL_VERSION,
};
pub use selector::{ItemSelector, SelectionCriteria};
pub use work_item::{LinkType, WorkItemContext};
