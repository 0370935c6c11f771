//! The JSON-RPC dispatcher.
//!
//! Routes inbound requests to tool handlers, enforces per-tool input
//! validation, and wraps every handler outcome in the uniform result
//! envelope. Tool calls run as worker tasks under a per-call timeout so a
//! slow ADO round-trip never blocks the wire; responses go out in
//! submission order through the transport's writer task.

use crate::config::ServerConfig;
use crate::resources;
use crate::tools::{ToolContext, ToolRegistry};
use crate::transport::{Transport, TransportEvent};
use adowit_protocol::mcp::methods;
use adowit_protocol::{
    ContentBlock, ErrorCode, InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, RequestId, ServerCapabilities, ServerInfo, ToolCallParams, ToolCallResult,
    ToolResponse, ToolsListResult, JSONRPC_VERSION, MCP_PROTOCOL_VERSION,
};
use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

pub struct McpServer<R, W> {
    config: ServerConfig,
    transport: Arc<Transport<R, W>>,
    registry: Arc<ToolRegistry>,
    ctx: Arc<ToolContext>,
    initialized: Arc<AtomicBool>,
}

impl<R, W> McpServer<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        config: ServerConfig,
        transport: Transport<R, W>,
        registry: ToolRegistry,
        ctx: ToolContext,
    ) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            registry: Arc::new(registry),
            ctx: Arc::new(ctx),
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Serve until the transport closes.
    pub async fn run(&self) -> Result<()> {
        let mut events = self.transport.start()?;
        self.ctx.store.start_cleanup();
        info!(
            organization = %self.config.organization,
            project = %self.config.project,
            "MCP server starting"
        );

        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Message(value) => self.handle_message(value).await,
                TransportEvent::ParseError(detail) => {
                    self.ctx.metrics.increment_counter("frames_rejected", &[]);
                    let response = JsonRpcResponse::error(
                        None,
                        JsonRpcError::new(ErrorCode::ParseError, format!("Invalid JSON: {detail}")),
                    );
                    self.send(response).await;
                }
                TransportEvent::IoError(detail) => {
                    warn!("Transport read error: {detail}");
                }
                TransportEvent::Closed => break,
            }
        }

        info!("MCP server shutting down");
        self.ctx.store.stop_cleanup();
        self.transport.close().await;
        Ok(())
    }

    async fn handle_message(&self, value: Value) {
        self.ctx.metrics.increment_counter("frames_received", &[]);

        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(err) => {
                let response = JsonRpcResponse::error(
                    None,
                    JsonRpcError::new(
                        ErrorCode::InvalidRequest,
                        format!("Invalid request object: {err}"),
                    ),
                );
                self.send(response).await;
                return;
            }
        };

        if request.jsonrpc != JSONRPC_VERSION {
            let response = JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(
                    ErrorCode::InvalidRequest,
                    format!("Invalid JSON-RPC version: {}", request.jsonrpc),
                ),
            );
            self.send(response).await;
            return;
        }

        debug!(method = %request.method, "Request");

        match request.method.as_str() {
            methods::INITIALIZE => {
                let response = self.handle_initialize(request);
                self.send(response).await;
            }
            methods::INITIALIZED => {
                // Notifications receive no response; an initialized request
                // with an id (unusual but valid) gets an empty result.
                if let Some(id) = request.id {
                    self.send(JsonRpcResponse::success(Some(id), Value::Null))
                        .await;
                }
            }
            methods::PING => {
                self.send(JsonRpcResponse::success(
                    request.id,
                    Value::Object(Default::default()),
                ))
                .await;
            }
            methods::TOOLS_LIST => {
                let result = ToolsListResult {
                    tools: self.registry.list_tools(),
                };
                self.send(JsonRpcResponse::success(
                    request.id,
                    serde_json::to_value(result).unwrap_or(Value::Null),
                ))
                .await;
            }
            methods::RESOURCES_LIST => {
                let result = json!({ "resources": resources::list() });
                self.send(JsonRpcResponse::success(request.id, result)).await;
            }
            methods::RESOURCES_READ => {
                let response = handle_resources_read(request);
                self.send(response).await;
            }
            methods::TOOLS_CALL => self.handle_tools_call(request).await,
            other => {
                let response = JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::new(
                        ErrorCode::MethodNotFound,
                        format!("Unknown method: {other}"),
                    ),
                );
                self.send(response).await;
            }
        }
    }

    fn handle_initialize(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let params: InitializeParams = match request.params {
            Some(params) => match serde_json::from_value(params) {
                Ok(params) => params,
                Err(err) => {
                    return JsonRpcResponse::error(
                        request.id,
                        JsonRpcError::new(
                            ErrorCode::InvalidParams,
                            format!("Invalid initialize params: {err}"),
                        ),
                    )
                }
            },
            None => {
                return JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::new(ErrorCode::InvalidParams, "Missing initialize params"),
                )
            }
        };

        info!(
            client = %params.client_info.name,
            version = %params.client_info.version,
            protocol = %params.protocol_version,
            "Initialize"
        );
        self.initialized.store(true, Ordering::SeqCst);

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(adowit_protocol::mcp::ToolsCapability {
                    list_changed: false,
                }),
                resources: Some(json!({})),
                prompts: None,
            },
            server_info: ServerInfo {
                name: self.config.server_name.clone(),
                version: self.config.server_version.clone(),
            },
        };
        JsonRpcResponse::success(
            request.id,
            serde_json::to_value(result).unwrap_or(Value::Null),
        )
    }

    async fn handle_tools_call(&self, request: JsonRpcRequest) {
        if !self.initialized.load(Ordering::SeqCst) {
            let response = JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(ErrorCode::ServerError(-32002), "Server not initialized"),
            );
            self.send(response).await;
            return;
        }

        let id = request.id.clone();
        let params: ToolCallParams = match request.params {
            Some(params) => match serde_json::from_value(params) {
                Ok(params) => params,
                Err(err) => {
                    let response = JsonRpcResponse::error(
                        id,
                        JsonRpcError::new(
                            ErrorCode::InvalidParams,
                            format!("Invalid tool call params: {err}"),
                        ),
                    );
                    self.send(response).await;
                    return;
                }
            },
            None => {
                let response = JsonRpcResponse::error(
                    id,
                    JsonRpcError::new(ErrorCode::InvalidParams, "Missing tool call params"),
                );
                self.send(response).await;
                return;
            }
        };

        let limit = match self.registry.get(&params.name) {
            Some(tool) if tool.is_bulk() => self.config.bulk_tool_timeout,
            _ => self.config.tool_timeout,
        };

        info!(tool = %params.name, "Tool call");
        let registry = Arc::clone(&self.registry);
        let ctx = Arc::clone(&self.ctx);
        let transport = Arc::clone(&self.transport);

        // Each call runs as its own worker task; the wire stays responsive.
        tokio::spawn(async move {
            let started = Instant::now();
            let name = params.name.clone();
            let inner = {
                let registry = Arc::clone(&registry);
                let ctx = Arc::clone(&ctx);
                let name = name.clone();
                tokio::spawn(async move {
                    registry.call_tool(&name, params.arguments, &ctx).await
                })
            };

            let envelope = match tokio::time::timeout(limit, inner).await {
                Ok(Ok(envelope)) => envelope,
                Ok(Err(join_err)) => {
                    error!(tool = %name, "Tool task failed: {join_err}");
                    ToolResponse::error(
                        format!("Internal error: tool '{name}' aborted"),
                        "dispatcher",
                    )
                }
                Err(_) => {
                    // The in-flight call is abandoned; completed per-item
                    // changes remain.
                    ToolResponse::error(
                        format!(
                            "Tool '{name}' timed out after {}s (timeout)",
                            limit.as_secs()
                        ),
                        "dispatcher",
                    )
                }
            };

            ctx.metrics.increment_counter(
                "tool_calls",
                &[
                    ("tool", name.as_str()),
                    ("outcome", if envelope.success { "ok" } else { "error" }),
                ],
            );
            ctx.metrics.record_duration(
                "tool_duration_ms",
                &[("tool", name.as_str())],
                started.elapsed(),
            );

            let response = envelope_response(id, &envelope);
            if let Err(err) = transport
                .send(serde_json::to_value(response).unwrap_or(Value::Null))
                .await
            {
                warn!("Could not send tool response: {err}");
            }
        });
    }

    async fn send(&self, response: JsonRpcResponse) {
        match serde_json::to_value(&response) {
            Ok(value) => {
                if let Err(err) = self.transport.send(value).await {
                    warn!("Could not send response: {err}");
                }
            }
            Err(err) => error!("Could not serialize response: {err}"),
        }
    }
}

/// Wrap an envelope into the MCP tool-call result shape.
fn envelope_response(id: Option<RequestId>, envelope: &ToolResponse) -> JsonRpcResponse {
    let text = serde_json::to_string(envelope)
        .unwrap_or_else(|err| format!("{{\"success\":false,\"errors\":[\"serialization failed: {err}\"]}}"));
    let result = ToolCallResult {
        content: vec![ContentBlock::text(text)],
        is_error: !envelope.success,
    };
    JsonRpcResponse::success(
        id,
        serde_json::to_value(result).unwrap_or(Value::Null),
    )
}

#[derive(Debug, Deserialize)]
struct ResourcesReadParams {
    uri: String,
}

fn handle_resources_read(request: JsonRpcRequest) -> JsonRpcResponse {
    let params: ResourcesReadParams = match request.params {
        Some(params) => match serde_json::from_value(params) {
            Ok(params) => params,
            Err(err) => {
                return JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::new(
                        ErrorCode::InvalidParams,
                        format!("Invalid resources/read params: {err}"),
                    ),
                )
            }
        },
        None => {
            return JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(ErrorCode::InvalidParams, "Missing resources/read params"),
            )
        }
    };

    match resources::read(&params.uri) {
        Ok(content) => JsonRpcResponse::success(
            request.id,
            json!({ "contents": [content] }),
        ),
        Err(message) => JsonRpcResponse::error(
            request.id,
            JsonRpcError::new(ErrorCode::ServerError(-32001), message),
        ),
    }
}
