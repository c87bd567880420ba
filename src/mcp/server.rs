//! MCP Server Implementation
//!
//! Line-delimited JSON-RPC over any async reader/writer pair, with stdio as
//! the production transport.

use crate::mcp::protocol::*;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Connection state tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

/// Rejected tool arguments; reported with the invalid params code
#[derive(Debug, Error)]
#[error("{0}")]
pub struct InvalidParams(pub String);

/// Tool handler trait for implementing tool execution
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult>;
}

struct RegisteredTool {
    definition: Tool,
    handler: Box<dyn ToolHandler>,
}

pub struct McpServer {
    server_info: Implementation,
    capabilities: ServerCapabilities,
    instructions: String,
    tools: RwLock<HashMap<String, RegisteredTool>>,
    connection_state: RwLock<ConnectionState>,
}

impl McpServer {
    #[inline]
    pub fn new(name: String, version: String, instructions: String) -> Self {
        Self {
            server_info: Implementation { name, version },
            capabilities: ServerCapabilities {
                logging: Some(LoggingCapability {}),
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
            },
            instructions,
            tools: RwLock::new(HashMap::new()),
            connection_state: RwLock::new(ConnectionState::Uninitialized),
        }
    }

    /// Register a tool with the server
    #[inline]
    pub async fn register_tool<H>(&self, definition: Tool, handler: H)
    where
        H: ToolHandler + 'static,
    {
        let name = definition.name.clone();
        self.tools.write().await.insert(
            name.clone(),
            RegisteredTool {
                definition,
                handler: Box::new(handler),
            },
        );
        debug!("Registered tool: {}", name);
    }

    #[inline]
    pub async fn connection_state(&self) -> ConnectionState {
        *self.connection_state.read().await
    }

    /// Start the server using stdio transport
    #[inline]
    pub async fn serve_stdio(self: Arc<Self>) -> Result<()> {
        info!("Starting MCP server with stdio transport");
        self.serve(BufReader::new(io::stdin()), io::stdout()).await
    }

    /// Process one message per line until `reader` reaches EOF.
    ///
    /// Tool calls run on their own tasks and reply as they finish, so a long
    /// `answer_questions` call does not hold up other requests. Everything
    /// else is handled in arrival order.
    #[inline]
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (replies, mut outbox) = mpsc::unbounded_channel::<JsonRpcMessage>();

        let reading = Arc::clone(&self).read_messages(reader, replies);
        let writing = async move {
            while let Some(reply) = outbox.recv().await {
                send_message(&mut writer, &reply).await?;
            }
            Ok::<(), anyhow::Error>(())
        };
        let result = tokio::try_join!(reading, writing).map(|_| ());

        *self.connection_state.write().await = ConnectionState::Closed;
        info!("MCP server stopped");
        result
    }

    async fn read_messages<R>(
        self: Arc<Self>,
        mut reader: R,
        replies: mpsc::UnboundedSender<JsonRpcMessage>,
    ) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut in_flight = JoinSet::new();
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    info!("EOF reached, closing connection");
                    break;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let reply = match parse_message(trimmed) {
                        Ok(JsonRpcMessage::Request(request)) if request.method == "tools/call" => {
                            let server = Arc::clone(&self);
                            let replies = replies.clone();
                            in_flight.spawn(async move {
                                let reply = server.handle_request(request).await;
                                // receiver gone means the writer already failed
                                let _ = replies.send(reply);
                            });
                            None
                        }
                        Ok(message) => self.dispatch(message).await,
                        Err(reply) => Some(reply),
                    };
                    if let Some(reply) = reply {
                        let _ = replies.send(reply);
                    }
                }
                Err(e) => {
                    error!("Error reading from transport: {}", e);
                    break;
                }
            }

            while let Some(finished) = in_flight.try_join_next() {
                if let Err(e) = finished {
                    error!("Tool call task failed: {}", e);
                }
            }
        }

        while let Some(finished) = in_flight.join_next().await {
            if let Err(e) = finished {
                error!("Tool call task failed: {}", e);
            }
        }
        Ok(())
    }

    /// Reply to one raw line, if it calls for a reply.
    #[inline]
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcMessage> {
        match parse_message(line) {
            Ok(message) => self.dispatch(message).await,
            Err(reply) => Some(reply),
        }
    }

    async fn dispatch(&self, message: JsonRpcMessage) -> Option<JsonRpcMessage> {
        match message {
            JsonRpcMessage::Request(request) => Some(self.handle_request(request).await),
            JsonRpcMessage::Notification(notification) => {
                self.handle_notification(&notification).await;
                None
            }
            JsonRpcMessage::Response(_) | JsonRpcMessage::ErrorResponse(_) => {
                warn!("Received unexpected response message from client");
                None
            }
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcMessage {
        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params).await,
            "tools/list" => self.handle_list_tools().await,
            "tools/call" => self.handle_call_tool(request.params).await,
            "ping" => Ok(serde_json::json!({})),
            _ => {
                debug!("Unknown method: {}", request.method);
                return error_message(JsonRpcError::method_not_found(), Some(request.id));
            }
        };

        match result {
            Ok(result) => JsonRpcMessage::Response(JsonRpcResponse::new(result, request.id)),
            Err(e) => {
                let error = if let Some(invalid) = e.downcast_ref::<InvalidParams>() {
                    JsonRpcError::invalid_params(Some(invalid.to_string()))
                } else {
                    error!("Error handling request {}: {:#}", request.method, e);
                    JsonRpcError::internal_error(Some(format!("{:#}", e)))
                };
                error_message(error, Some(request.id))
            }
        }
    }

    async fn handle_notification(&self, notification: &JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" | "initialized" => {
                *self.connection_state.write().await = ConnectionState::Ready;
                info!("Server ready to handle requests");
            }
            "notifications/cancelled" => {
                debug!("Received cancellation notification");
            }
            other => {
                warn!("Unknown notification method: {}", other);
            }
        }
    }

    async fn handle_initialize(&self, params: Option<Value>) -> Result<Value> {
        let params: InitializeParams = params
            .ok_or_else(|| InvalidParams("Initialize request missing parameters".to_string()))
            .and_then(|p| {
                serde_json::from_value(p).map_err(|e| InvalidParams(e.to_string()))
            })?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()) {
            return Err(InvalidParams(format!(
                "Unsupported protocol version: {}. Supported: {}",
                params.protocol_version,
                SUPPORTED_PROTOCOL_VERSIONS.join(", ")
            ))
            .into());
        }

        *self.connection_state.write().await = ConnectionState::Initializing;

        let result = InitializeResult {
            protocol_version: params.protocol_version,
            capabilities: self.capabilities.clone(),
            server_info: self.server_info.clone(),
            instructions: Some(self.instructions.clone()),
        };

        info!("Client initialized: {}", params.client_info.name);
        Ok(serde_json::to_value(result)?)
    }

    async fn handle_list_tools(&self) -> Result<Value> {
        let tools = self.tools.read().await;
        let mut definitions: Vec<Tool> = tools.values().map(|t| t.definition.clone()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(serde_json::to_value(ListToolsResult { tools: definitions })?)
    }

    async fn handle_call_tool(&self, params: Option<Value>) -> Result<Value> {
        let params: CallToolParams = params
            .ok_or_else(|| InvalidParams("Tool call request missing parameters".to_string()))
            .and_then(|p| {
                serde_json::from_value(p).map_err(|e| InvalidParams(e.to_string()))
            })?;

        if self.connection_state().await != ConnectionState::Ready {
            debug!("Tool {} called before initialization completed", params.name);
        }

        let tools = self.tools.read().await;
        let tool = tools
            .get(&params.name)
            .ok_or_else(|| InvalidParams(format!("Tool not found: {}", params.name)))?;

        let result = tool.handler.handle(params).await?;
        Ok(serde_json::to_value(result)?)
    }
}

/// Decode one line, or produce the error reply for it
fn parse_message(line: &str) -> std::result::Result<JsonRpcMessage, JsonRpcMessage> {
    let raw: Value = serde_json::from_str(line).map_err(|e| {
        error!("Failed to parse JSON: {}", e);
        error_message(JsonRpcError::parse_error(), None)
    })?;

    match serde_json::from_value::<JsonRpcMessage>(raw) {
        Ok(message) if message.jsonrpc() == JSONRPC_VERSION => Ok(message),
        Ok(_) | Err(_) => {
            warn!("Rejected message that is not JSON-RPC {}", JSONRPC_VERSION);
            Err(error_message(JsonRpcError::invalid_request(), None))
        }
    }
}

fn error_message(error: JsonRpcError, id: Option<RequestId>) -> JsonRpcMessage {
    JsonRpcMessage::ErrorResponse(JsonRpcErrorResponse::new(error, id))
}

async fn send_message<W>(writer: &mut W, message: &JsonRpcMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(message)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
