//! MCP Server implementation
//!
//! Line-delimited JSON-RPC over stdio. stdout carries protocol messages
//! only; logs go to stderr.

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::mcp::tools::ToolHandler;
use crate::mcp::types::*;

/// MCP Server info
const SERVER_NAME: &str = "google-workspace";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// MCP Server for Google services
pub struct McpServer {
    tool_handler: ToolHandler,
    initialized: bool,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(tool_handler: ToolHandler) -> Self {
        Self {
            tool_handler,
            initialized: false,
        }
    }

    /// Run the server on stdio
    pub async fn run_stdio(&mut self) -> Result<()> {
        self.run(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve requests from `reader` until EOF, writing responses to `writer`
    pub async fn run<R, W>(&mut self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            if let Some(response) = self.handle_message(&line).await {
                let mut out = serde_json::to_vec(&response)?;
                out.push(b'\n');
                writer.write_all(&out).await?;
                writer.flush().await?;
            }
        }

        info!("stdin closed, shutting down");
        Ok(())
    }

    /// Handle one incoming message; notifications produce no response
    pub async fn handle_message(&mut self, message: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(message) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "unparseable message");
                return Some(JsonRpcResponse::error(
                    RequestId::Number(0),
                    JsonRpcError::parse_error(e.to_string()),
                ));
            }
        };

        let Some(id) = request.id.clone() else {
            if request.method == methods::INITIALIZED {
                self.initialized = true;
                debug!("client initialized");
            }
            return None;
        };

        let response = match request.method.as_str() {
            methods::INITIALIZE => JsonRpcResponse::success(id, self.initialize_result()),
            methods::PING => JsonRpcResponse::success(id, json!({})),
            methods::LIST_TOOLS => {
                JsonRpcResponse::success(id, json!({ "tools": self.tool_handler.list_tools() }))
            }
            methods::CALL_TOOL => match request.params.map(serde_json::from_value::<CallToolParams>) {
                Some(Ok(params)) => {
                    debug!(tool = %params.name, "calling tool");
                    let result = self.tool_handler.call_tool(&params.name, params.arguments).await;
                    JsonRpcResponse::success(id, json!(result))
                }
                Some(Err(e)) => JsonRpcResponse::error(
                    id,
                    JsonRpcError::invalid_params(format!("Invalid tool parameters: {}", e)),
                ),
                None => JsonRpcResponse::error(id, JsonRpcError::invalid_params("Missing tool parameters")),
            },
            other => JsonRpcResponse::error(id, JsonRpcError::method_not_found(other)),
        };

        Some(response)
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": MCP_VERSION,
            "serverInfo": {
                "name": SERVER_NAME,
                "version": SERVER_VERSION,
            },
            "capabilities": {
                "tools": {}
            }
        })
    }

    /// Whether the client has sent `notifications/initialized`
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}
