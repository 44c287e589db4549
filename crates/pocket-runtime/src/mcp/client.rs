//! MCP tool client
//!
//! Performs the `initialize` handshake, then serves `tools/list` and
//! `tools/call` through the core `ToolProvider` trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pocket_core::error::{AgentError, Result};
use pocket_core::registry::{ProviderConnector, ProviderEndpoint};
use pocket_core::tool::{ToolDescriptor, ToolProvider};
use serde_json::Value;

use super::transport::StdioTransport;
use super::types::{
    Implementation, InitializeParams, InitializeResult, JsonRpcError, JsonRpcResponse, ToolCallParams,
    ToolCallResult, ToolsListResult, METHOD_NOT_FOUND,
};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

pub struct McpClient {
    name: String,
    transport: StdioTransport,
    server_info: Option<Implementation>,
    request_timeout: Duration,
    call_timeout: Duration,
}

impl McpClient {
    /// Spawn the endpoint and complete the handshake
    pub async fn connect(endpoint: &ProviderEndpoint) -> Result<Self> {
        Self::connect_with(endpoint, DEFAULT_REQUEST_TIMEOUT, DEFAULT_CALL_TIMEOUT).await
    }

    async fn connect_with(endpoint: &ProviderEndpoint, request_timeout: Duration, call_timeout: Duration) -> Result<Self> {
        tracing::info!(
            provider = %endpoint.name,
            command = %endpoint.command,
            args = ?endpoint.args,
            "Starting MCP server"
        );
        let transport = StdioTransport::spawn(endpoint)?;
        Self::handshake(&endpoint.name, transport, request_timeout, call_timeout).await
    }

    /// Initialize over an already-open transport
    pub async fn handshake(
        name: &str,
        transport: StdioTransport,
        request_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Self> {
        let mut client = Self {
            name: name.to_string(),
            transport,
            server_info: None,
            request_timeout,
            call_timeout,
        };

        if let Err(e) = client.initialize().await {
            client.transport.shutdown().await;
            return Err(e);
        }
        Ok(client)
    }

    async fn initialize(&mut self) -> Result<()> {
        let params = serde_json::to_value(InitializeParams::default())?;
        let response = self
            .transport
            .request("initialize", Some(params), self.request_timeout)
            .await?;

        let result = into_result(response).map_err(|e| {
            AgentError::Connection(format!("'{}' rejected initialize: {} ({})", self.name, e.message, e.code))
        })?;
        let init: InitializeResult = serde_json::from_value(result.unwrap_or(Value::Null))
            .map_err(|e| AgentError::Connection(format!("'{}' sent a bad initialize result: {}", self.name, e)))?;

        tracing::info!(
            provider = %self.name,
            server = init.server_info.as_ref().map_or("unknown", |s| s.name.as_str()),
            protocol = %init.protocol_version,
            "MCP server initialized"
        );
        self.server_info = init.server_info;

        self.transport.notify("notifications/initialized", None).await
    }

    pub fn server_info(&self) -> Option<&Implementation> {
        self.server_info.as_ref()
    }
}

#[async_trait]
impl ToolProvider for McpClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let response = self.transport.request("tools/list", None, self.request_timeout).await?;

        let result = match into_result(response) {
            Ok(result) => result,
            Err(e) if e.code == METHOD_NOT_FOUND => {
                tracing::info!(provider = %self.name, "Server does not expose tools");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(AgentError::Connection(format!(
                    "tools/list failed on '{}': {}",
                    self.name, e.message
                )));
            }
        };

        let Some(result) = result else {
            return Ok(Vec::new());
        };
        let list: ToolsListResult = serde_json::from_value(result)?;
        Ok(list.tools.into_iter().map(ToolDescriptor::from).collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String> {
        let params = serde_json::to_value(ToolCallParams {
            name: name.to_string(),
            arguments,
        })?;
        let response = self.transport.request("tools/call", Some(params), self.call_timeout).await?;

        let result = into_result(response)
            .map_err(|e| AgentError::ToolExecution(e.message))?
            .ok_or_else(|| AgentError::ToolExecution(format!("{} returned no result", name)))?;
        let result: ToolCallResult = serde_json::from_value(result)?;

        let text = result.text();
        if result.is_error {
            return Err(AgentError::ToolExecution(if text.is_empty() {
                format!("{} reported an error", name)
            } else {
                text
            }));
        }
        Ok(text)
    }

    async fn shutdown(&self) {
        tracing::debug!(provider = %self.name, "Shutting down MCP client");
        self.transport.shutdown().await;
    }
}

fn into_result(response: JsonRpcResponse) -> std::result::Result<Option<Value>, JsonRpcError> {
    match response.error {
        Some(error) => Err(error),
        None => Ok(response.result),
    }
}

/// Connects registry endpoints to MCP servers over stdio
#[derive(Debug, Clone)]
pub struct McpConnector {
    request_timeout: Duration,
    call_timeout: Duration,
}

impl Default for McpConnector {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl McpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Transport-level ceiling for `tools/call`; the invoker applies its own
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

#[async_trait]
impl ProviderConnector for McpConnector {
    async fn connect(&self, endpoint: &ProviderEndpoint) -> Result<Arc<dyn ToolProvider>> {
        let client = McpClient::connect_with(endpoint, self.request_timeout, self.call_timeout).await?;
        Ok(Arc::new(client))
    }
}
