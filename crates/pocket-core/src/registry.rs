//! Provider Registry
//!
//! Holds one live connection per tool-provider together with the catalog
//! it advertised, aggregates the catalogs for the model, and resolves a
//! tool name to the connection that owns it.
//!
//! Name collisions across providers resolve first-registered-wins: the
//! later descriptor is left out of the aggregate catalog and a warning is
//! logged.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::tool::{ToolDescriptor, ToolProvider};

/// Default deadline for connecting plus catalog discovery
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// How to reach a tool-provider subprocess
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    /// Display name
    pub name: String,

    /// Executable to spawn
    pub command: String,

    /// Arguments for the command
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables passed to the child process
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ProviderEndpoint {
    pub fn new(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            env: HashMap::new(),
        }
    }

    /// Endpoint for a provider script, picking the interpreter from its extension
    pub fn from_script(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let command = match path.extension().and_then(|e| e.to_str()) {
            Some("js" | "mjs") => "node",
            Some("py") if cfg!(windows) => "python",
            Some("py") => "python3",
            _ => {
                return Err(AgentError::Connection(format!(
                    "Server script must be a .js or .py file: {}",
                    display
                )));
            }
        };

        Ok(Self::new(display.clone(), command, vec![display]))
    }
}

/// Turns an endpoint into a live provider (transport bootstrap)
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    async fn connect(&self, endpoint: &ProviderEndpoint) -> Result<Arc<dyn ToolProvider>>;
}

/// A live provider and the catalog it advertised
pub struct ProviderConnection {
    provider: Arc<dyn ToolProvider>,
    tools: Vec<ToolDescriptor>,
}

impl ProviderConnection {
    pub fn name(&self) -> &str {
        self.provider.name()
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn descriptor(&self, tool: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == tool)
    }

    /// Invoke a tool on this provider
    pub async fn call(&self, tool: &str, arguments: serde_json::Value) -> Result<String> {
        self.provider.call_tool(tool, arguments).await
    }
}

impl std::fmt::Debug for ProviderConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConnection")
            .field("name", &self.name())
            .field("tools", &self.tools.len())
            .finish()
    }
}

/// Outcome of registering a batch of endpoints
#[derive(Clone, Debug, Default)]
pub struct RegistrationReport {
    /// Endpoints that connected, in order
    pub connected: Vec<String>,
    /// Endpoints that failed, with the reason
    pub failed: Vec<(String, String)>,
    /// Tool names dropped because an earlier provider already owns them
    pub shadowed: Vec<String>,
}

/// Registry of connected tool-providers
pub struct ProviderRegistry {
    connections: Vec<Arc<ProviderConnection>>,
    /// Tool name -> index into `connections`
    owners: HashMap<String, usize>,
    /// Aggregate catalog, registration order
    catalog: Vec<ToolDescriptor>,
    shadowed: Vec<String>,
    discovery_timeout: Duration,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            connections: Vec::new(),
            owners: HashMap::new(),
            catalog: Vec::new(),
            shadowed: Vec::new(),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Connect to an endpoint and register its catalog
    pub async fn register(
        &mut self,
        connector: &dyn ProviderConnector,
        endpoint: &ProviderEndpoint,
    ) -> Result<Vec<ToolDescriptor>> {
        let provider = tokio::time::timeout(self.discovery_timeout, connector.connect(endpoint))
            .await
            .map_err(|_| {
                AgentError::Connection(format!(
                    "connecting to '{}' timed out after {}s",
                    endpoint.name,
                    self.discovery_timeout.as_secs()
                ))
            })??;

        self.register_provider(provider).await
    }

    /// Discover an already-connected provider's catalog and register it
    pub async fn register_provider(&mut self, provider: Arc<dyn ToolProvider>) -> Result<Vec<ToolDescriptor>> {
        let name = provider.name().to_string();

        let discovered = match tokio::time::timeout(self.discovery_timeout, provider.list_tools()).await {
            Ok(Ok(tools)) => tools,
            Ok(Err(e)) => {
                provider.shutdown().await;
                return Err(AgentError::Connection(format!("discovery on '{}' failed: {}", name, e)));
            }
            Err(_) => {
                provider.shutdown().await;
                return Err(AgentError::Connection(format!(
                    "discovery on '{}' timed out after {}s",
                    name,
                    self.discovery_timeout.as_secs()
                )));
            }
        };

        let slot = self.connections.len();
        for tool in &discovered {
            if let Some(&owner) = self.owners.get(&tool.name) {
                tracing::warn!(
                    tool = %tool.name,
                    kept = %self.connections.get(owner).map_or(name.as_str(), |c| c.name()),
                    ignored = %name,
                    "Duplicate tool name; first registered provider wins"
                );
                self.shadowed.push(tool.name.clone());
                continue;
            }
            self.owners.insert(tool.name.clone(), slot);
            self.catalog.push(tool.clone());
        }

        tracing::info!(
            provider = %name,
            tools = ?discovered.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            "Connected to tool provider"
        );

        self.connections.push(Arc::new(ProviderConnection {
            provider,
            tools: discovered.clone(),
        }));

        Ok(discovered)
    }

    /// Register every endpoint independently; failures are logged and skipped
    pub async fn register_all(
        &mut self,
        connector: &dyn ProviderConnector,
        endpoints: &[ProviderEndpoint],
    ) -> RegistrationReport {
        let mut report = RegistrationReport::default();
        let shadowed_before = self.shadowed.len();

        for endpoint in endpoints {
            match self.register(connector, endpoint).await {
                Ok(_) => report.connected.push(endpoint.name.clone()),
                Err(e) => {
                    tracing::error!(endpoint = %endpoint.name, error = %e, "Failed to connect to tool provider");
                    report.failed.push((endpoint.name.clone(), e.to_string()));
                }
            }
        }

        report.shadowed = self.shadowed[shadowed_before..].to_vec();
        report
    }

    /// Union of all catalogs, without shadowed duplicates
    pub fn all_tools(&self) -> &[ToolDescriptor] {
        &self.catalog
    }

    /// Tool names in catalog order
    pub fn tool_names(&self) -> Vec<&str> {
        self.catalog.iter().map(|t| t.name.as_str()).collect()
    }

    /// Connection that owns a tool
    pub fn resolve(&self, tool: &str) -> Result<Arc<ProviderConnection>> {
        self.owners
            .get(tool)
            .and_then(|&slot| self.connections.get(slot))
            .cloned()
            .ok_or_else(|| AgentError::UnknownTool(tool.to_string()))
    }

    /// Descriptor from the aggregate catalog
    pub fn descriptor(&self, tool: &str) -> Option<&ToolDescriptor> {
        self.catalog.iter().find(|t| t.name == tool)
    }

    /// Tool names that lost a collision
    pub fn shadowed(&self) -> &[String] {
        &self.shadowed
    }

    pub fn connections(&self) -> &[Arc<ProviderConnection>] {
        &self.connections
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Close every connection
    pub async fn shutdown(&self) {
        for connection in &self.connections {
            tracing::debug!(provider = %connection.name(), "Shutting down tool provider");
            connection.provider.shutdown().await;
        }
    }
}
