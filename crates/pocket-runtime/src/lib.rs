//! # pocket-runtime
//!
//! Concrete collaborators for `pocket-core`.
//!
//! ## Providers
//!
//! - **Anthropic**: Messages API, buffered or streamed over SSE
//! - **MCP**: tool providers spawned as child processes, JSON-RPC over stdio
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pocket_runtime::{AnthropicProvider, McpConnector};
//!
//! let llm = Arc::new(AnthropicProvider::from_env()?);
//! let mut registry = ProviderRegistry::new();
//! registry.register_all(&McpConnector::new(), &settings.providers).await;
//! ```

pub mod anthropic;
pub mod mcp;

pub use anthropic::{AnthropicConfig, AnthropicProvider};
pub use mcp::{McpClient, McpConnector, StdioTransport};

// Re-export core types for convenience
pub use pocket_core::{AgentError, LlmProvider, ProviderEndpoint, ProviderRegistry, Result, ToolProvider};
