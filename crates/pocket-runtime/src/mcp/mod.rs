//! Model Context Protocol client over stdio
//!
//! Each tool provider is a child process speaking newline-delimited
//! JSON-RPC 2.0. The client performs `initialize`, then serves
//! `tools/list` and `tools/call` for the registry.

pub mod client;
pub mod transport;
pub mod types;

pub use client::{McpClient, McpConnector};
pub use transport::StdioTransport;
