//! Tool System
//!
//! Tools live in remote tool-providers. The core only sees their
//! descriptors, routes invocations to the owning provider, and folds
//! every outcome into a uniform result envelope.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::message::{ContentBlock, Message};

/// Tool definition advertised by a provider (for LLM function calling)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool identifier across the aggregate catalog
    pub name: String,

    /// Human-readable description (shown to LLM)
    #[serde(default)]
    pub description: String,

    /// JSON Schema of the arguments
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Tool invocation request from the LLM
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Correlation id, carried unchanged into the result
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Arguments as key-value pairs
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolInvocation {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Extract from a `tool_use` block. Non-object input becomes no arguments.
    pub fn from_block(block: &ContentBlock) -> Option<Self> {
        match block {
            ContentBlock::ToolUse { id, name, input } => Some(Self {
                id: id.clone(),
                name: name.clone(),
                arguments: input.as_object().cloned().unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

/// Success payload or failure description
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { content: String },
    Failure { message: String },
}

/// Result from tool execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the invocation this answers
    pub id: String,

    /// Tool that was called
    pub name: String,

    #[serde(flatten)]
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            outcome: ToolOutcome::Success {
                content: content.into(),
            },
        }
    }

    pub fn failure(id: impl Into<String>, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            outcome: ToolOutcome::Failure {
                message: message.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success { .. })
    }

    /// Text the model sees for this result
    pub fn model_text(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success { content } => content.clone(),
            ToolOutcome::Failure { message } => format!("Error: {}", message),
        }
    }

    /// History entry answering the invocation
    pub fn to_message(&self) -> Message {
        Message::tool_result(&self.id, self.model_text(), !self.is_success())
    }
}

/// A remote tool-provider: catalog discovery plus call-by-name
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Display name (endpoint or server name)
    fn name(&self) -> &str;

    /// Discover the provider's tool catalog
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    /// Invoke a tool and return its content payload
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String>;

    /// Release the underlying transport
    async fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_from_block() {
        let block = ContentBlock::ToolUse {
            id: "toolu_1".into(),
            name: "check-balance".into(),
            input: serde_json::json!({"owner": "abc"}),
        };
        let call = ToolInvocation::from_block(&block).unwrap();
        assert_eq!(call.id, "toolu_1");
        assert_eq!(call.arguments["owner"], "abc");

        assert!(ToolInvocation::from_block(&ContentBlock::text("hi")).is_none());
    }

    #[test]
    fn test_non_object_input_is_empty() {
        let block = ContentBlock::ToolUse {
            id: "toolu_2".into(),
            name: "x".into(),
            input: Value::Null,
        };
        assert!(ToolInvocation::from_block(&block).unwrap().arguments.is_empty());
    }

    #[test]
    fn test_result_to_message() {
        let ok = ToolResult::success("t1", "check-balance", "1.5 SOL");
        let msg = ok.to_message();
        assert_eq!(msg.tool_result_ids().collect::<Vec<_>>(), vec!["t1"]);

        let failed = ToolResult::failure("t2", "foo", "Unknown tool: foo");
        assert_eq!(failed.model_text(), "Error: Unknown tool: foo");
        match &failed.to_message().blocks()[0] {
            ContentBlock::ToolResult { is_error, .. } => assert!(*is_error),
            other => panic!("unexpected block {:?}", other),
        }
    }

    #[test]
    fn test_descriptor_default_schema() {
        let desc: ToolDescriptor = serde_json::from_str(r#"{"name":"ping"}"#).unwrap();
        assert_eq!(desc.input_schema["type"], "object");
    }
}
