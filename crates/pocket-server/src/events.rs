//! WebSocket wire events
//!
//! Every frame is a JSON object tagged by `type`.

use pocket_core::reasoning::{LoopEvent, LoopOutcome, ToolTrace};
use pocket_core::session::Exchange;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames sent by the browser
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Query { text: String },
    GetHistory,
    ClearHistory,
    GetWallet,
    ClearWallet,
}

/// Frames sent to the browser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        session_id: String,
        tools: Vec<String>,
    },
    Processing,
    Thinking {
        iteration: usize,
    },
    TextDelta {
        text: String,
    },
    ToolCalled {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        id: String,
        name: String,
        content: String,
    },
    ToolError {
        id: String,
        name: String,
        message: String,
    },
    Response {
        text: String,
        iterations: usize,
        tool_trace: Vec<ToolTrace>,
        elapsed_ms: u64,
    },
    MaxIterationsReached {
        max_iterations: usize,
    },
    Error {
        message: String,
    },
    History {
        exchanges: Vec<Exchange>,
    },
    HistoryCleared,
    Wallet {
        address: Option<String>,
    },
}

impl From<LoopEvent> for ServerEvent {
    fn from(event: LoopEvent) -> Self {
        match event {
            LoopEvent::IterationStarted { iteration } => Self::Thinking { iteration },
            LoopEvent::TextDelta { text } => Self::TextDelta { text },
            LoopEvent::ToolCalled { id, name, arguments } => Self::ToolCalled { id, name, arguments },
            LoopEvent::ToolSucceeded { id, name, content } => Self::ToolResult { id, name, content },
            LoopEvent::ToolFailed { id, name, message } => Self::ToolError { id, name, message },
            LoopEvent::IterationLimitReached { max_iterations } => Self::MaxIterationsReached { max_iterations },
        }
    }
}

impl From<LoopOutcome> for ServerEvent {
    fn from(outcome: LoopOutcome) -> Self {
        Self::Response {
            text: outcome.text,
            iterations: outcome.iterations,
            tool_trace: outcome.tool_trace,
            elapsed_ms: u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to serialize server event");
            r#"{"type":"error","message":"internal error"}"#.to_string()
        })
    }
}
