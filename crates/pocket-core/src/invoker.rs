//! Tool Invoker
//!
//! Executes one tool invocation: resolve the owning provider, fill
//! arguments from session context, validate against the declared schema,
//! call with a deadline. Every failure becomes a `ToolResult` failure so
//! the reasoning loop can hand it back to the model.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::context::ContextStore;
use crate::error::{AgentError, Result};
use crate::registry::ProviderRegistry;
use crate::schema::validate_arguments;
use crate::tool::{ToolInvocation, ToolResult};

/// Default deadline for a single tool call
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

const MAX_FAILURE_CHARS: usize = 300;

pub struct ToolInvoker {
    registry: Arc<ProviderRegistry>,
    timeout: Duration,
    validate: bool,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            timeout: DEFAULT_TOOL_TIMEOUT,
            validate: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check arguments against provider schemas before dispatch
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Enrich, then dispatch
    pub async fn invoke(&self, call: &ToolInvocation, context: &ContextStore) -> ToolResult {
        let call = self.enrich(call, context);
        self.dispatch(&call).await
    }

    /// Copy of the invocation with context-filled arguments
    pub fn enrich(&self, call: &ToolInvocation, context: &ContextStore) -> ToolInvocation {
        ToolInvocation {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: context.apply(&call.name, call.arguments.clone()),
        }
    }

    /// Run an already-enriched invocation; the id is carried over unchanged
    pub async fn dispatch(&self, call: &ToolInvocation) -> ToolResult {
        match self.execute(call).await {
            Ok(content) => {
                tracing::debug!(tool = %call.name, id = %call.id, "Tool call succeeded");
                ToolResult::success(&call.id, &call.name, content)
            }
            Err(e) => {
                tracing::warn!(tool = %call.name, id = %call.id, error = %e, "Tool call failed");
                ToolResult::failure(&call.id, &call.name, sanitize(&e))
            }
        }
    }

    async fn execute(&self, call: &ToolInvocation) -> Result<String> {
        let connection = self.registry.resolve(&call.name)?;

        if self.validate {
            if let Some(descriptor) = connection.descriptor(&call.name) {
                validate_arguments(&descriptor.input_schema, &call.arguments)?;
            }
        }

        let arguments = Value::Object(call.arguments.clone());
        tokio::time::timeout(self.timeout, connection.call(&call.name, arguments))
            .await
            .map_err(|_| AgentError::Timeout {
                what: format!("tool '{}'", call.name),
                secs: self.timeout.as_secs(),
            })?
    }
}

/// Failure text for the model: no transport detail, no multi-line dumps
fn sanitize(error: &AgentError) -> String {
    match error {
        AgentError::UnknownTool(_) | AgentError::ToolValidation(_) | AgentError::Timeout { .. } => {
            error.to_string()
        }
        AgentError::ToolExecution(detail) => {
            let first_line = detail.lines().next().unwrap_or_default().trim();
            if first_line.is_empty() {
                "Tool execution error: the tool reported a failure".into()
            } else {
                format!("Tool execution error: {}", truncate(first_line, MAX_FAILURE_CHARS))
            }
        }
        _ => "Tool execution error: the tool service is unavailable".into(),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
