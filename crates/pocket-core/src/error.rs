//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Tool-provider unreachable, malformed endpoint, or failed discovery
    #[error("Connection error: {0}")]
    Connection(String),

    /// No registered provider advertises this tool
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Arguments do not match the provider-declared input schema
    #[error("Tool validation error: {0}")]
    ToolValidation(String),

    /// Provider-side failure while running a tool
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// A remote call exceeded its deadline
    #[error("Timed out after {secs}s: {what}")]
    Timeout { what: String, secs: u64 },

    /// The LLM request itself failed
    #[error("Model request failed: {0}")]
    ModelRequest(String),

    /// Rate limited by the LLM provider
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Another query is already running for this session
    #[error("Session busy: {0}")]
    SessionBusy(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Timeout { .. }
                | AgentError::RateLimited(_)
                | AgentError::SessionBusy(_)
                | AgentError::Io(_)
        )
    }

    /// Convert to a user-friendly message
    ///
    /// Never carries provider bodies, paths or credentials.
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Connection(_) => "A tool service could not be reached.".into(),
            AgentError::UnknownTool(name) => format!("The tool '{}' is not available.", name),
            AgentError::ToolValidation(msg) => format!("Invalid tool input: {}", msg),
            AgentError::ToolExecution(_) => {
                "The tool service failed to complete the request. Please try again later.".into()
            }
            AgentError::Timeout { .. } => {
                "The request took too long to complete. Please try again later.".into()
            }
            AgentError::ModelRequest(_) => {
                "The AI service encountered an error. Please try again.".into()
            }
            AgentError::RateLimited(_) => "You've made too many requests. Please wait a moment.".into(),
            AgentError::Auth(_) => "Authentication with the AI service failed.".into(),
            AgentError::SessionBusy(_) => {
                "Your previous request is still being processed.".into()
            }
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Other(err.to_string())
    }
}
