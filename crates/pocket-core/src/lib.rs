//! # pocket-core
//!
//! Tool-routing orchestration: many remote tool-providers, one LLM, a
//! bounded reasoning loop per session.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Orchestrator                            │
//! │  ┌────────────────┐  ┌───────────────┐  ┌─────────────────────┐  │
//! │  │ SessionManager │──│ ReasoningLoop │──│ LlmProvider         │  │
//! │  │ (ContextStore) │  │               │  │ (Strategy)          │  │
//! │  └────────────────┘  └───────┬───────┘  └─────────────────────┘  │
//! │                      ┌───────┴───────┐  ┌─────────────────────┐  │
//! │                      │  ToolInvoker  │──│ ProviderRegistry    │  │
//! │                      └───────────────┘  └─────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` and `ToolProvider` traits keep the core free of any
//! transport; concrete clients live in `pocket-runtime`.

pub mod config;
pub mod context;
pub mod error;
pub mod invoker;
pub mod message;
pub mod orchestrator;
pub mod provider;
pub mod reasoning;
pub mod registry;
pub mod schema;
pub mod session;
pub mod stream;
pub mod tool;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::Settings;
pub use context::{ContextDetector, ContextProfile, ContextStore, EnrichmentRule, EnrichmentTable, PatternDetector};
pub use error::{AgentError, Result};
pub use invoker::ToolInvoker;
pub use message::{ContentBlock, Conversation, Message, Role};
pub use orchestrator::Orchestrator;
pub use provider::{Completion, CompletionRequest, LlmProvider};
pub use reasoning::{LoopConfig, LoopEvent, LoopOutcome, LoopStatus, ReasoningLoop, ToolTrace};
pub use registry::{ProviderConnector, ProviderEndpoint, ProviderRegistry, RegistrationReport};
pub use session::{ConcurrencyPolicy, Exchange, SessionId, SessionManager};
pub use stream::{BlockAssembler, StreamEvent};
pub use tool::{ToolDescriptor, ToolInvocation, ToolProvider, ToolResult};
