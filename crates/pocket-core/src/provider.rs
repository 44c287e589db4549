//! LLM Provider Strategy Pattern
//!
//! Defines a common interface for LLM backends. The reasoning loop only
//! talks to the model through this trait, so the Anthropic client, a
//! scripted test double or any other backend are interchangeable.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pocket_core::provider::{CompletionRequest, LlmProvider};
//!
//! let request = CompletionRequest {
//!     model: "claude-3-5-sonnet-20241022",
//!     system: &prompt,
//!     messages: conversation.messages(),
//!     tools: &catalog,
//!     max_tokens: 1000,
//!     temperature: None,
//! };
//! let completion = provider.complete(&request).await?;
//! ```

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::{ContentBlock, Message};
use crate::stream::{BlockKind, StreamEvent};
use crate::tool::ToolDescriptor;

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier used for every iteration (after the first, if `initial_model` is set)
    pub model: String,

    /// Lighter model for the first iteration of a query
    #[serde(default)]
    pub initial_model: Option<String>,

    /// Maximum tokens to generate per request
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature (provider default when unset)
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_max_tokens() -> u32 {
    1000
}

pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.into(),
            initial_model: None,
            max_tokens: default_max_tokens(),
            temperature: None,
        }
    }
}

impl GenerationOptions {
    /// Model for a 1-based iteration number
    pub fn model_for_iteration(&self, iteration: usize) -> &str {
        match (&self.initial_model, iteration) {
            (Some(initial), 1) => initial,
            _ => &self.model,
        }
    }
}

/// One model request: prompt, history and tool catalog
#[derive(Clone, Copy, Debug)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub messages: &'a [Message],
    pub tools: &'a [ToolDescriptor],
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

/// Response from an LLM completion
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Completion {
    /// Ordered content blocks (text and tool invocations)
    pub content: Vec<ContentBlock>,

    /// Model that generated this response
    pub model: String,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,

    /// Why generation stopped
    pub stop_reason: Option<StopReason>,
}

impl Completion {
    /// Replay a finished completion as stream events
    pub fn into_events(self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for (index, block) in self.content.into_iter().enumerate() {
            match block {
                ContentBlock::Text { text } => {
                    events.push(StreamEvent::BlockStart { index, block: BlockKind::Text });
                    events.push(StreamEvent::TextDelta { index, text });
                }
                ContentBlock::ToolUse { id, name, input } => {
                    events.push(StreamEvent::BlockStart {
                        index,
                        block: BlockKind::ToolUse { id, name },
                    });
                    events.push(StreamEvent::InputJsonDelta {
                        index,
                        partial_json: input.to_string(),
                    });
                }
                // Models never emit tool results
                ContentBlock::ToolResult { .. } => continue,
            }
            events.push(StreamEvent::BlockStop { index });
        }
        events.push(StreamEvent::MessageDelta {
            stop_reason: self.stop_reason,
            usage: self.usage,
        });
        events.push(StreamEvent::MessageStop);
        events
    }
}

/// Token usage statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Reason for completion finishing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    #[serde(other)]
    Other,
}

/// Stream type for completion streaming
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new LLM backends.
/// The reasoning loop works exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Generate a completion
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<Completion>;

    /// Generate a streaming completion
    ///
    /// Defaults to replaying `complete` for backends without streaming.
    async fn complete_stream(&self, request: &CompletionRequest<'_>) -> Result<CompletionStream> {
        let completion = self.complete(request).await?;
        let events = completion.into_events().into_iter().map(Ok);
        Ok(Box::pin(futures::stream::iter(events)))
    }
}
