//! Reasoning Loop
//!
//! Bounded request/act cycle: ask the model, record its turn atomically,
//! run every tool it asked for, record one result per invocation, repeat
//! until the model answers without tools or the iteration ceiling is hit.
//!
//! ```text
//! AWAITING_MODEL ──▶ MODEL_RESPONDED ──▶ DONE
//!       ▲                  │
//!       └── EXECUTING_TOOLS ◀┘   (stops at max_iterations)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc::UnboundedSender;

use crate::context::ContextStore;
use crate::error::{AgentError, Result};
use crate::invoker::ToolInvoker;
use crate::message::{ContentBlock, Conversation, Message};
use crate::provider::{Completion, CompletionRequest, GenerationOptions, LlmProvider};
use crate::stream::{BlockAssembler, StreamEvent};
use crate::tool::{ToolDescriptor, ToolInvocation, ToolOutcome, ToolResult};

pub const DEFAULT_MAX_ITERATIONS: usize = 5;
pub const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(120);

/// Loop configuration
#[derive(Clone, Debug)]
pub struct LoopConfig {
    /// Base system prompt; session context is appended per request
    pub system_prompt: String,

    /// Maximum model requests per query
    pub max_iterations: usize,

    /// Generation options
    pub generation: GenerationOptions,

    /// Deadline for one model request (whole stream when streaming)
    pub model_timeout: Duration,

    /// Consume the provider's incremental stream
    pub streaming: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful assistant.".into(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            generation: GenerationOptions::default(),
            model_timeout: DEFAULT_MODEL_TIMEOUT,
            streaming: false,
        }
    }
}

/// Progress notifications, in order
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    IterationStarted { iteration: usize },
    TextDelta { text: String },
    ToolCalled { id: String, name: String, arguments: Value },
    ToolSucceeded { id: String, name: String, content: String },
    ToolFailed { id: String, name: String, message: String },
    IterationLimitReached { max_iterations: usize },
}

/// How the loop ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    /// The model answered without requesting tools
    Done,
    /// The ceiling was hit while the model still wanted tools
    IterationLimitReached,
}

/// One executed tool call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolTrace {
    pub iteration: usize,
    pub id: String,
    pub name: String,
    /// Arguments after context enrichment
    pub arguments: Map<String, Value>,
    #[serde(flatten)]
    pub outcome: ToolOutcome,
}

impl ToolTrace {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success { .. })
    }
}

/// Result of one query
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoopOutcome {
    /// Text blocks of every iteration, in order
    pub text: String,
    pub status: LoopStatus,
    /// Model requests made
    pub iterations: usize,
    pub tool_trace: Vec<ToolTrace>,
    pub elapsed: Duration,
}

impl LoopOutcome {
    pub fn hit_limit(&self) -> bool {
        self.status == LoopStatus::IterationLimitReached
    }
}

struct Emitter<'a>(Option<&'a UnboundedSender<LoopEvent>>);

impl Emitter<'_> {
    fn emit(&self, event: LoopEvent) {
        if let Some(tx) = self.0 {
            // A dropped receiver only means nobody is watching
            let _ = tx.send(event);
        }
    }
}

/// The reasoning loop
pub struct ReasoningLoop {
    provider: Arc<dyn LlmProvider>,
    invoker: Arc<ToolInvoker>,
    config: LoopConfig,
    streaming: AtomicBool,
}

impl ReasoningLoop {
    pub fn new(provider: Arc<dyn LlmProvider>, invoker: Arc<ToolInvoker>, config: LoopConfig) -> Self {
        Self {
            streaming: AtomicBool::new(config.streaming),
            provider,
            invoker,
            config,
        }
    }

    /// Switch between buffered and streamed completions for later requests
    pub fn set_streaming(&self, enabled: bool) {
        self.streaming.store(enabled, Ordering::Relaxed);
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn invoker(&self) -> &ToolInvoker {
        &self.invoker
    }

    /// Base prompt plus remembered session facts
    pub fn system_prompt(&self, context: &ContextStore) -> String {
        match context.prompt_section() {
            Some(section) => format!("{}\n\n{}", self.config.system_prompt, section),
            None => self.config.system_prompt.clone(),
        }
    }

    /// Run one user query against a session's history.
    ///
    /// On a model failure the history is rolled back to where it was
    /// before the query, so it never ends in a half-finished turn.
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        context: &ContextStore,
        query: &str,
        events: Option<&UnboundedSender<LoopEvent>>,
    ) -> Result<LoopOutcome> {
        let started = Instant::now();
        let emitter = Emitter(events);

        close_dangling_tool_uses(conversation);
        let checkpoint = conversation.len();
        conversation.push(Message::user(query));

        let system = self.system_prompt(context);
        let tools = self.invoker.registry().all_tools();
        let max_iterations = self.config.max_iterations.max(1);

        let mut texts: Vec<String> = Vec::new();
        let mut trace = Vec::new();

        for iteration in 1..=max_iterations {
            emitter.emit(LoopEvent::IterationStarted { iteration });

            let completion = match self.request(iteration, &system, conversation, tools, &emitter).await {
                Ok(completion) => completion,
                Err(e) => {
                    tracing::error!(iteration, error = %e, "Model request failed; abandoning query");
                    conversation.truncate(checkpoint);
                    return Err(e);
                }
            };

            let calls: Vec<ToolInvocation> = completion
                .content
                .iter()
                .filter_map(ToolInvocation::from_block)
                .collect();
            texts.extend(
                completion
                    .content
                    .iter()
                    .filter_map(ContentBlock::as_text)
                    .filter(|t| !t.trim().is_empty())
                    .map(str::to_string),
            );

            if !completion.content.is_empty() {
                conversation.push(Message::assistant_turn(completion.content));
            }

            if calls.is_empty() {
                tracing::debug!(iteration, "Model answered without tools");
                return Ok(LoopOutcome {
                    text: texts.join("\n"),
                    status: LoopStatus::Done,
                    iterations: iteration,
                    tool_trace: trace,
                    elapsed: started.elapsed(),
                });
            }

            for call in &calls {
                let call = self.invoker.enrich(call, context);
                tracing::info!(iteration, tool = %call.name, id = %call.id, "Calling tool");
                emitter.emit(LoopEvent::ToolCalled {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: Value::Object(call.arguments.clone()),
                });

                let result = self.invoker.dispatch(&call).await;
                emitter.emit(result_event(&result));
                conversation.push(result.to_message());

                trace.push(ToolTrace {
                    iteration,
                    id: call.id,
                    name: call.name,
                    arguments: call.arguments,
                    outcome: result.outcome,
                });
            }
        }

        tracing::warn!(max_iterations, "Iteration ceiling reached with tool calls still pending");
        emitter.emit(LoopEvent::IterationLimitReached { max_iterations });

        Ok(LoopOutcome {
            text: texts.join("\n"),
            status: LoopStatus::IterationLimitReached,
            iterations: max_iterations,
            tool_trace: trace,
            elapsed: started.elapsed(),
        })
    }

    async fn request(
        &self,
        iteration: usize,
        system: &str,
        conversation: &Conversation,
        tools: &[ToolDescriptor],
        emitter: &Emitter<'_>,
    ) -> Result<Completion> {
        let request = CompletionRequest {
            model: self.config.generation.model_for_iteration(iteration),
            system,
            messages: conversation.messages(),
            tools,
            max_tokens: self.config.generation.max_tokens,
            temperature: self.config.generation.temperature,
        };

        tracing::debug!(
            iteration,
            model = %request.model,
            provider = %self.provider.name(),
            messages = request.messages.len(),
            "Requesting completion"
        );

        let pending = async {
            if self.is_streaming() {
                self.stream_completion(&request, emitter).await
            } else {
                self.provider.complete(&request).await
            }
        };

        tokio::time::timeout(self.config.model_timeout, pending)
            .await
            .map_err(|_| AgentError::Timeout {
                what: "model request".into(),
                secs: self.config.model_timeout.as_secs(),
            })?
    }

    async fn stream_completion(&self, request: &CompletionRequest<'_>, emitter: &Emitter<'_>) -> Result<Completion> {
        let mut stream = self.provider.complete_stream(request).await?;
        let mut assembler = BlockAssembler::new();

        while let Some(event) = stream.next().await {
            let event = event?;
            if let StreamEvent::TextDelta { text, .. } = &event {
                emitter.emit(LoopEvent::TextDelta { text: text.clone() });
            }
            assembler.push(event)?;
            if assembler.is_finished() {
                break;
            }
        }

        if !assembler.is_finished() {
            return Err(AgentError::ModelRequest("stream ended before message_stop".into()));
        }
        assembler.finish(request.model)
    }
}

fn result_event(result: &ToolResult) -> LoopEvent {
    match &result.outcome {
        ToolOutcome::Success { content } => LoopEvent::ToolSucceeded {
            id: result.id.clone(),
            name: result.name.clone(),
            content: content.clone(),
        },
        ToolOutcome::Failure { message } => LoopEvent::ToolFailed {
            id: result.id.clone(),
            name: result.name.clone(),
            message: message.clone(),
        },
    }
}

/// A query cancelled mid-tools leaves invocations without results
fn close_dangling_tool_uses(conversation: &mut Conversation) {
    for id in conversation.unresolved_tool_uses() {
        tracing::debug!(id = %id, "Closing tool call left open by an interrupted query");
        conversation.push(Message::tool_result(id, "Error: interrupted before completion", true));
    }
}
