//! Test doubles
//!
//! A scripted LLM and in-memory tool-providers, shared with the other
//! crates' tests through the `testing` feature.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::message::{ContentBlock, Message};
use crate::provider::{Completion, CompletionRequest, LlmProvider, StopReason};
use crate::registry::{ProviderConnector, ProviderEndpoint};
use crate::tool::{ToolDescriptor, ToolProvider};

/// Completion holding a single text block
pub fn text_turn(text: impl Into<String>) -> Completion {
    Completion {
        content: vec![ContentBlock::text(text)],
        model: "scripted".into(),
        usage: None,
        stop_reason: Some(StopReason::EndTurn),
    }
}

/// Completion requesting the given `(id, tool, input)` calls
pub fn tool_turn(calls: &[(&str, &str, Value)]) -> Completion {
    let content = calls
        .iter()
        .map(|(id, name, input)| ContentBlock::ToolUse {
            id: (*id).to_string(),
            name: (*name).to_string(),
            input: input.clone(),
        })
        .collect();
    Completion {
        content,
        model: "scripted".into(),
        usage: None,
        stop_reason: Some(StopReason::ToolUse),
    }
}

/// What the scripted model was asked
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
}

/// LLM that replays a fixed script of turns
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<Completion>>>,
    fallback: Option<Completion>,
    delay: Option<Duration>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, completion: Completion) -> Self {
        lock(&self.script).push_back(Ok(completion));
        self
    }

    pub fn fail(self, error: AgentError) -> Self {
        lock(&self.script).push_back(Err(error));
        self
    }

    /// Returned forever once the script runs out
    pub fn repeat(mut self, completion: Completion) -> Self {
        self.fallback = Some(completion);
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<Completion> {
        lock(&self.requests).push(RecordedRequest {
            model: request.model.to_string(),
            system: request.system.to_string(),
            messages: request.messages.to_vec(),
            tools: request.tools.iter().map(|t| t.name.clone()).collect(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = lock(&self.script).pop_front();
        match next {
            Some(step) => step,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| AgentError::ModelRequest("script exhausted".into())),
        }
    }
}

/// In-memory tool-provider with canned answers
#[derive(Default)]
pub struct StaticToolProvider {
    name: String,
    tools: Vec<ToolDescriptor>,
    responses: HashMap<String, std::result::Result<String, String>>,
    call_delays: HashMap<String, Duration>,
    discovery_fails: bool,
    discovery_delay: Option<Duration>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl StaticToolProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Tool with an open object schema
    pub fn with_tool(self, name: &str) -> Self {
        self.with_descriptor(ToolDescriptor::new(
            name,
            format!("{} tool", name),
            serde_json::json!({"type": "object", "properties": {}}),
        ))
    }

    pub fn with_descriptor(mut self, descriptor: ToolDescriptor) -> Self {
        self.tools.push(descriptor);
        self
    }

    pub fn with_response(mut self, tool: &str, content: impl Into<String>) -> Self {
        self.responses.insert(tool.to_string(), Ok(content.into()));
        self
    }

    /// Calls to `tool` fail with a provider-side error
    pub fn failing_tool(mut self, tool: &str, message: impl Into<String>) -> Self {
        self.responses.insert(tool.to_string(), Err(message.into()));
        self
    }

    pub fn with_call_delay(mut self, tool: &str, delay: Duration) -> Self {
        self.call_delays.insert(tool.to_string(), delay);
        self
    }

    pub fn failing_discovery(mut self) -> Self {
        self.discovery_fails = true;
        self
    }

    pub fn with_discovery_delay(mut self, delay: Duration) -> Self {
        self.discovery_delay = Some(delay);
        self
    }

    /// Every call received, in order
    pub fn calls(&self) -> Vec<(String, Value)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ToolProvider for StaticToolProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        if let Some(delay) = self.discovery_delay {
            tokio::time::sleep(delay).await;
        }
        if self.discovery_fails {
            return Err(AgentError::Connection(format!("{} refused tools/list", self.name)));
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String> {
        lock(&self.calls).push((name.to_string(), arguments.clone()));

        if let Some(delay) = self.call_delays.get(name) {
            tokio::time::sleep(*delay).await;
        }

        match self.responses.get(name) {
            Some(Ok(content)) => Ok(content.clone()),
            Some(Err(message)) => Err(AgentError::ToolExecution(message.clone())),
            None if self.tools.iter().any(|t| t.name == name) => Ok(format!("{} result for {}", name, arguments)),
            None => Err(AgentError::ToolExecution(format!("tool {} not found", name))),
        }
    }
}

/// Connector resolving endpoint names to prepared providers
#[derive(Default)]
pub struct StaticConnector {
    providers: HashMap<String, Arc<StaticToolProvider>>,
}

impl StaticConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, endpoint: &str, provider: StaticToolProvider) -> Self {
        self.providers.insert(endpoint.to_string(), Arc::new(provider));
        self
    }

    pub fn provider(&self, endpoint: &str) -> Option<Arc<StaticToolProvider>> {
        self.providers.get(endpoint).cloned()
    }
}

#[async_trait]
impl ProviderConnector for StaticConnector {
    async fn connect(&self, endpoint: &ProviderEndpoint) -> Result<Arc<dyn ToolProvider>> {
        self.providers
            .get(&endpoint.name)
            .cloned()
            .map(|p| p as Arc<dyn ToolProvider>)
            .ok_or_else(|| AgentError::Connection(format!("nothing listening for {}", endpoint.name)))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
