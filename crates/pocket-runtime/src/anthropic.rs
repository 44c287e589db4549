//! Anthropic LLM Provider
//!
//! `LlmProvider` over the Anthropic Messages API: system prompt as a
//! top-level field, the tool catalog as `tools`, tool traffic as
//! `tool_use` / `tool_result` content blocks. Streaming goes through SSE.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use pocket_core::{
    error::{AgentError, Result},
    message::{ContentBlock, Message, MessageContent, Role},
    provider::{Completion, CompletionRequest, CompletionStream, LlmProvider, StopReason, TokenUsage},
    stream::{BlockKind, StreamEvent},
    tool::ToolDescriptor,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic provider configuration
#[derive(Clone, Debug)]
pub struct AnthropicConfig {
    pub api_key: String,

    /// API root, without `/v1`
    pub base_url: String,

    /// HTTP client timeout
    pub timeout_secs: u64,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.into(),
            timeout_secs: 300,
        }
    }

    /// `ANTHROPIC_API_KEY` (required) and `ANTHROPIC_BASE_URL` (optional)
    pub fn from_env() -> Result<Self> {
        let api_key = pocket_core::config::require_api_key(|key| std::env::var(key).ok())?;
        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("ANTHROPIC_BASE_URL") {
            if !base_url.trim().is_empty() {
                config.base_url = base_url.trim().trim_end_matches('/').to_string();
            }
        }
        Ok(config)
    }
}

/// Anthropic Messages API provider
pub struct AnthropicProvider {
    client: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(AnthropicConfig::from_env()?)
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.config.base_url)
    }

    async fn send(&self, request: &CompletionRequest<'_>, stream: bool) -> Result<reqwest::Response> {
        let body = ApiRequest::from_request(request, stream);

        tracing::debug!(model = %request.model, stream, tools = body.tools.len(), "Sending Anthropic request");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::ModelRequest(format!("request failed: {}", e)))?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::warn!(status, body = %body, "Anthropic API error");
        Err(status_error(status))
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<Completion> {
        let response = self.send(request, false).await?;
        let api: ApiResponse = response
            .json()
            .await
            .map_err(|e| AgentError::ModelRequest(format!("unreadable response: {}", e)))?;
        Ok(api.into_completion())
    }

    async fn complete_stream(&self, request: &CompletionRequest<'_>) -> Result<CompletionStream> {
        let response = self.send(request, true).await?;
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(AgentError::ModelRequest(format!("stream interrupted: {}", e))))
                            .await;
                        return;
                    }
                };

                for event in decoder.feed(&chunk) {
                    let last = matches!(event, Ok(StreamEvent::MessageStop) | Err(_));
                    if tx.send(event).await.is_err() || last {
                        return;
                    }
                }
            }
            tracing::warn!("Anthropic stream closed without message_stop");
            let _ = tx
                .send(Err(AgentError::ModelRequest("stream ended before message_stop".into())))
                .await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

fn status_error(status: u16) -> AgentError {
    match status {
        401 | 403 => AgentError::Auth("Invalid Anthropic API key".into()),
        429 => AgentError::RateLimited("Anthropic rate limit reached".into()),
        _ => AgentError::ModelRequest(format!("Anthropic API returned status {}", status)),
    }
}

// ── Wire format ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

impl<'a> ApiRequest<'a> {
    fn from_request(request: &CompletionRequest<'a>, stream: bool) -> Self {
        Self {
            model: request.model,
            max_tokens: request.max_tokens,
            system: request.system,
            messages: to_api_messages(request.messages),
            tools: request.tools.iter().map(ApiTool::from).collect(),
            temperature: request.temperature,
            stream,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct ApiMessage {
    role: Role,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
struct ApiTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

impl<'a> From<&'a ToolDescriptor> for ApiTool<'a> {
    fn from(tool: &'a ToolDescriptor) -> Self {
        Self {
            name: &tool.name,
            description: &tool.description,
            input_schema: &tool.input_schema,
        }
    }
}

/// History to API messages. The API wants alternating roles, so
/// consecutive same-role entries (e.g. one tool result per entry) merge.
fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
    let mut out: Vec<ApiMessage> = Vec::new();

    for message in messages {
        let blocks: Vec<ContentBlock> = match &message.content {
            MessageContent::Text(text) if text.trim().is_empty() => Vec::new(),
            MessageContent::Text(text) => vec![ContentBlock::text(text.clone())],
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter(|b| !matches!(b, ContentBlock::Text { text } if text.trim().is_empty()))
                .cloned()
                .collect(),
        };
        if blocks.is_empty() {
            continue;
        }

        match out.last_mut() {
            Some(last) if last.role == message.role => last.content.extend(blocks),
            _ => out.push(ApiMessage {
                role: message.role,
                content: blocks,
            }),
        }
    }

    out
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiBlock>,
    model: String,
    stop_reason: Option<StopReason>,
    usage: Option<ApiUsage>,
}

impl ApiResponse {
    fn into_completion(self) -> Completion {
        Completion {
            content: self.content.into_iter().filter_map(ApiBlock::into_block).collect(),
            model: self.model,
            usage: self.usage.map(ApiUsage::into_usage),
            stop_reason: self.stop_reason,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Unsupported,
}

impl ApiBlock {
    fn into_block(self) -> Option<ContentBlock> {
        match self {
            ApiBlock::Text { text } => Some(ContentBlock::Text { text }),
            ApiBlock::ToolUse { id, name, input } => Some(ContentBlock::ToolUse { id, name, input }),
            ApiBlock::Unsupported => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl ApiUsage {
    fn into_usage(self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        }
    }
}

// ── Server-sent events ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SseEvent {
    MessageStart {},
    ContentBlockStart {
        index: usize,
        content_block: SseBlockStart,
    },
    ContentBlockDelta {
        index: usize,
        delta: SseDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        #[serde(default)]
        delta: SseMessageDelta,
        usage: Option<ApiUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: SseError,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SseBlockStart {
    Text {},
    ToolUse { id: String, name: String },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SseDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Default, Deserialize)]
struct SseMessageDelta {
    stop_reason: Option<StopReason>,
}

#[derive(Debug, Deserialize)]
struct SseError {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

/// Turns raw SSE bytes into ordered stream events
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Indexes of blocks we do not model (e.g. thinking); their events are dropped
    skipped: Vec<usize>,
}

impl SseDecoder {
    /// Feed a chunk; returns the events completed by it
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<StreamEvent>> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() {
                continue;
            }

            match serde_json::from_str::<SseEvent>(data) {
                Ok(event) => {
                    if let Some(event) = self.translate(event) {
                        events.push(event);
                    }
                }
                Err(e) => {
                    tracing::trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                }
            }
        }

        events
    }

    fn translate(&mut self, event: SseEvent) -> Option<Result<StreamEvent>> {
        let event = match event {
            SseEvent::ContentBlockStart { index, content_block } => {
                let block = match content_block {
                    SseBlockStart::Text {} => BlockKind::Text,
                    SseBlockStart::ToolUse { id, name } => BlockKind::ToolUse { id, name },
                    SseBlockStart::Unsupported => {
                        self.skipped.push(index);
                        return None;
                    }
                };
                StreamEvent::BlockStart { index, block }
            }
            SseEvent::ContentBlockDelta { index, .. } | SseEvent::ContentBlockStop { index }
                if self.skipped.contains(&index) =>
            {
                return None;
            }
            SseEvent::ContentBlockDelta { index, delta } => match delta {
                SseDelta::TextDelta { text } => StreamEvent::TextDelta { index, text },
                SseDelta::InputJsonDelta { partial_json } => StreamEvent::InputJsonDelta { index, partial_json },
                SseDelta::Unsupported => return None,
            },
            SseEvent::ContentBlockStop { index } => StreamEvent::BlockStop { index },
            SseEvent::MessageDelta { delta, usage } => StreamEvent::MessageDelta {
                stop_reason: delta.stop_reason,
                usage: usage.map(ApiUsage::into_usage),
            },
            SseEvent::MessageStop => StreamEvent::MessageStop,
            SseEvent::MessageStart {} | SseEvent::Ping => return None,
            SseEvent::Error { error } => {
                tracing::warn!(kind = %error.kind, message = %error.message, "Anthropic stream error");
                return Some(Err(match error.kind.as_str() {
                    "rate_limit_error" | "overloaded_error" => AgentError::RateLimited(error.kind),
                    "authentication_error" | "permission_error" => AgentError::Auth(error.kind),
                    _ => AgentError::ModelRequest(format!("stream error: {}", error.kind)),
                }));
            }
        };
        Some(Ok(event))
    }
}
