//! Streaming content blocks.
//!
//! A streamed model turn arrives as indexed start/delta/stop events.
//! `BlockAssembler` buffers fragments per index and only releases a
//! block once its stop marker has been seen.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::message::ContentBlock;
use crate::provider::{Completion, StopReason, TokenUsage};

/// Kind of block opened by a `BlockStart`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockKind {
    Text,
    ToolUse { id: String, name: String },
}

/// One incremental event of a streamed completion
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    BlockStart { index: usize, block: BlockKind },
    TextDelta { index: usize, text: String },
    InputJsonDelta { index: usize, partial_json: String },
    BlockStop { index: usize },
    MessageDelta {
        stop_reason: Option<StopReason>,
        usage: Option<TokenUsage>,
    },
    MessageStop,
}

#[derive(Debug)]
enum PartialBlock {
    Text(String),
    ToolUse { id: String, name: String, json: String },
}

/// Collects stream events into complete content blocks
#[derive(Debug, Default)]
pub struct BlockAssembler {
    open: BTreeMap<usize, PartialBlock>,
    done: BTreeMap<usize, ContentBlock>,
    stop_reason: Option<StopReason>,
    usage: Option<TokenUsage>,
    finished: bool,
}

impl BlockAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one event; returns the block it completed, if any
    pub fn push(&mut self, event: StreamEvent) -> Result<Option<&ContentBlock>> {
        match event {
            StreamEvent::BlockStart { index, block } => {
                if self.open.contains_key(&index) || self.done.contains_key(&index) {
                    return Err(malformed(format!("block {} started twice", index)));
                }
                let partial = match block {
                    BlockKind::Text => PartialBlock::Text(String::new()),
                    BlockKind::ToolUse { id, name } => PartialBlock::ToolUse {
                        id,
                        name,
                        json: String::new(),
                    },
                };
                self.open.insert(index, partial);
            }
            StreamEvent::TextDelta { index, text } => match self.open.get_mut(&index) {
                Some(PartialBlock::Text(buf)) => buf.push_str(&text),
                Some(_) => return Err(malformed(format!("text delta for tool block {}", index))),
                None => return Err(malformed(format!("delta for unopened block {}", index))),
            },
            StreamEvent::InputJsonDelta { index, partial_json } => match self.open.get_mut(&index) {
                Some(PartialBlock::ToolUse { json, .. }) => json.push_str(&partial_json),
                Some(_) => return Err(malformed(format!("json delta for text block {}", index))),
                None => return Err(malformed(format!("delta for unopened block {}", index))),
            },
            StreamEvent::BlockStop { index } => {
                let partial = self
                    .open
                    .remove(&index)
                    .ok_or_else(|| malformed(format!("stop for unopened block {}", index)))?;
                let block = finish_block(partial)?;
                self.done.insert(index, block);
                return Ok(self.done.get(&index));
            }
            StreamEvent::MessageDelta { stop_reason, usage } => {
                if stop_reason.is_some() {
                    self.stop_reason = stop_reason;
                }
                if usage.is_some() {
                    self.usage = usage;
                }
            }
            StreamEvent::MessageStop => self.finished = true,
        }
        Ok(None)
    }

    /// Whether `MessageStop` has been seen
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// All blocks in index order. Fails if any block never closed.
    pub fn finish(self, model: impl Into<String>) -> Result<Completion> {
        if let Some(index) = self.open.keys().next() {
            return Err(malformed(format!("stream ended inside block {}", index)));
        }
        Ok(Completion {
            content: self.done.into_values().collect(),
            model: model.into(),
            usage: self.usage,
            stop_reason: self.stop_reason,
        })
    }
}

fn finish_block(partial: PartialBlock) -> Result<ContentBlock> {
    match partial {
        PartialBlock::Text(text) => Ok(ContentBlock::Text { text }),
        PartialBlock::ToolUse { id, name, json } => {
            let input = if json.trim().is_empty() {
                serde_json::json!({})
            } else {
                serde_json::from_str(&json)
                    .map_err(|e| malformed(format!("tool input for '{}' is not JSON: {}", name, e)))?
            };
            Ok(ContentBlock::ToolUse { id, name, input })
        }
    }
}

fn malformed(detail: String) -> AgentError {
    AgentError::ModelRequest(format!("malformed stream: {}", detail))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleaved_blocks_keep_index_order() {
        let mut asm = BlockAssembler::new();
        let events = vec![
            StreamEvent::BlockStart { index: 0, block: BlockKind::Text },
            StreamEvent::BlockStart {
                index: 1,
                block: BlockKind::ToolUse { id: "t1".into(), name: "check-balance".into() },
            },
            StreamEvent::TextDelta { index: 0, text: "Let me ".into() },
            StreamEvent::InputJsonDelta { index: 1, partial_json: "{\"owner\":".into() },
            StreamEvent::TextDelta { index: 0, text: "check.".into() },
            StreamEvent::InputJsonDelta { index: 1, partial_json: "\"abc\"}".into() },
            StreamEvent::BlockStop { index: 1 },
            StreamEvent::BlockStop { index: 0 },
            StreamEvent::MessageDelta { stop_reason: Some(StopReason::ToolUse), usage: None },
            StreamEvent::MessageStop,
        ];
        for event in events {
            asm.push(event).unwrap();
        }
        assert!(asm.is_finished());

        let completion = asm.finish("m").unwrap();
        assert_eq!(completion.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(completion.content[0], ContentBlock::text("Let me check."));
        match &completion.content[1] {
            ContentBlock::ToolUse { id, input, .. } => {
                assert_eq!(id, "t1");
                assert_eq!(input["owner"], "abc");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_block_released_only_on_stop() {
        let mut asm = BlockAssembler::new();
        assert!(asm.push(StreamEvent::BlockStart { index: 0, block: BlockKind::Text }).unwrap().is_none());
        assert!(asm.push(StreamEvent::TextDelta { index: 0, text: "hi".into() }).unwrap().is_none());
        let done = asm.push(StreamEvent::BlockStop { index: 0 }).unwrap().cloned();
        assert_eq!(done, Some(ContentBlock::text("hi")));
    }

    #[test]
    fn test_empty_tool_input_is_object() {
        let mut asm = BlockAssembler::new();
        asm.push(StreamEvent::BlockStart {
            index: 0,
            block: BlockKind::ToolUse { id: "t".into(), name: "ping".into() },
        })
        .unwrap();
        asm.push(StreamEvent::BlockStop { index: 0 }).unwrap();
        let completion = asm.finish("m").unwrap();
        assert!(matches!(&completion.content[0], ContentBlock::ToolUse { input, .. } if input.is_object()));
    }

    #[test]
    fn test_unclosed_block_is_error() {
        let mut asm = BlockAssembler::new();
        asm.push(StreamEvent::BlockStart { index: 0, block: BlockKind::Text }).unwrap();
        assert!(matches!(asm.finish("m"), Err(AgentError::ModelRequest(_))));
    }

    #[test]
    fn test_delta_without_start_is_error() {
        let mut asm = BlockAssembler::new();
        let result = asm.push(StreamEvent::TextDelta { index: 3, text: "x".into() });
        assert!(result.is_err());
    }

    #[test]
    fn test_replayed_completion_round_trips() {
        let original = Completion {
            content: vec![
                ContentBlock::text("a"),
                ContentBlock::ToolUse {
                    id: "t".into(),
                    name: "n".into(),
                    input: serde_json::json!({"k": [1, 2]}),
                },
            ],
            model: "m".into(),
            usage: Some(TokenUsage { input_tokens: 3, output_tokens: 4 }),
            stop_reason: Some(StopReason::ToolUse),
        };
        let mut asm = BlockAssembler::new();
        for event in original.clone().into_events() {
            asm.push(event).unwrap();
        }
        let rebuilt = asm.finish("m").unwrap();
        assert_eq!(rebuilt.content, original.content);
        assert_eq!(rebuilt.usage, original.usage);
    }
}
