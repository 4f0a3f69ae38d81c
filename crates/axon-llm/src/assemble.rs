//! Streaming tool-call assembly and lenient argument parsing
//!
//! Tool-call fragments arrive indexed and must be concatenated by index,
//! not arrival order. This is the single normalization layer: downstream
//! code only ever sees complete `ToolCall`s with canonical JSON arguments.

use crate::provider::{LlmError, LlmResult};
use axon_core::ToolCall;
use serde_json::Value;

#[derive(Default)]
struct Slot {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Accumulates indexed tool-call fragments from a streaming response.
#[derive(Default)]
pub struct ToolCallAssembler {
    slots: Vec<Slot>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one fragment. `id` and `name` stick the first time they
    /// appear; `arguments` appends.
    pub fn apply(&mut self, index: usize, id: Option<String>, name: Option<String>, arguments: &str) {
        while self.slots.len() <= index {
            self.slots.push(Slot::default());
        }
        let slot = &mut self.slots[index];
        if slot.id.is_none() {
            slot.id = id;
        }
        if slot.name.is_none() {
            slot.name = name;
        }
        slot.arguments.push_str(arguments);
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Finalize into complete tool calls. An index that never saw a name
    /// fails the whole batch; an index that never saw an id gets a
    /// generated one so the transcript can still be persisted.
    pub fn finish(self) -> LlmResult<Vec<ToolCall>> {
        let mut calls = Vec::with_capacity(self.slots.len());
        for (index, slot) in self.slots.into_iter().enumerate() {
            let name = slot.name.ok_or_else(|| {
                LlmError::InvalidResponse(format!(
                    "tool call at index {} never received a function name",
                    index
                ))
            })?;
            let id = slot
                .id
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
            calls.push(ToolCall::new(id, name, slot.arguments));
        }
        Ok(calls)
    }
}

/// Parse a tool-call `arguments` string, tolerating the sloppiness real
/// providers produce: empty strings, surrounding whitespace, markdown
/// fences, and leading/trailing junk around the JSON object.
pub fn parse_lenient_json(raw: &str) -> Result<Value, serde_json::Error> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }

    match serde_json::from_str(trimmed) {
        Ok(value) => Ok(value),
        Err(err) => {
            let unfenced = trimmed
                .trim_start_matches("```json")
                .trim_start_matches("```")
                .trim_end_matches("```")
                .trim();
            if unfenced != trimmed {
                if let Ok(value) = serde_json::from_str(unfenced) {
                    return Ok(value);
                }
            }

            if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
                if start < end {
                    if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                        return Ok(value);
                    }
                }
            }

            Err(err)
        }
    }
}
