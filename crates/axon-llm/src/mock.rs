//! MockProvider - deterministic chat responses for testing
//!
//! Implements `ChatProvider` with a scripted behavior sequence: each call
//! pops the next behavior; when the script is exhausted the default
//! behavior answers. Streaming mode re-cuts the same response into deltas
//! (content in small pieces, tool calls as indexed two-part fragments) so
//! the assembly path gets exercised.

use crate::provider::{ChatProvider, ChatStream, LlmError, LlmResult};
use crate::types::{ChatCompletion, ChatRequest, StreamDelta};
use axon_core::{TokenUsage, ToolCall};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Clone, Debug)]
pub enum MockBehavior {
    /// Plain text response
    Text(String),
    /// Text (possibly empty) followed by tool calls `(name, arguments)`
    ToolCalls {
        text: Option<String>,
        calls: Vec<(String, Value)>,
    },
    /// A tool call whose arguments are not valid JSON
    MalformedToolCall { name: String, raw_arguments: String },
    /// Thinking tokens, then text
    ThinkingThenText { thinking: String, text: String },
    /// Fail the request
    Error(String),
}

impl MockBehavior {
    pub fn tool_call(name: impl Into<String>, args: Value) -> Self {
        MockBehavior::ToolCalls { text: None, calls: vec![(name.into(), args)] }
    }
}

pub struct MockProvider {
    behaviors: Mutex<Vec<MockBehavior>>,
    default_behavior: MockBehavior,
    requests: Mutex<Vec<ChatRequest>>,
    /// Pause between streamed deltas; lets tests interrupt mid-stream.
    delta_delay: Duration,
}

impl MockProvider {
    /// A mock that always answers with the same behavior.
    pub fn constant(behavior: MockBehavior) -> Self {
        Self {
            behaviors: Mutex::new(Vec::new()),
            default_behavior: behavior,
            requests: Mutex::new(Vec::new()),
            delta_delay: Duration::ZERO,
        }
    }

    /// A mock with a behavior sequence, consumed front to back.
    pub fn sequence(behaviors: Vec<MockBehavior>) -> Self {
        Self {
            behaviors: Mutex::new(behaviors),
            default_behavior: MockBehavior::Text("(mock: sequence exhausted)".to_string()),
            requests: Mutex::new(Vec::new()),
            delta_delay: Duration::ZERO,
        }
    }

    pub fn with_delta_delay(mut self, delay: Duration) -> Self {
        self.delta_delay = delay;
        self
    }

    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// Requests captured so far (cloned).
    pub async fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().await.clone()
    }

    async fn next_behavior(&self, request: &ChatRequest) -> MockBehavior {
        self.requests.lock().await.push(request.clone());
        let mut behaviors = self.behaviors.lock().await;
        if behaviors.is_empty() {
            self.default_behavior.clone()
        } else {
            behaviors.remove(0)
        }
    }

    fn usage() -> TokenUsage {
        TokenUsage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 }
    }
}

#[async_trait::async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn chat(&self, request: ChatRequest) -> LlmResult<ChatCompletion> {
        match self.next_behavior(&request).await {
            MockBehavior::Text(text) => Ok(ChatCompletion {
                content: Some(text),
                usage: Self::usage(),
                finish_reason: Some("stop".to_string()),
                ..Default::default()
            }),
            MockBehavior::ThinkingThenText { text, .. } => Ok(ChatCompletion {
                content: Some(text),
                usage: Self::usage(),
                finish_reason: Some("stop".to_string()),
                ..Default::default()
            }),
            MockBehavior::ToolCalls { text, calls } => Ok(ChatCompletion {
                content: text,
                tool_calls: calls
                    .iter()
                    .enumerate()
                    .map(|(i, (name, args))| {
                        ToolCall::new(format!("call_{}", i + 1), name.clone(), args.to_string())
                    })
                    .collect(),
                usage: Self::usage(),
                finish_reason: Some("tool_calls".to_string()),
            }),
            MockBehavior::MalformedToolCall { name, raw_arguments } => Ok(ChatCompletion {
                content: None,
                tool_calls: vec![ToolCall::new("call_1", name, raw_arguments)],
                usage: Self::usage(),
                finish_reason: Some("tool_calls".to_string()),
            }),
            MockBehavior::Error(message) => Err(LlmError::RequestFailed(message)),
        }
    }

    async fn chat_stream(&self, request: ChatRequest) -> LlmResult<ChatStream> {
        let behavior = self.next_behavior(&request).await;
        let delay = self.delta_delay;

        if let MockBehavior::Error(message) = &behavior {
            return Err(LlmError::RequestFailed(message.clone()));
        }

        let stream = async_stream::stream! {
            let pause = |_: ()| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            };

            match behavior {
                MockBehavior::Text(text) => {
                    for piece in chunk_text(&text) {
                        yield Ok(StreamDelta::Content(piece));
                        pause(()).await;
                    }
                    yield Ok(StreamDelta::Usage(MockProvider::usage()));
                    yield Ok(StreamDelta::Done { finish_reason: Some("stop".to_string()) });
                }
                MockBehavior::ThinkingThenText { thinking, text } => {
                    for piece in chunk_text(&thinking) {
                        yield Ok(StreamDelta::Reasoning(piece));
                        pause(()).await;
                    }
                    for piece in chunk_text(&text) {
                        yield Ok(StreamDelta::Content(piece));
                        pause(()).await;
                    }
                    yield Ok(StreamDelta::Usage(MockProvider::usage()));
                    yield Ok(StreamDelta::Done { finish_reason: Some("stop".to_string()) });
                }
                MockBehavior::ToolCalls { text, calls } => {
                    if let Some(text) = text {
                        for piece in chunk_text(&text) {
                            yield Ok(StreamDelta::Content(piece));
                            pause(()).await;
                        }
                    }
                    for (index, (name, args)) in calls.into_iter().enumerate() {
                        let arguments = args.to_string();
                        let (head, tail) = split_in_half(&arguments);
                        yield Ok(StreamDelta::ToolCall {
                            index,
                            id: Some(format!("call_{}", index + 1)),
                            name: Some(name),
                            arguments: head,
                        });
                        pause(()).await;
                        if !tail.is_empty() {
                            yield Ok(StreamDelta::ToolCall {
                                index,
                                id: None,
                                name: None,
                                arguments: tail,
                            });
                            pause(()).await;
                        }
                    }
                    yield Ok(StreamDelta::Usage(MockProvider::usage()));
                    yield Ok(StreamDelta::Done { finish_reason: Some("tool_calls".to_string()) });
                }
                MockBehavior::MalformedToolCall { name, raw_arguments } => {
                    yield Ok(StreamDelta::ToolCall {
                        index: 0,
                        id: Some("call_1".to_string()),
                        name: Some(name),
                        arguments: raw_arguments,
                    });
                    yield Ok(StreamDelta::Done { finish_reason: Some("tool_calls".to_string()) });
                }
                MockBehavior::Error(_) => unreachable!("handled above"),
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Cut text into small delta-sized pieces (UTF-8 safe).
fn chunk_text(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(6)
        .map(|c| c.iter().collect::<String>())
        .collect()
}

fn split_in_half(s: &str) -> (String, String) {
    let chars: Vec<char> = s.chars().collect();
    let mid = chars.len() / 2;
    (
        chars[..mid].iter().collect(),
        chars[mid..].iter().collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn text_behavior_buffered() {
        let provider = MockProvider::constant(MockBehavior::Text("hello there".to_string()));
        let resp = provider.chat(ChatRequest::default()).await.unwrap();
        assert_eq!(resp.content.as_deref(), Some("hello there"));
        assert!(resp.tool_calls.is_empty());
        assert_eq!(provider.call_count().await, 1);
    }

    #[tokio::test]
    async fn streamed_text_reassembles() {
        let provider = MockProvider::constant(MockBehavior::Text("hello streaming world".to_string()));
        let mut stream = provider.chat_stream(ChatRequest::default()).await.unwrap();

        let mut text = String::new();
        let mut done = false;
        while let Some(delta) = stream.next().await {
            match delta.unwrap() {
                StreamDelta::Content(piece) => text.push_str(&piece),
                StreamDelta::Done { .. } => done = true,
                _ => {}
            }
        }
        assert_eq!(text, "hello streaming world");
        assert!(done);
    }

    #[tokio::test]
    async fn streamed_tool_call_fragments() {
        let provider = MockProvider::constant(MockBehavior::tool_call(
            "search",
            serde_json::json!({"query": "rust"}),
        ));
        let mut stream = provider.chat_stream(ChatRequest::default()).await.unwrap();

        let mut asm = crate::ToolCallAssembler::new();
        while let Some(delta) = stream.next().await {
            if let StreamDelta::ToolCall { index, id, name, arguments } = delta.unwrap() {
                asm.apply(index, id, name, &arguments);
            }
        }
        let calls = asm.finish().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "search");
        let args: serde_json::Value = serde_json::from_str(&calls[0].function.arguments).unwrap();
        assert_eq!(args["query"], "rust");
    }

    #[tokio::test]
    async fn sequence_is_consumed_in_order() {
        let provider = MockProvider::sequence(vec![
            MockBehavior::Text("first".to_string()),
            MockBehavior::Text("second".to_string()),
        ]);
        let a = provider.chat(ChatRequest::default()).await.unwrap();
        let b = provider.chat(ChatRequest::default()).await.unwrap();
        let c = provider.chat(ChatRequest::default()).await.unwrap();
        assert_eq!(a.content.as_deref(), Some("first"));
        assert_eq!(b.content.as_deref(), Some("second"));
        assert!(c.content.unwrap().contains("exhausted"));
    }
}
