//! OpenAI-compatible chat-completions client with SSE streaming

use crate::provider::{ChatProvider, ChatStream, LlmError, LlmResult};
use crate::types::{ChatCompletion, ChatRequest, StreamDelta};
use axon_core::{TokenUsage, ToolCall};
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error};

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_timeout(base_url, api_key, Duration::from_secs(60))
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn send(&self, request: &ChatRequest) -> LlmResult<reqwest::Response> {
        debug!("chat request: model={} stream={}", request.model, request.stream);

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("provider error {}: {}", status, error_text);

            return Err(match status.as_u16() {
                401 => LlmError::AuthFailed(error_text),
                429 => LlmError::RateLimited { retry_after_ms: 60_000 },
                _ => LlmError::RequestFailed(format!("{}: {}", status, error_text)),
            });
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, mut request: ChatRequest) -> LlmResult<ChatCompletion> {
        request.stream = false;
        let response = self.send(&request).await?;
        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))?;

        Ok(ChatCompletion {
            content: choice.message.content,
            tool_calls: choice.message.tool_calls.unwrap_or_default(),
            usage: body.usage.map(WireUsage::into_usage).unwrap_or_default(),
            finish_reason: choice.finish_reason,
        })
    }

    async fn chat_stream(&self, mut request: ChatRequest) -> LlmResult<ChatStream> {
        request.stream = true;
        let response = self.send(&request).await?;
        let stream = parse_sse_stream(response.bytes_stream());
        Ok(Box::pin(stream))
    }
}

fn parse_sse_stream(
    bytes_stream: impl futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
) -> impl futures::Stream<Item = LlmResult<StreamDelta>> + Send {
    async_stream::stream! {
        let mut buffer = String::new();
        let mut finished = false;

        tokio::pin!(bytes_stream);

        while let Some(chunk_result) = bytes_stream.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    yield Err(LlmError::StreamError(e.to_string()));
                    continue;
                }
            };

            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(event_end) = buffer.find("\n\n") {
                let event_str = buffer[..event_end].to_string();
                buffer = buffer[event_end + 2..].to_string();

                for line in event_str.lines() {
                    let Some(data) = line.strip_prefix("data: ") else { continue };

                    if data.trim() == "[DONE]" {
                        if !finished {
                            finished = true;
                            yield Ok(StreamDelta::Done { finish_reason: None });
                        }
                        continue;
                    }

                    match serde_json::from_str::<StreamResponse>(data) {
                        Ok(event) => {
                            for delta in flatten_stream_event(event) {
                                if matches!(delta, StreamDelta::Done { .. }) {
                                    if finished { continue; }
                                    finished = true;
                                }
                                yield Ok(delta);
                            }
                        }
                        Err(e) => {
                            yield Err(LlmError::StreamError(format!(
                                "malformed stream event: {}", e
                            )));
                        }
                    }
                }
            }
        }
    }
}

/// Expand one parsed wire event into ordered deltas: usage first, then
/// per-choice reasoning / content / tool fragments, then the finish marker.
fn flatten_stream_event(event: StreamResponse) -> Vec<StreamDelta> {
    let mut deltas = Vec::new();

    if let Some(usage) = event.usage {
        deltas.push(StreamDelta::Usage(usage.into_usage()));
    }

    for choice in event.choices {
        if let Some(reasoning) = choice.delta.reasoning_content {
            if !reasoning.is_empty() {
                deltas.push(StreamDelta::Reasoning(reasoning));
            }
        }
        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                deltas.push(StreamDelta::Content(content));
            }
        }
        for tc in choice.delta.tool_calls.unwrap_or_default() {
            let function = tc.function.unwrap_or_default();
            deltas.push(StreamDelta::ToolCall {
                index: tc.index,
                id: tc.id.filter(|id| !id.is_empty()),
                name: function.name.filter(|n| !n.is_empty()),
                arguments: function.arguments.unwrap_or_default(),
            });
        }
        if choice.finish_reason.is_some() {
            deltas.push(StreamDelta::Done { finish_reason: choice.finish_reason });
        }
    }

    deltas
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

impl WireUsage {
    fn into_usage(self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
        }
    }
}

#[derive(Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: WireDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireDelta {
    reasoning_content: Option<String>,
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Deserialize)]
struct WireToolCallDelta {
    index: usize,
    id: Option<String>,
    function: Option<WireFunctionDelta>,
}

#[derive(Deserialize, Default)]
struct WireFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_event(data: &str) -> Vec<StreamDelta> {
        flatten_stream_event(serde_json::from_str(data).unwrap())
    }

    #[test]
    fn content_delta_parsed() {
        let deltas =
            parse_event(r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#);
        assert_eq!(deltas, vec![StreamDelta::Content("Hel".into())]);
    }

    #[test]
    fn reasoning_delta_parsed() {
        let deltas = parse_event(
            r#"{"choices":[{"delta":{"reasoning_content":"thinking..."},"finish_reason":null}]}"#,
        );
        assert_eq!(deltas, vec![StreamDelta::Reasoning("thinking...".into())]);
    }

    #[test]
    fn tool_call_fragments_keep_index() {
        let deltas = parse_event(
            r#"{"choices":[{"delta":{"tool_calls":[
                {"index":0,"id":"call_1","function":{"name":"search","arguments":"{\"q"}},
                {"index":1,"id":"call_2","function":{"name":"calc","arguments":""}}
            ]},"finish_reason":null}]}"#,
        );
        assert_eq!(deltas.len(), 2);
        match &deltas[0] {
            StreamDelta::ToolCall { index, id, name, arguments } => {
                assert_eq!(*index, 0);
                assert_eq!(id.as_deref(), Some("call_1"));
                assert_eq!(name.as_deref(), Some("search"));
                assert_eq!(arguments, "{\"q");
            }
            other => panic!("unexpected delta {:?}", other),
        }
    }

    #[test]
    fn finish_reason_produces_done() {
        let deltas =
            parse_event(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#);
        assert_eq!(
            deltas,
            vec![StreamDelta::Done { finish_reason: Some("tool_calls".into()) }]
        );
    }

    #[test]
    fn usage_comes_before_choice_deltas() {
        let deltas = parse_event(
            r#"{"choices":[{"delta":{"content":"x"},"finish_reason":null}],
                "usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#,
        );
        assert!(matches!(deltas[0], StreamDelta::Usage(u) if u.total_tokens == 4));
        assert_eq!(deltas[1], StreamDelta::Content("x".into()));
    }
}
