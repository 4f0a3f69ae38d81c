//! Chat-completions request/response types and the domain → wire rendering

use axon_core::{ContentBlock, Message, MessageContent, Role, TokenUsage, ToolCall};
use serde::{Deserialize, Serialize};

/// A message in the chat-completions wire shape.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: ChatContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Wire content - a plain string or an ordered list of parts.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: axon_core::ImageUrl },
}

impl ChatContent {
    pub fn text(&self) -> String {
        match self {
            ChatContent::Text(s) => s.clone(),
            ChatContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: ChatContent::Text(content.into()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Render a domain message into the exact shape the provider expects.
    /// Only text and image_url blocks survive rendering; tool metadata
    /// blocks are runtime-side annotations.
    pub fn from_message(msg: &Message) -> Self {
        let content = match &msg.content {
            MessageContent::Text(s) => ChatContent::Text(s.clone()),
            MessageContent::Blocks(blocks) => {
                let parts: Vec<ContentPart> = blocks
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text } => {
                            Some(ContentPart::Text { text: text.clone() })
                        }
                        ContentBlock::ImageUrl { image_url } => Some(ContentPart::ImageUrl {
                            image_url: image_url.clone(),
                        }),
                        _ => None,
                    })
                    .collect();
                if parts.is_empty() {
                    ChatContent::Text(String::new())
                } else {
                    ChatContent::Parts(parts)
                }
            }
        };

        Self {
            role: role_str(msg.role).to_string(),
            content,
            name: msg.name.clone(),
            tool_calls: msg.tool_calls.clone(),
            tool_call_id: msg.tool_call_id.clone(),
        }
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Tool definition in the chat-completions `tools` array shape.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub spec_type: String,
    pub function: ToolFunctionSpec,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolFunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolSpec {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            spec_type: "function".to_string(),
            function: ToolFunctionSpec {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// Chat-completions request
#[derive(Clone, Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub stream: bool,
}

impl Default for ChatRequest {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            messages: Vec::new(),
            tools: None,
            max_tokens: Some(4096),
            temperature: None,
            stream: false,
        }
    }
}

/// A completed (non-streaming) chat response, already normalized.
#[derive(Clone, Debug, Default)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
    pub finish_reason: Option<String>,
}

/// One incremental piece of a streaming chat response.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamDelta {
    /// `reasoning_content` token (providers that expose thinking)
    Reasoning(String),
    /// Regular content token
    Content(String),
    /// Tool-call fragment, indexed by the provider's per-call index.
    /// `id` and `name` appear once; `arguments` accumulates.
    ToolCall {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    Usage(TokenUsage),
    Done { finish_reason: Option<String> },
}
