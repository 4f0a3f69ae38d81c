//! Token counting backed by tiktoken BPE vocabularies

use axon_core::{Error, Result};
use axon_llm::{ChatContent, ChatMessage, ContentPart};
use tiktoken_rs::{cl100k_base, get_bpe_from_model, CoreBPE};
use tracing::warn;

/// Deterministic token counter for one model. Immutable once built;
/// share it across sessions behind an `Arc`.
pub struct TokenCounter {
    model: String,
    bpe: CoreBPE,
}

impl TokenCounter {
    /// Build a counter for `model`, falling back to the `cl100k_base`
    /// vocabulary when the model is unknown.
    pub fn new(model: &str) -> Result<Self> {
        let bpe = match get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(_) => {
                warn!(model, "unknown model, using cl100k_base encoding");
                cl100k_base().map_err(|e| Error::internal(e.to_string()))?
            }
        };
        Ok(Self { model: model.to_string(), bpe })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn count(&self, text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_with_special_tokens(text).len() as u32
    }

    /// Token cost of one wire message, following the chat-format overhead
    /// formula: 4 per message, name folded into the role slot, plus the
    /// assistant priming pair.
    pub fn count_message(&self, message: &ChatMessage) -> u32 {
        let mut tokens: u32 = 4;

        tokens += self.count(&message.role);

        match &message.content {
            ChatContent::Text(text) => tokens += self.count(text),
            ChatContent::Parts(parts) => {
                for part in parts {
                    match part {
                        ContentPart::Text { text } => tokens += self.count(text),
                        ContentPart::ImageUrl { image_url } => {
                            tokens += match image_url.detail.as_deref() {
                                Some("low") => 85,
                                _ => 1105,
                            };
                        }
                    }
                }
            }
        }

        if let Some(name) = &message.name {
            tokens += self.count(name);
            tokens = tokens.saturating_sub(1);
        }
        if let Some(tool_calls) = &message.tool_calls {
            let rendered = serde_json::to_string(tool_calls).unwrap_or_default();
            tokens += self.count(&rendered);
        }
        if let Some(tool_call_id) = &message.tool_call_id {
            tokens += self.count(tool_call_id);
        }

        tokens + 2
    }

    /// Total cost of a message list, including the conversation priming.
    pub fn count_messages(&self, messages: &[ChatMessage]) -> u32 {
        3 + messages.iter().map(|m| self.count_message(m)).sum::<u32>()
    }

    /// Truncate text to at most `max_tokens` tokens.
    pub fn truncate(&self, text: &str, max_tokens: usize) -> String {
        let tokens = self.bpe.encode_with_special_tokens(text);
        if tokens.len() <= max_tokens {
            return text.to_string();
        }
        match self.bpe.decode(tokens[..max_tokens].to_vec()) {
            Ok(truncated) => truncated,
            // Decode can fail on a split codepoint; fall back to chars.
            Err(_) => text.chars().take(max_tokens * 4).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting_is_deterministic() {
        let counter = TokenCounter::new("gpt-4o").unwrap();
        let a = counter.count("The quick brown fox jumps over the lazy dog");
        let b = counter.count("The quick brown fox jumps over the lazy dog");
        assert_eq!(a, b);
        assert!(a > 0);
        assert_eq!(counter.count(""), 0);
    }

    #[test]
    fn unknown_model_falls_back() {
        let counter = TokenCounter::new("totally-made-up-model").unwrap();
        assert!(counter.count("hello world") > 0);
    }

    #[test]
    fn message_overhead_applied() {
        let counter = TokenCounter::new("gpt-4o").unwrap();
        let plain = counter.count("hello");
        let message = counter.count_message(&ChatMessage::user("hello"));
        // 4 overhead + role + content + 2 priming
        assert!(message > plain + 4);
    }

    #[test]
    fn image_cost_depends_on_detail() {
        let counter = TokenCounter::new("gpt-4o").unwrap();
        let mut low = ChatMessage::user("");
        low.content = ChatContent::Parts(vec![ContentPart::ImageUrl {
            image_url: axon_core::ImageUrl { url: "http://x/a.png".into(), detail: Some("low".into()) },
        }]);
        let mut high = ChatMessage::user("");
        high.content = ChatContent::Parts(vec![ContentPart::ImageUrl {
            image_url: axon_core::ImageUrl { url: "http://x/a.png".into(), detail: None },
        }]);
        assert!(counter.count_message(&high) > counter.count_message(&low));
    }

    #[test]
    fn truncate_respects_budget() {
        let counter = TokenCounter::new("gpt-4o").unwrap();
        let long = "word ".repeat(500);
        let truncated = counter.truncate(&long, 50);
        assert!(counter.count(&truncated) <= 50);
        assert!(truncated.len() < long.len());

        let short = "just a few words";
        assert_eq!(counter.truncate(short, 100), short);
    }

    #[test]
    fn messages_total_includes_priming() {
        let counter = TokenCounter::new("gpt-4o").unwrap();
        let msgs = vec![ChatMessage::user("a"), ChatMessage::assistant("b")];
        let total = counter.count_messages(&msgs);
        let sum: u32 = msgs.iter().map(|m| counter.count_message(m)).sum();
        assert_eq!(total, sum + 3);
    }
}
