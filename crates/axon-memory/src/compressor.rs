//! Importance scoring and threshold-triggered compression
//!
//! `ImportanceScorer` is pure and deterministic. `Compressor` is the only
//! component that issues summarization LLM calls; it is safe to run
//! concurrently for different sessions but the caller serializes it per
//! session.

use crate::token::TokenCounter;
use axon_core::{Message, Role};
use axon_llm::{ChatMessage, ChatProvider, ChatRequest};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info};

/// Fixed keyword lexicon and weights for the importance signal.
const KEYWORD_WEIGHTS: &[(&str, f64)] = &[
    ("error", 0.3),
    ("critical", 0.3),
    ("decision", 0.25),
    ("important", 0.2),
    ("remember", 0.2),
    ("conclusion", 0.2),
    ("key", 0.15),
    ("result", 0.15),
];

const SENTENCE_BOUNDARIES: &[char] = &['。', '！', '？', '.', '!', '?'];

/// Messages this recent are always retained.
const RECENT_KEEP: usize = 3;
/// Scores at or above this are always retained.
const HIGH_IMPORTANCE: f64 = 0.7;
/// Summarizer input budget.
const MAX_SUMMARY_INPUT_TOKENS: usize = 3000;

pub struct ImportanceScorer {
    decay_factor: f64,
}

impl ImportanceScorer {
    pub fn new(decay_factor: f64) -> Self {
        Self { decay_factor }
    }

    /// Score one message in [0, 1]:
    /// 0.3·base + 0.3·decay^(reverse index) + 0.2·role + 0.15·keywords
    /// (keywords capped at 0.3) + 0.2 tool-call bonus.
    pub fn score(&self, message: &Message, position: usize, total: usize) -> f64 {
        let base = message.importance_score;

        let reverse_index = total.saturating_sub(position + 1);
        let position_factor = self.decay_factor.powi(reverse_index as i32);

        let role_factor = match message.role {
            Role::System => 1.0,
            Role::User => 0.8,
            Role::Assistant => 0.6,
            Role::Tool => 0.5,
        };

        let content = message.content.text().to_lowercase();
        let keyword_score: f64 = KEYWORD_WEIGHTS
            .iter()
            .filter(|(kw, _)| content.contains(kw))
            .map(|(_, weight)| weight)
            .sum();

        let tool_bonus = if message.has_tool_calls() { 0.2 } else { 0.0 };

        let score = base * 0.3
            + position_factor * 0.3
            + role_factor * 0.2
            + keyword_score.min(0.3) * 0.15
            + tool_bonus;

        score.min(1.0)
    }
}

impl Default for ImportanceScorer {
    fn default() -> Self {
        Self::new(0.95)
    }
}

pub struct Compressor {
    provider: Arc<dyn ChatProvider>,
    counter: Arc<TokenCounter>,
    scorer: ImportanceScorer,
    model: String,
    summary_max_tokens: u32,
}

impl Compressor {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        counter: Arc<TokenCounter>,
        model: impl Into<String>,
        decay_factor: f64,
        summary_max_tokens: u32,
    ) -> Self {
        Self {
            provider,
            counter,
            scorer: ImportanceScorer::new(decay_factor),
            model: model.into(),
            summary_max_tokens,
        }
    }

    /// Compress a message sequence. Returns the retained messages (in
    /// their original order) and the summary of everything evicted.
    ///
    /// Always retained: system messages, the last three non-system
    /// messages, and anything scoring at or above the high-importance bar.
    /// Never fails: a summarizer error falls back to the extractive path.
    pub async fn compress(&self, messages: &[Message]) -> (Vec<Message>, Option<String>) {
        if messages.len() < RECENT_KEEP {
            return (messages.to_vec(), None);
        }

        let total = messages.len();
        let mut keep: BTreeSet<usize> = BTreeSet::new();
        let mut evicted: Vec<&Message> = Vec::new();

        for (i, message) in messages.iter().enumerate() {
            let score = self.scorer.score(message, i, total);
            if message.role == Role::System || i >= total - RECENT_KEEP || score >= HIGH_IMPORTANCE
            {
                keep.insert(i);
            } else {
                evicted.push(message);
            }
        }

        let summary = if evicted.is_empty() {
            None
        } else {
            Some(self.summarize(&evicted).await)
        };

        let retained: Vec<Message> = keep.iter().map(|&i| messages[i].clone()).collect();

        info!(
            original_count = total,
            retained_count = retained.len(),
            original_tokens = messages.iter().map(|m| m.token_count).sum::<u32>(),
            retained_tokens = retained.iter().map(|m| m.token_count).sum::<u32>(),
            "context compression completed"
        );

        (retained, summary)
    }

    async fn summarize(&self, messages: &[&Message]) -> String {
        let mut transcript = messages
            .iter()
            .map(|m| format!("[{}]: {}", role_label(m.role), m.content.text()))
            .collect::<Vec<_>>()
            .join("\n");

        if self.counter.count(&transcript) as usize > MAX_SUMMARY_INPUT_TOKENS {
            transcript = self.counter.truncate(&transcript, MAX_SUMMARY_INPUT_TOKENS);
        }

        let prompt = format!(
            "Summarize the following conversation, preserving key information, \
             decisions, and conclusions. Be concise:\n\n{transcript}\n\nSummary:"
        );

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(prompt)],
            tools: None,
            max_tokens: Some(self.summary_max_tokens),
            temperature: Some(0.3),
            stream: false,
        };

        match self.provider.chat(request).await {
            Ok(completion) => completion
                .content
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| extractive_summary(messages)),
            Err(err) => {
                error!(error = %err, "failed to generate summary, falling back to extractive");
                extractive_summary(messages)
            }
        }
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Keyword-sentence extraction, else the first 200 chars of the first
/// three messages, joined by `" | "`.
fn extractive_summary(messages: &[&Message]) -> String {
    let mut key_points: Vec<String> = Vec::new();

    for message in messages {
        let text = message.content.text();
        for sentence in text.split(SENTENCE_BOUNDARIES) {
            let lowered = sentence.to_lowercase();
            if KEYWORD_WEIGHTS.iter().any(|(kw, _)| lowered.contains(kw)) {
                let trimmed = sentence.trim();
                if !trimmed.is_empty() {
                    key_points.push(trimmed.to_string());
                }
            }
        }
    }

    if !key_points.is_empty() {
        key_points.truncate(5);
        return key_points.join(" | ");
    }

    messages
        .iter()
        .take(3)
        .map(|m| m.content.text().chars().take(200).collect::<String>())
        .collect::<Vec<_>>()
        .join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_core::ToolCall;
    use axon_llm::{MockBehavior, MockProvider};

    fn counter() -> Arc<TokenCounter> {
        Arc::new(TokenCounter::new("gpt-4o").unwrap())
    }

    fn scored(msg: &Message, position: usize, total: usize) -> f64 {
        ImportanceScorer::default().score(msg, position, total)
    }

    #[test]
    fn system_role_scores_highest() {
        let system = Message::system("x");
        let tool = Message::tool_result("c1", "x");
        assert!(scored(&system, 0, 10) > scored(&tool, 0, 10));
    }

    #[test]
    fn recent_messages_score_higher() {
        let msg = Message::user("plain text");
        let old = scored(&msg, 0, 20);
        let recent = scored(&msg, 19, 20);
        assert!(recent > old);
    }

    #[test]
    fn keywords_boost_and_cap() {
        let plain = Message::user("nothing notable here");
        let keyword = Message::user("this is an important decision with a critical error");
        let a = scored(&plain, 0, 10);
        let b = scored(&keyword, 0, 10);
        assert!(b > a);
        // Keyword contribution is capped at 0.3 * 0.15.
        assert!(b - a <= 0.3 * 0.15 + 1e-9);
    }

    #[test]
    fn tool_calls_add_bonus_and_score_caps_at_one() {
        let mut msg = Message::assistant("done");
        msg.tool_calls = Some(vec![ToolCall::new("c1", "search", "{}")]);
        let with_tools = scored(&msg, 9, 10);
        let without = scored(&Message::assistant("done"), 9, 10);
        assert!(with_tools > without);
        assert!(with_tools <= 1.0);
    }

    #[tokio::test]
    async fn short_conversations_compress_to_themselves() {
        let provider = Arc::new(MockProvider::constant(MockBehavior::Text("sum".into())));
        let compressor = Compressor::new(provider, counter(), "gpt-4o", 0.95, 500);

        let messages = vec![Message::system("only the system prompt")];
        let (retained, summary) = compressor.compress(&messages).await;
        assert_eq!(retained.len(), 1);
        assert!(summary.is_none());
    }

    #[tokio::test]
    async fn retains_system_recent_and_important() {
        let provider = Arc::new(MockProvider::constant(MockBehavior::Text(
            "summary of the early chat".into(),
        )));
        let compressor = Compressor::new(provider, counter(), "gpt-4o", 0.95, 500);

        let mut messages = vec![Message::system("system prompt")];
        for i in 0..10 {
            messages.push(Message::user(format!("filler message {i}")));
        }
        messages.push(Message::user("final question"));

        let (retained, summary) = compressor.compress(&messages).await;
        assert_eq!(summary.as_deref(), Some("summary of the early chat"));
        // System message survives.
        assert!(retained.iter().any(|m| m.role == Role::System));
        // Last three non-system messages survive in order.
        let texts: Vec<String> = retained.iter().map(|m| m.content.text()).collect();
        assert!(texts.contains(&"final question".to_string()));
        assert!(retained.len() < messages.len());
    }

    #[tokio::test]
    async fn summarizer_failure_falls_back_to_extractive() {
        let provider = Arc::new(MockProvider::constant(MockBehavior::Error("boom".into())));
        let compressor = Compressor::new(provider, counter(), "gpt-4o", 0.95, 500);

        // Long enough that the position decay pushes the oldest messages
        // below the retention bar despite their keyword bonus.
        let mut messages = vec![Message::system("sys")];
        for i in 0..25 {
            messages.push(Message::user(format!("there was an error in step {i}.")));
        }

        let (retained, summary) = compressor.compress(&messages).await;
        assert!(retained.len() < messages.len(), "old messages should be evicted");
        let summary = summary.expect("fallback summary");
        assert!(summary.contains("error"));
    }

    #[test]
    fn extractive_summary_without_keywords_uses_prefixes() {
        let m1 = Message::user("first message body");
        let m2 = Message::user("second message body");
        let summary = extractive_summary(&[&m1, &m2]);
        assert_eq!(summary, "first message body | second message body");
    }
}
