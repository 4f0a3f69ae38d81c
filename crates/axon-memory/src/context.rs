//! Tiered context window with exact token accounting
//!
//! Three bands: hot (rendered verbatim), warm (recent history, still
//! verbatim until demoted), cold (only the attached summary counts).
//! Demotion is monotonic; locked segments never move down a tier.

use crate::token::TokenCounter;
use axon_core::{Message, Role};
use axon_llm::ChatMessage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// New hot segment once the tail holds this many messages.
const SEGMENT_CAPACITY: usize = 10;
/// Flat accounting overhead for a cold segment's summary.
const COLD_SUMMARY_OVERHEAD: u32 = 20;
/// Placeholder attached when a segment goes cold without a real summary.
const PLACEHOLDER_SUMMARY: &str = "[compressed history]";

pub struct Segment {
    pub id: Uuid,
    pub messages: Vec<Message>,
    pub token_count: u32,
    pub priority: i32,
    pub is_locked: bool,
    pub created_at: DateTime<Utc>,
    pub summary: Option<String>,
}

impl Segment {
    fn new(priority: i32, is_locked: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            messages: Vec::new(),
            token_count: 0,
            priority,
            is_locked,
            created_at: Utc::now(),
            summary: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Band {
    Hot,
    Warm,
    Cold,
}

#[derive(Clone, Debug, Serialize)]
pub struct ContextStats {
    pub max_tokens: u32,
    pub available_tokens: u32,
    pub current_tokens: u32,
    pub remaining_tokens: u32,
    pub usage_ratio: f64,
    pub hot_segments: usize,
    pub warm_segments: usize,
    pub cold_segments: usize,
    pub total_messages: usize,
}

pub struct ContextWindow {
    max_tokens: u32,
    reserved_tokens: u32,
    counter: Arc<TokenCounter>,
    hot: Vec<Segment>,
    warm: Vec<Segment>,
    cold: Vec<Segment>,
    current_tokens: u32,
    index: HashMap<Uuid, (Band, usize, usize)>,
}

impl ContextWindow {
    pub fn new(max_tokens: u32, counter: Arc<TokenCounter>) -> Self {
        // Response headroom scales with the budget so small test windows
        // keep a usable positive allowance.
        let reserved = (max_tokens / 32).max(1);
        Self::with_reserved(max_tokens, reserved, counter)
    }

    pub fn with_reserved(max_tokens: u32, reserved_tokens: u32, counter: Arc<TokenCounter>) -> Self {
        Self {
            max_tokens,
            reserved_tokens,
            counter,
            hot: Vec::new(),
            warm: Vec::new(),
            cold: Vec::new(),
            current_tokens: 0,
            index: HashMap::new(),
        }
    }

    pub fn available_tokens(&self) -> u32 {
        self.max_tokens.saturating_sub(self.reserved_tokens)
    }

    pub fn current_tokens(&self) -> u32 {
        self.current_tokens
    }

    pub fn remaining_tokens(&self) -> u32 {
        self.available_tokens().saturating_sub(self.current_tokens)
    }

    pub fn usage_ratio(&self) -> f64 {
        if self.available_tokens() == 0 {
            return 1.0;
        }
        self.current_tokens as f64 / self.available_tokens() as f64
    }

    pub fn contains(&self, message_id: Uuid) -> bool {
        self.index.contains_key(&message_id)
    }

    /// Add a message to the tail hot segment (opening a new one when the
    /// tail is full or locked). Returns false when it would overflow the
    /// available budget.
    pub fn add_message(&mut self, mut message: Message, priority: i32, lock: bool) -> bool {
        let tokens = if message.token_count > 0 {
            message.token_count
        } else {
            let computed = self.counter.count_message(&ChatMessage::from_message(&message));
            message.token_count = computed;
            computed
        };

        if tokens > self.remaining_tokens() {
            warn!(
                message_tokens = tokens,
                remaining = self.remaining_tokens(),
                "message would overflow context window"
            );
            return false;
        }

        if self.hot.is_empty() || self.needs_new_segment() {
            self.hot.push(Segment::new(priority, lock));
        }

        let seg_idx = self.hot.len() - 1;
        let segment = &mut self.hot[seg_idx];
        let msg_id = message.id;
        segment.messages.push(message);
        segment.token_count += tokens;
        // Priority and lock of later arrivals stick to the segment head.
        if segment.messages.len() == 1 {
            segment.priority = priority;
            segment.is_locked = lock;
        }

        self.index
            .insert(msg_id, (Band::Hot, seg_idx, segment.messages.len() - 1));
        self.current_tokens += tokens;

        debug!(
            message_id = %msg_id,
            tokens,
            total_tokens = self.current_tokens,
            usage_ratio = self.usage_ratio(),
            "message added to context"
        );
        true
    }

    fn needs_new_segment(&self) -> bool {
        match self.hot.last() {
            None => true,
            Some(tail) => tail.messages.len() >= SEGMENT_CAPACITY || tail.is_locked,
        }
    }

    /// Demote a hot segment to warm. Locked segments stay put.
    pub fn move_to_warm(&mut self, segment_index: usize) -> bool {
        if segment_index >= self.hot.len() || self.hot[segment_index].is_locked {
            return false;
        }
        let segment = self.hot.remove(segment_index);
        debug!(segment_id = %segment.id, "segment moved to warm storage");
        self.warm.push(segment);
        self.rebuild_index();
        true
    }

    /// Demote a warm segment to cold. With a summary attached the segment
    /// is re-costed at `tokens(summary) + 20` and the difference credited
    /// back to the budget.
    pub fn move_to_cold(&mut self, segment_index: usize, summary: Option<String>) -> bool {
        if segment_index >= self.warm.len() {
            return false;
        }
        let mut segment = self.warm.remove(segment_index);

        if let Some(summary) = summary {
            let original = segment.token_count;
            // A summary longer than the original must not inflate the
            // budget; cap the recost at the original size.
            let recosted = (self.counter.count(&summary) + COLD_SUMMARY_OVERHEAD).min(original);
            segment.summary = Some(summary);
            segment.token_count = recosted;
            self.current_tokens = self.current_tokens - original + recosted;
        }

        debug!(segment_id = %segment.id, "segment moved to cold storage");
        self.cold.push(segment);
        self.rebuild_index();
        true
    }

    /// Remove one message from the hot or warm bands. Cold segments are
    /// summary-only; their messages are retained for replay and cannot be
    /// removed individually.
    pub fn remove_message(&mut self, message_id: Uuid) -> bool {
        let Some(&(band, seg_idx, msg_idx)) = self.index.get(&message_id) else {
            return false;
        };

        let segments = match band {
            Band::Hot => &mut self.hot,
            Band::Warm => &mut self.warm,
            Band::Cold => return false,
        };
        if seg_idx >= segments.len() || msg_idx >= segments[seg_idx].messages.len() {
            return false;
        }

        let segment = &mut segments[seg_idx];
        let message = segment.messages.remove(msg_idx);
        segment.token_count = segment.token_count.saturating_sub(message.token_count);
        self.current_tokens = self.current_tokens.saturating_sub(message.token_count);

        self.rebuild_index();
        true
    }

    /// Clear the window. With `keep_locked`, locked hot segments survive.
    pub fn clear(&mut self, keep_locked: bool) {
        if keep_locked {
            self.hot.retain(|s| s.is_locked);
        } else {
            self.hot.clear();
        }
        self.warm.clear();
        self.cold.clear();

        self.current_tokens = self.hot.iter().map(|s| s.token_count).sum();
        self.rebuild_index();
    }

    /// Hot-band messages in order (the compression working set).
    pub fn active_messages(&self) -> Vec<Message> {
        self.hot
            .iter()
            .flat_map(|s| s.messages.iter().cloned())
            .collect()
    }

    /// Everything in render order: cold summaries first (as synthetic
    /// system messages costed at the summary rate), then warm, then hot.
    pub fn all_messages(&self) -> Vec<Message> {
        let mut messages = Vec::new();

        for segment in &self.cold {
            if let Some(summary) = &segment.summary {
                let mut msg = Message::new(Role::System, format!("[Conversation summary]\n{summary}"));
                msg.token_count = segment.token_count;
                msg.is_compressed = true;
                messages.push(msg);
            }
        }
        for segment in &self.warm {
            messages.extend(segment.messages.iter().cloned());
        }
        for segment in &self.hot {
            messages.extend(segment.messages.iter().cloned());
        }
        messages
    }

    /// Demote until usage drops to `target_ratio`: warm goes cold (with a
    /// placeholder summary when none was supplied), then non-locked hot
    /// goes warm. A segment never crosses hot to cold in one step.
    /// Returns the number of tokens freed.
    pub fn optimize(&mut self, target_ratio: f64) -> u32 {
        if self.usage_ratio() <= target_ratio {
            return 0;
        }

        let target_tokens = (self.available_tokens() as f64 * target_ratio) as u32;
        let mut freed: u32 = 0;

        while !self.warm.is_empty() && self.current_tokens > target_tokens {
            let before = self.current_tokens;
            self.move_to_cold(0, Some(PLACEHOLDER_SUMMARY.to_string()));
            freed += before.saturating_sub(self.current_tokens);
        }

        while self.current_tokens > target_tokens {
            let Some(idx) = self.hot.iter().position(|s| !s.is_locked) else {
                break;
            };
            // Staging only; tokens are freed on the next cold demotion.
            if !self.move_to_warm(idx) {
                break;
            }
            if self.hot.iter().all(|s| s.is_locked) {
                break;
            }
        }

        info!(
            tokens_freed = freed,
            usage_ratio = self.usage_ratio(),
            "context optimization completed"
        );
        freed
    }

    pub fn stats(&self) -> ContextStats {
        ContextStats {
            max_tokens: self.max_tokens,
            available_tokens: self.available_tokens(),
            current_tokens: self.current_tokens,
            remaining_tokens: self.remaining_tokens(),
            usage_ratio: self.usage_ratio(),
            hot_segments: self.hot.len(),
            warm_segments: self.warm.len(),
            cold_segments: self.cold.len(),
            total_messages: self.index.len(),
        }
    }

    pub fn warm_count(&self) -> usize {
        self.warm.len()
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (band, segments) in [
            (Band::Hot, &self.hot),
            (Band::Warm, &self.warm),
            (Band::Cold, &self.cold),
        ] {
            for (seg_idx, segment) in segments.iter().enumerate() {
                for (msg_idx, message) in segment.messages.iter().enumerate() {
                    self.index.insert(message.id, (band, seg_idx, msg_idx));
                }
            }
        }
    }

    /// Accounting invariant: the sum over all bands equals `current_tokens`.
    #[cfg(test)]
    fn accounted_tokens(&self) -> u32 {
        self.hot
            .iter()
            .chain(&self.warm)
            .chain(&self.cold)
            .map(|s| s.token_count)
            .sum()
    }
}
