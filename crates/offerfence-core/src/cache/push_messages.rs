use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::models::PushData;

/// Incomplete split messages are dropped after this long.
const DELETE_MESSAGES_AFTER_DAYS: i64 = 2;

/// Holds portions of split push messages until every portion has arrived.
#[derive(Debug, Default)]
pub struct PushMessageCache {
    messages: Vec<PushData>,
    dirty: bool,
}

impl PushMessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(&mut self, messages: Vec<PushData>) {
        self.messages = messages;
        self.dirty = false;
    }

    /// Store a portion. Returns the assembled message JSON once all portions are in.
    pub fn add(&mut self, part: PushData) -> Option<String> {
        if part.is_single() {
            return Some(part.message);
        }

        let message_id = part.message_id.clone();
        let total = part.total_parts;
        self.messages.retain(|m| {
            !(m.message_id == part.message_id && m.message_index == part.message_index)
        });
        self.messages.push(part);
        self.dirty = true;

        let received = self.count(&message_id);
        if (received as i64) < total {
            debug!(message_id = %message_id, received, total, "Waiting for more push portions");
            return None;
        }

        let mut parts = self.messages(&message_id);
        parts.sort_by_key(|p| p.message_index);
        self.remove(&message_id);
        Some(parts.into_iter().map(|p| p.message).collect())
    }

    pub fn count(&self, message_id: &str) -> usize {
        self.messages
            .iter()
            .filter(|m| m.message_id == message_id)
            .count()
    }

    pub fn messages(&self, message_id: &str) -> Vec<PushData> {
        self.messages
            .iter()
            .filter(|m| m.message_id == message_id)
            .cloned()
            .collect()
    }

    pub fn remove(&mut self, message_id: &str) {
        let before = self.messages.len();
        self.messages.retain(|m| m.message_id != message_id);
        if self.messages.len() != before {
            self.dirty = true;
        }
    }

    /// Drop portions older than two days.
    pub fn clean_up(&mut self, now: DateTime<Utc>) -> usize {
        let max_age_ms = Duration::days(DELETE_MESSAGES_AFTER_DAYS).num_milliseconds() as f64;
        let before = self.messages.len();
        self.messages.retain(|m| m.age_ms(now) <= max_age_ms);
        let dropped = before - self.messages.len();
        if dropped > 0 {
            self.dirty = true;
        }
        dropped
    }

    pub fn all(&self) -> Vec<PushData> {
        self.messages.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}
