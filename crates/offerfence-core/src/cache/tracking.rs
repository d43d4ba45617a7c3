use std::collections::{HashSet, VecDeque};

use tracing::debug;

use crate::models::{TrackingEvent, TrackingEventType};

/// Default number of events per upload.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// FIFO of tracking events waiting for upload.
///
/// Only event types in the sync policy are kept; everything else is logged
/// and dropped on `add`.
#[derive(Debug)]
pub struct TrackingOutbox {
    events: VecDeque<TrackingEvent>,
    policy: HashSet<TrackingEventType>,
    dirty: bool,
}

impl Default for TrackingOutbox {
    fn default() -> Self {
        Self::new(TrackingEventType::default_server_types())
    }
}

impl TrackingOutbox {
    pub fn new(policy: impl IntoIterator<Item = TrackingEventType>) -> Self {
        Self {
            events: VecDeque::new(),
            policy: policy.into_iter().collect(),
            dirty: false,
        }
    }

    pub fn restore(&mut self, events: Vec<TrackingEvent>) {
        self.events = events.into();
        self.dirty = false;
    }

    pub fn should_sync(&self, kind: TrackingEventType) -> bool {
        self.policy.contains(&kind)
    }

    pub fn add(&mut self, event: TrackingEvent) {
        if !self.should_sync(event.kind) {
            debug!(
                kind = %event.kind,
                schedule_id = event.schedule_id,
                "Tracking event not synced to server"
            );
            return;
        }
        self.events.push_back(event);
        self.dirty = true;
    }

    pub fn has_cached_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Remove and return up to `max` of the oldest events.
    pub fn pop_cached_events(&mut self, max: usize) -> Vec<TrackingEvent> {
        let n = max.min(self.events.len());
        if n > 0 {
            self.dirty = true;
        }
        self.events.drain(..n).collect()
    }

    /// Put a batch that failed to upload back in front, in its original order.
    pub fn requeue_front(&mut self, batch: Vec<TrackingEvent>) {
        if batch.is_empty() {
            return;
        }
        for event in batch.into_iter().rev() {
            self.events.push_front(event);
        }
        self.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> Vec<TrackingEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        if !self.events.is_empty() {
            self.dirty = true;
        }
        self.events.clear();
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}
