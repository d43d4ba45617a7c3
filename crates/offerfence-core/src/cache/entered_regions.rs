use chrono::{DateTime, Utc};

use super::KeyedStore;
use crate::models::{EnteredRegionRecord, GeoFence, ScheduleId};

/// Regions the device is currently inside, keyed by schedule id.
#[derive(Debug, Default)]
pub struct EnteredRegionCache {
    items: KeyedStore<ScheduleId, EnteredRegionRecord>,
}

impl EnteredRegionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(&mut self, records: Vec<EnteredRegionRecord>) {
        self.items = KeyedStore::from_items(records.into_iter().map(|r| (r.schedule_id(), r)));
    }

    /// Returns false if the region was already recorded; the original entry time is kept.
    pub fn add(&mut self, region: &GeoFence, now: DateTime<Utc>) -> bool {
        if self.exists(region.schedule_id) {
            return false;
        }
        self.items.insert(
            region.schedule_id,
            EnteredRegionRecord::new(region.clone(), now),
        );
        true
    }

    pub fn remove(&mut self, schedule_id: ScheduleId) -> Option<EnteredRegionRecord> {
        self.items.remove(&schedule_id)
    }

    pub fn exists(&self, schedule_id: ScheduleId) -> bool {
        self.items.contains_key(&schedule_id)
    }

    pub fn all(&self) -> Vec<EnteredRegionRecord> {
        self.items.to_vec()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&EnteredRegionRecord) -> bool) -> usize {
        self.items.retain(|_, record| keep(record))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn is_dirty(&self) -> bool {
        self.items.is_dirty()
    }

    pub fn mark_clean(&mut self) {
        self.items.mark_clean();
    }
}
