use chrono::{DateTime, Utc};

use super::KeyedStore;
use crate::models::{GeoFence, PendingNotification, ScheduleId};

/// Earned offers waiting out their delivery delay.
#[derive(Debug, Default)]
pub struct PendingNotificationCache {
    items: KeyedStore<ScheduleId, PendingNotification>,
}

impl PendingNotificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(&mut self, items: Vec<PendingNotification>) {
        self.items = KeyedStore::from_items(items.into_iter().map(|n| (n.schedule_id(), n)));
    }

    pub fn add(&mut self, region: &GeoFence, now: DateTime<Utc>) {
        self.items.insert(
            region.schedule_id,
            PendingNotification::new(region.clone(), now),
        );
    }

    pub fn remove(&mut self, schedule_id: ScheduleId) -> Option<PendingNotification> {
        self.items.remove(&schedule_id)
    }

    pub fn pending_notifications(&self) -> Vec<PendingNotification> {
        self.items.to_vec()
    }

    /// Schedule ids whose delivery delay has elapsed at `now`.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<ScheduleId> {
        self.items
            .values()
            .filter(|n| n.delivery_due(now))
            .map(|n| n.schedule_id())
            .collect()
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{region, t0};
    use chrono::Duration;

    #[test]
    fn test_due_respects_each_delay() {
        let mut cache = PendingNotificationCache::new();
        cache.add(&region(1, 0, 1000), t0());
        cache.add(&region(2, 0, 60_000), t0());

        assert!(cache.due(t0()).is_empty());
        assert_eq!(cache.due(t0() + Duration::seconds(1)), vec![1]);
        assert_eq!(cache.due(t0() + Duration::minutes(1)), vec![1, 2]);

        assert!(cache.remove(1).is_some());
        assert_eq!(cache.pending_notifications().len(), 1);
    }
}
