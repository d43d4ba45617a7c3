use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{GeoFence, ScheduleId};

/// A region snapshot plus the moment it was recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheItem {
    pub region: GeoFence,
    #[serde(rename = "createdDate")]
    pub created_at: DateTime<Utc>,
}

/// Entered a region, waiting for the dwell delay to elapse.
pub type PendingOffer = CacheItem;
/// Currently inside a region.
pub type EnteredRegionRecord = CacheItem;
/// Offer earned, waiting for the delivery delay before notifying.
pub type PendingNotification = CacheItem;

impl CacheItem {
    pub fn new(region: GeoFence, created_at: DateTime<Utc>) -> Self {
        Self { region, created_at }
    }

    pub fn schedule_id(&self) -> ScheduleId {
        self.region.schedule_id
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    /// Dwell satisfied: elapsed since entry is at least the region's dwell delay.
    pub fn dwell_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.elapsed(now).num_milliseconds() >= self.region.dwell_delay_ms as i64
    }

    /// Delivery delay satisfied.
    pub fn delivery_due(&self, now: DateTime<Utc>) -> bool {
        self.elapsed(now).num_milliseconds() >= self.region.delivery_delay_ms as i64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredOffer {
    #[serde(rename = "scheduleId")]
    pub schedule_id: ScheduleId,
    #[serde(rename = "deviceUid")]
    pub device_key: String,
    #[serde(rename = "deliveredDate")]
    pub delivered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_dwell_boundary() {
        let region: GeoFence = serde_json::from_str(
            r#"{"scheduleId": 1, "deviceUid": "d", "lat": 0, "lng": 0, "radiusKm": 1,
                "loiteringDelayMs": 5000, "deliveryDelayMs": 2000}"#,
        )
        .unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let item = CacheItem::new(region, start);

        assert!(!item.dwell_elapsed(start + Duration::milliseconds(4999)));
        assert!(item.dwell_elapsed(start + Duration::milliseconds(5000)));
        assert!(!item.delivery_due(start + Duration::milliseconds(1999)));
        assert!(item.delivery_due(start + Duration::milliseconds(2000)));
    }
}
