use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Coordinate, GeoFence, ScheduleId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingEventType {
    GeofenceEntry,
    GeofenceExit,
    Delivered,
    GeofenceDwell,
    PolledForNearbyOffers,
    CouponOpened,
}

impl TrackingEventType {
    /// Types uploaded to the backend unless configured otherwise.
    pub fn default_server_types() -> Vec<TrackingEventType> {
        vec![TrackingEventType::GeofenceEntry, TrackingEventType::Delivered]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingEventType::GeofenceEntry => "GeofenceEntry",
            TrackingEventType::GeofenceExit => "GeofenceExit",
            TrackingEventType::Delivered => "Delivered",
            TrackingEventType::GeofenceDwell => "GeofenceDwell",
            TrackingEventType::PolledForNearbyOffers => "PolledForNearbyOffers",
            TrackingEventType::CouponOpened => "CouponOpened",
        }
    }
}

impl std::fmt::Display for TrackingEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingEvent {
    #[serde(rename = "type")]
    pub kind: TrackingEventType,
    #[serde(rename = "timestampMs")]
    pub timestamp_ms: i64,
    #[serde(rename = "deviceUid")]
    pub device_key: String,
    #[serde(rename = "rewardScheduleId")]
    pub schedule_id: ScheduleId,
    #[serde(rename = "userLatitude")]
    pub latitude: f64,
    #[serde(rename = "userLongitude")]
    pub longitude: f64,
}

impl TrackingEvent {
    /// Event about a region, stamped with the user's position.
    pub fn for_region(
        kind: TrackingEventType,
        region: &GeoFence,
        location: &Coordinate,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            timestamp_ms: at.timestamp_millis(),
            device_key: region.device_key.clone(),
            schedule_id: region.schedule_id,
            latitude: location.latitude,
            longitude: location.longitude,
        }
    }

    /// Event recorded when the device polls for nearby offers.
    pub fn polled(device_id: &str, location: &Coordinate, at: DateTime<Utc>) -> Self {
        Self {
            kind: TrackingEventType::PolledForNearbyOffers,
            timestamp_ms: at.timestamp_millis(),
            device_key: device_id.to_string(),
            schedule_id: 0,
            latitude: location.latitude,
            longitude: location.longitude,
        }
    }
}

/// Upload envelope for `POST geo-offer-events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingBatch {
    #[serde(rename = "endUserUid")]
    pub device_id: String,
    #[serde(rename = "endUserTimezone")]
    pub timezone: String,
    pub events: Vec<TrackingEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_event_wire_keys() {
        let region: GeoFence = serde_json::from_str(
            r#"{"scheduleId": 42, "deviceUid": "dev-1", "lat": 1.0, "lng": 2.0, "radiusKm": 1}"#,
        )
        .unwrap();
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let event = TrackingEvent::for_region(
            TrackingEventType::GeofenceEntry,
            &region,
            &Coordinate::new(1.001, 2.001),
            at,
        );

        let batch = TrackingBatch {
            device_id: "user-1".to_string(),
            timezone: "Europe/London".to_string(),
            events: vec![event],
        };
        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["endUserUid"], "user-1");
        assert_eq!(json["endUserTimezone"], "Europe/London");
        let event = &json["events"][0];
        assert_eq!(event["type"], "GeofenceEntry");
        assert_eq!(event["timestampMs"], 1_700_000_000_123i64);
        assert_eq!(event["deviceUid"], "dev-1");
        assert_eq!(event["rewardScheduleId"], 42);
        assert_eq!(event["userLatitude"], 1.001);
    }

    #[test]
    fn test_type_names_match_serde() {
        for kind in [
            TrackingEventType::GeofenceEntry,
            TrackingEventType::GeofenceExit,
            TrackingEventType::Delivered,
            TrackingEventType::GeofenceDwell,
            TrackingEventType::PolledForNearbyOffers,
            TrackingEventType::CouponOpened,
        ] {
            assert_eq!(serde_json::to_value(kind).unwrap(), kind.as_str());
        }
    }
}
