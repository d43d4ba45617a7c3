use serde::{Deserialize, Serialize};

use super::{Coordinate, ScheduleId};
use crate::utils::decode::{
    delay_ms, f64_from_number_or_string, i64_from_number_or_string, radius_km, string_or_empty,
};

/// A circular region tied to a schedule/device pairing.
///
/// Immutable for the lifetime of a listing; a refresh replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoFence {
    #[serde(rename = "logoImageUrl", default, deserialize_with = "string_or_empty")]
    pub logo_image_url: String,
    #[serde(rename = "scheduleId", deserialize_with = "i64_from_number_or_string")]
    pub schedule_id: ScheduleId,
    #[serde(rename = "deviceUid")]
    pub device_key: String,
    #[serde(rename = "lat", deserialize_with = "f64_from_number_or_string")]
    pub latitude: f64,
    #[serde(rename = "lng", deserialize_with = "f64_from_number_or_string")]
    pub longitude: f64,
    #[serde(rename = "radiusKm", deserialize_with = "radius_km")]
    pub radius_km: f64,
    #[serde(
        rename = "customEntryNotificationTitle",
        default,
        deserialize_with = "string_or_empty"
    )]
    pub notification_title: String,
    #[serde(
        rename = "customEntryNotificationMessage",
        default,
        deserialize_with = "string_or_empty"
    )]
    pub notification_message: String,
    #[serde(rename = "loiteringDelayMs", default, deserialize_with = "delay_ms")]
    pub dwell_delay_ms: u64,
    #[serde(rename = "deliveryDelayMs", default, deserialize_with = "delay_ms")]
    pub delivery_delay_ms: u64,
    #[serde(rename = "doesNotNotify", default)]
    pub does_not_notify: bool,
    #[serde(rename = "notifiesSilently", default)]
    pub notifies_silently: bool,
}

impl GeoFence {
    /// Build the `scheduleId_deviceUid` key used for region identifiers.
    pub fn generate_key(schedule_id: ScheduleId, device_key: &str) -> String {
        format!("{}_{}", schedule_id, device_key)
    }

    pub fn key(&self) -> String {
        Self::generate_key(self.schedule_id, &self.device_key)
    }

    pub fn center(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    pub fn radius_meters(&self) -> f64 {
        self.radius_km * 1000.0
    }

    /// Inclusive containment on the great-circle distance.
    pub fn contains(&self, point: &Coordinate) -> bool {
        self.center().distance_to(point) <= self.radius_meters()
    }

    pub fn distance_from(&self, point: &Coordinate) -> f64 {
        self.center().distance_to(point)
    }
}
