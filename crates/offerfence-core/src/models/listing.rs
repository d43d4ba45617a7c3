use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::{Coordinate, GeoFence, ListingDelta, Schedule, ScheduleId};
use crate::utils::decode::{default_on_error, f64_from_number_or_string, i64_from_number_or_string};

/// Catchment radius used when the backend omits it.
const DEFAULT_CATCHMENT_RADIUS_KM: f64 = 1.0;

fn default_catchment_radius() -> f64 {
    DEFAULT_CATCHMENT_RADIUS_KM
}

/// The full catalog returned by a nearby-offers poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    #[serde(rename = "clientId", deserialize_with = "i64_from_number_or_string")]
    pub client_id: i64,
    #[serde(
        rename = "catchmentRadiusKmAroundDeviceLocationSent",
        default = "default_catchment_radius",
        deserialize_with = "f64_from_number_or_string"
    )]
    pub catchment_radius_km: f64,
    /// Keyed by campaign id as a string
    pub campaigns: BTreeMap<String, Campaign>,
    /// Keyed by schedule id as a string
    #[serde(
        rename = "geofencesByRewardScheduleId",
        default,
        deserialize_with = "default_on_error"
    )]
    pub regions: BTreeMap<String, Vec<GeoFence>>,
    #[serde(rename = "offerRuns", default, deserialize_with = "default_on_error")]
    pub schedules: Vec<Schedule>,
    #[serde(rename = "matchingDeviceUids", default, deserialize_with = "default_on_error")]
    pub schedule_device_ids: Vec<String>,
    #[serde(rename = "offersNetworkCampaignId", default)]
    pub campaign_id: Option<i64>,
    #[serde(
        rename = "scheduleIdAndDeviceUidCombinationsAlreadyDelivered",
        default,
        deserialize_with = "default_on_error"
    )]
    pub delivered_schedules: Vec<DeliveredSchedule>,
}

impl Listing {
    pub fn all_regions(&self) -> impl Iterator<Item = &GeoFence> {
        self.regions.values().flatten()
    }

    pub fn regions_containing(&self, point: &Coordinate) -> Vec<GeoFence> {
        self.all_regions()
            .filter(|region| region.contains(point))
            .cloned()
            .collect()
    }

    pub fn region_for_schedule(&self, schedule_id: ScheduleId) -> Option<&GeoFence> {
        self.all_regions().find(|r| r.schedule_id == schedule_id)
    }

    pub fn contains_schedule(&self, schedule_id: ScheduleId) -> bool {
        self.region_for_schedule(schedule_id).is_some()
    }

    /// True when any offer run for the schedule is valid at `now` (device-local time).
    pub fn is_schedule_valid(&self, schedule_id: ScheduleId, now: NaiveDateTime) -> bool {
        self.schedules
            .iter()
            .any(|s| s.schedule_id == schedule_id && s.is_valid(now))
    }

    /// Distance the device must move before a new poll is worthwhile, in meters.
    pub fn minimum_movement_distance(&self) -> f64 {
        self.catchment_radius_km * 1000.0 / 2.0
    }

    /// Mark a campaign's coupon as redeemed. Returns false for unknown campaigns.
    pub fn redeem_coupon(&mut self, campaign_id: i64) -> bool {
        match self.campaigns.get_mut(&campaign_id.to_string()) {
            Some(campaign) => {
                campaign.offer.is_redeemed = Some(true);
                true
            }
            None => false,
        }
    }

    pub fn offer_for_schedule(&self, schedule_id: ScheduleId) -> Option<&Offer> {
        self.campaigns
            .values()
            .map(|c| &c.offer)
            .find(|offer| offer.schedule_id == Some(schedule_id))
    }

    /// When the backend says the offer for a schedule reached the app, if it does.
    pub fn delivered_at(&self, schedule_id: ScheduleId) -> Option<DateTime<Utc>> {
        let seconds = self
            .offer_for_schedule(schedule_id)?
            .delivered_to_app_timestamp_seconds?;
        if !seconds.is_finite() || seconds <= 0.0 {
            return None;
        }
        Utc.timestamp_millis_opt((seconds * 1000.0).round() as i64)
            .single()
    }

    /// Patch regions, offer run and campaign from a push delta.
    pub fn apply_delta(&mut self, delta: &ListingDelta) {
        for region in &delta.geofences {
            let bucket = self
                .regions
                .entry(region.schedule_id.to_string())
                .or_default();
            bucket.retain(|r| {
                !(r.schedule_id == region.schedule_id && r.device_key == region.device_key)
            });
            bucket.push(region.clone());
        }

        if let Some(schedule) = &delta.offer_run {
            self.schedules.retain(|s| {
                !(s.schedule_id == schedule.schedule_id && s.campaign_id == schedule.campaign_id)
            });
            self.schedules.push(schedule.clone());
        }

        if let Some(campaign) = &delta.campaign {
            self.campaigns
                .insert(campaign.campaign_id.to_string(), campaign.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    #[serde(rename = "campaignId", deserialize_with = "i64_from_number_or_string")]
    pub campaign_id: i64,
    pub offer: Offer,
    /// Presentation fields the engine does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Offer payload. Only the fields the engine reads are typed; everything else
/// is carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    #[serde(rename = "isRedeemed", default, skip_serializing_if = "Option::is_none")]
    pub is_redeemed: Option<bool>,
    #[serde(rename = "scheduleId", default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<ScheduleId>,
    #[serde(rename = "deviceUid", default, skip_serializing_if = "Option::is_none")]
    pub device_uid: Option<String>,
    #[serde(
        rename = "deliveredToAppTimestampSeconds",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub delivered_to_app_timestamp_seconds: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Offer {
    pub fn is_redeemed(&self) -> bool {
        self.is_redeemed.unwrap_or(false)
    }
}

/// A schedule/device pairing the backend has already delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredSchedule {
    #[serde(rename = "rewardScheduleId", deserialize_with = "i64_from_number_or_string")]
    pub schedule_id: ScheduleId,
    #[serde(rename = "deviceUid")]
    pub device_key: String,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;

    pub(crate) const SAMPLE_LISTING: &str = r#"{
        "clientId": 3,
        "catchmentRadiusKmAroundDeviceLocationSent": 2,
        "offersNetworkCampaignId": 11,
        "matchingDeviceUids": ["dev-1"],
        "campaigns": {
            "7": {
                "campaignId": 7,
                "language": "en",
                "version": "1",
                "offer": {
                    "scheduleId": 42,
                    "deviceUid": "dev-1",
                    "headline": "Half price",
                    "isRedeemed": false,
                    "deliveredToAppTimestampSeconds": 1700000000
                }
            }
        },
        "geofencesByRewardScheduleId": {
            "42": [{
                "scheduleId": 42,
                "deviceUid": "dev-1",
                "lat": 51.5074,
                "lng": -0.1278,
                "radiusKm": 0.5,
                "loiteringDelayMs": 5000,
                "deliveryDelayMs": 0,
                "customEntryNotificationTitle": "Offer nearby",
                "customEntryNotificationMessage": "Come in"
            }]
        },
        "offerRuns": [{
            "scheduleId": 42,
            "campaignId": 7,
            "startDate": "2024-01-01 00:00:00",
            "endDate": "2024-12-31 23:59:59"
        }],
        "scheduleIdAndDeviceUidCombinationsAlreadyDelivered": [
            {"rewardScheduleId": "99", "deviceUid": "dev-9"}
        ]
    }"#;

    fn sample() -> Listing {
        serde_json::from_str(SAMPLE_LISTING).unwrap()
    }

    fn noon(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_decode_listing() {
        let listing = sample();
        assert_eq!(listing.client_id, 3);
        assert_eq!(listing.all_regions().count(), 1);
        assert_eq!(listing.schedules.len(), 1);
        assert_eq!(listing.delivered_schedules[0].schedule_id, 99);
        assert_eq!(listing.minimum_movement_distance(), 1000.0);
    }

    #[test]
    fn test_unknown_offer_fields_survive() {
        let listing = sample();
        let json = serde_json::to_value(&listing).unwrap();
        assert_eq!(json["campaigns"]["7"]["offer"]["headline"], "Half price");
        assert_eq!(json["campaigns"]["7"]["language"], "en");
    }

    #[test]
    fn test_malformed_collections_decode_empty() {
        let json = r#"{
            "clientId": 1,
            "campaigns": {},
            "geofencesByRewardScheduleId": [1, 2, 3],
            "offerRuns": {"bad": true}
        }"#;
        let listing: Listing = serde_json::from_str(json).unwrap();
        assert!(listing.regions.is_empty());
        assert!(listing.schedules.is_empty());
        assert_eq!(listing.catchment_radius_km, 1.0);
    }

    #[test]
    fn test_missing_campaigns_is_rejected() {
        let result: Result<Listing, _> = serde_json::from_str(r#"{"clientId": 1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_schedule_validity_lookup() {
        let listing = sample();
        assert!(listing.is_schedule_valid(42, noon(2024, 6, 1)));
        assert!(!listing.is_schedule_valid(42, noon(2025, 6, 1)));
        assert!(!listing.is_schedule_valid(43, noon(2024, 6, 1)));
    }

    #[test]
    fn test_regions_containing() {
        let listing = sample();
        assert_eq!(listing.regions_containing(&Coordinate::new(51.5074, -0.1278)).len(), 1);
        assert!(listing.regions_containing(&Coordinate::new(48.85, 2.35)).is_empty());
    }

    #[test]
    fn test_redeem_coupon() {
        let mut listing = sample();
        assert!(listing.redeem_coupon(7));
        assert!(listing.campaigns["7"].offer.is_redeemed());
        assert!(!listing.redeem_coupon(8));
    }

    #[test]
    fn test_delivered_at_from_offer() {
        let listing = sample();
        let at = listing.delivered_at(42).unwrap();
        assert_eq!(at.timestamp(), 1_700_000_000);
        assert!(listing.delivered_at(99).is_none());
    }

    #[test]
    fn test_apply_delta_replaces_by_pairing() {
        let mut listing = sample();
        let delta: ListingDelta = serde_json::from_str(
            r#"{
                "type": "ScheduleUpdated",
                "scheduleId": 42,
                "geofences": [
                    {"scheduleId": 42, "deviceUid": "dev-1", "lat": 1.0, "lng": 1.0, "radiusKm": 1},
                    {"scheduleId": 50, "deviceUid": "dev-5", "lat": 2.0, "lng": 2.0, "radiusKm": 1}
                ],
                "offerRun": {
                    "scheduleId": 42,
                    "campaignId": 7,
                    "startDate": "2025-01-01 00:00:00",
                    "endDate": "2025-12-31 23:59:59"
                },
                "campaign": {"campaignId": 8, "offer": {"scheduleId": 50}}
            }"#,
        )
        .unwrap();

        listing.apply_delta(&delta);

        assert_eq!(listing.regions["42"].len(), 1);
        assert_eq!(listing.regions["42"][0].latitude, 1.0);
        assert_eq!(listing.regions["50"].len(), 1);
        assert_eq!(listing.schedules.len(), 1);
        assert!(listing.is_schedule_valid(42, noon(2025, 6, 1)));
        assert!(listing.campaigns.contains_key("8"));
    }
}
