use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Campaign, GeoFence, Schedule, ScheduleId};
use crate::utils::decode::{default_on_error, f64_from_number_or_string, i64_from_number_or_string};

/// Push `type` value that redeems a coupon instead of patching the listing.
pub const COUPON_REDEEMED_TYPE: &str = "CouponRedeemed";

/// One portion of a (possibly split) push message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushData {
    #[serde(rename = "geoRewardsPushMessageJson")]
    pub message: String,
    #[serde(
        rename = "splitMessageTotalPortionsCount",
        deserialize_with = "i64_from_number_or_string"
    )]
    pub total_parts: i64,
    #[serde(rename = "offerScheduleId", deserialize_with = "i64_from_number_or_string")]
    pub schedule_id: ScheduleId,
    #[serde(
        rename = "splitMessagePortionIndex",
        deserialize_with = "i64_from_number_or_string"
    )]
    pub message_index: i64,
    #[serde(rename = "splitMessageId")]
    pub message_id: String,
    #[serde(
        rename = "splitOrSingleMessageInitiatedTimestampMs",
        deserialize_with = "f64_from_number_or_string"
    )]
    pub timestamp_ms: f64,
}

impl PushData {
    /// Age of the message relative to `now`, in milliseconds (absolute).
    pub fn age_ms(&self, now: DateTime<Utc>) -> f64 {
        (now.timestamp_millis() as f64 - self.timestamp_ms).abs()
    }

    pub fn is_single(&self) -> bool {
        self.total_parts <= 1
    }
}

/// Decoded content of an assembled push message.
#[derive(Debug, Clone, PartialEq)]
pub enum PushUpdate {
    CouponRedeemed { campaign_id: i64 },
    Listing(ListingDelta),
}

#[derive(Deserialize)]
struct CouponRedeemedBody {
    #[serde(rename = "campaignId", deserialize_with = "i64_from_number_or_string")]
    campaign_id: i64,
}

impl PushUpdate {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if value.get("type").and_then(|t| t.as_str()) == Some(COUPON_REDEEMED_TYPE) {
            let body: CouponRedeemedBody = serde_json::from_value(value)?;
            Ok(PushUpdate::CouponRedeemed {
                campaign_id: body.campaign_id,
            })
        } else {
            Ok(PushUpdate::Listing(serde_json::from_value(value)?))
        }
    }
}

/// Incremental listing change delivered by push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingDelta {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "scheduleId", deserialize_with = "i64_from_number_or_string")]
    pub schedule_id: ScheduleId,
    #[serde(default)]
    pub campaign: Option<Campaign>,
    #[serde(default, deserialize_with = "default_on_error")]
    pub geofences: Vec<GeoFence>,
    #[serde(rename = "offerRun", default)]
    pub offer_run: Option<Schedule>,
}
