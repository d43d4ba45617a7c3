use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use super::ScheduleId;
use crate::utils::decode::i64_from_number_or_string;

/// An offer run: the window in which a campaign's offer may be delivered.
///
/// Dates are device-local wall-clock times (`yyyy-MM-dd HH:mm:ss` on the wire).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(rename = "scheduleId", deserialize_with = "i64_from_number_or_string")]
    pub schedule_id: ScheduleId,
    #[serde(rename = "campaignId", deserialize_with = "i64_from_number_or_string")]
    pub campaign_id: i64,
    #[serde(rename = "startDate", with = "schedule_date")]
    pub start_date: NaiveDateTime,
    #[serde(rename = "endDate", with = "schedule_date")]
    pub end_date: NaiveDateTime,
    #[serde(rename = "repeatingSchedule", default)]
    pub repeating_schedule: Option<RepeatingSchedule>,
}

impl Schedule {
    /// Strictly inside the start/end window and, if present, matching the repeat rule.
    pub fn is_valid(&self, now: NaiveDateTime) -> bool {
        if !(self.start_date < now && now < self.end_date) {
            return false;
        }
        match &self.repeating_schedule {
            Some(rule) => rule.is_valid(now),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RepeatKind {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatTime {
    pub hour: u32,
    pub minute: u32,
    /// 1 = Monday ... 7 = Sunday
    #[serde(rename = "dayOfWeek", default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u32>,
    #[serde(rename = "dayOfMonth", default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u32>,
    /// 1 = January ... 12 = December
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
}

impl RepeatTime {
    fn minute_of_day(&self) -> u32 {
        self.hour * 60 + self.minute
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatingSchedule {
    #[serde(rename = "type")]
    pub kind: RepeatKind,
    pub start: RepeatTime,
    pub end: RepeatTime,
}

impl RepeatingSchedule {
    pub fn is_valid(&self, now: NaiveDateTime) -> bool {
        if !self.contains_time_of_day(now) {
            return false;
        }

        match self.kind {
            RepeatKind::Daily => true,
            RepeatKind::Weekly => Some(now.weekday().number_from_monday()) == self.start.day_of_week,
            RepeatKind::Monthly => Some(now.day()) == self.start.day_of_month,
            RepeatKind::Yearly => {
                Some(now.month()) == self.start.month && Some(now.day()) == self.start.day_of_month
            }
        }
    }

    /// Inclusive on both ends. A window whose end precedes its start wraps past midnight.
    fn contains_time_of_day(&self, now: NaiveDateTime) -> bool {
        let current = now.hour() * 60 + now.minute();
        let start = self.start.minute_of_day();
        let end = self.end.minute_of_day();
        if start <= end {
            start <= current && current <= end
        } else {
            current >= start || current <= end
        }
    }
}

/// `yyyy-MM-dd HH:mm:ss` in device-local time.
pub mod schedule_date {
    use chrono::NaiveDateTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S>(date: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(raw.trim(), FORMAT).map_err(de::Error::custom)
    }
}
