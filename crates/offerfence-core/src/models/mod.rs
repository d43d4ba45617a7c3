//! Data models for the geofence offer backend.
//!
//! This module contains the wire-compatible structures exchanged with the
//! backend and the records the engine keeps in its caches:
//!
//! - `Listing`, `Campaign`, `Offer`: the catalog returned by a nearby-offers poll
//! - `GeoFence`: a circular region tied to a schedule
//! - `Schedule`, `RepeatingSchedule`: when a campaign's offer is deliverable
//! - `TrackingEvent`, `TrackingBatch`: analytics events and their upload envelope
//! - `PushData`, `PushUpdate`: split push messages and the deltas they carry
//! - `CacheItem`, `DeliveredOffer`: engine cache records

pub mod geofence;
pub mod listing;
pub mod offer;
pub mod point;
pub mod push;
pub mod schedule;
pub mod tracking;

/// Backend schedule identifier (`rewardScheduleId` / `scheduleId`).
pub type ScheduleId = i64;

pub use geofence::GeoFence;
pub use listing::{Campaign, DeliveredSchedule, Listing, Offer};
pub use offer::{CacheItem, DeliveredOffer, EnteredRegionRecord, PendingNotification, PendingOffer};
pub use point::Coordinate;
pub use push::{ListingDelta, PushData, PushUpdate};
pub use schedule::{RepeatKind, RepeatTime, RepeatingSchedule, Schedule};
pub use tracking::{TrackingBatch, TrackingEvent, TrackingEventType};
