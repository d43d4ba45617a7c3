//! offerfence core - geofence offer engine.
//!
//! Tracks a user's position against campaign geofences, decides when an
//! offer has been earned (entry, dwell, delivery delay), de-duplicates
//! deliveries, and reports tracking events to the backend through an
//! outbox that survives network failures and restarts.
//!
//! The layout follows the data flow:
//! - `models`: wire-compatible listing, geofence, schedule and event types
//! - `cache`: listing store, offer/region/notification caches, outbox, persistence
//! - `engine`: the processing state machine and the host service around it
//! - `api`: HTTP transport to the backend

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod signals;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ApiError, NetworkTransport};
pub use cache::{CacheBlob, JsonFilePersistence, MemoryPersistence, Persistence};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use engine::{
    EngineStatus, GeoOfferService, LogNotificationSender, LogRegionMonitor, NotificationRequest,
    NotificationSender, ProcessReport, Processor, RegionEvent, RegionMonitor,
};
pub use error::EngineError;
pub use models::{Coordinate, GeoFence, Listing, ScheduleId, TrackingEvent, TrackingEventType};
pub use signals::{EngineSignal, Signals};
