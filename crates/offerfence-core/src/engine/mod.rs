//! Offer processing: the per-tick state machine, region selection for the OS
//! monitor, notification requests, and the async host service.

pub mod notifications;
pub mod processor;
pub mod regions;
pub mod service;

pub use notifications::{LogNotificationSender, NotificationRequest, NotificationSender};
pub use processor::{EngineStatus, ProcessReport, Processor};
pub use regions::{
    filter_and_reduce_crossed_regions, LogRegionMonitor, MonitoredRegion, RegionMonitor,
    MAX_MONITORED_REGIONS,
};
pub use service::{GeoOfferService, RegionEvent};
