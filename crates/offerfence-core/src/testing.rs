//! Fixtures and recording collaborators shared by the unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tokio::sync::Notify;

use crate::api::{ApiError, NetworkTransport};
use crate::engine::{MonitoredRegion, NotificationRequest, NotificationSender, RegionMonitor};
use crate::error::EngineError;
use crate::models::{Campaign, GeoFence, Listing, Offer, Schedule, TrackingBatch};

/// Fixed test instant: Wednesday 2024-01-03 09:15 UTC.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 3, 9, 15, 0).unwrap()
}

/// Region centered on the default test location (51.5, -0.12), 500 m radius.
pub fn region(schedule_id: i64, dwell_ms: u64, delivery_ms: u64) -> GeoFence {
    let mut r = region_at(schedule_id, 51.5, -0.12, 0.5);
    r.dwell_delay_ms = dwell_ms;
    r.delivery_delay_ms = delivery_ms;
    r
}

pub fn region_at(schedule_id: i64, latitude: f64, longitude: f64, radius_km: f64) -> GeoFence {
    GeoFence {
        logo_image_url: String::new(),
        schedule_id,
        device_key: format!("dev-{}", schedule_id),
        latitude,
        longitude,
        radius_km,
        notification_title: format!("Offer {}", schedule_id),
        notification_message: "Tap to view".to_string(),
        dwell_delay_ms: 0,
        delivery_delay_ms: 0,
        does_not_notify: false,
        notifies_silently: false,
    }
}

/// Listing with one campaign (same id as the schedule) and an always-valid
/// offer run per region.
pub fn listing_with(regions: Vec<GeoFence>) -> Listing {
    let start = NaiveDate::from_ymd_opt(2000, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let end = NaiveDate::from_ymd_opt(2099, 12, 31)
        .unwrap()
        .and_hms_opt(23, 59, 59)
        .unwrap();

    let mut campaigns = BTreeMap::new();
    let mut by_schedule: BTreeMap<String, Vec<GeoFence>> = BTreeMap::new();
    let mut schedules = Vec::new();
    for region in regions {
        let id = region.schedule_id;
        campaigns.insert(
            id.to_string(),
            Campaign {
                campaign_id: id,
                offer: Offer {
                    is_redeemed: Some(false),
                    schedule_id: Some(id),
                    device_uid: Some(region.device_key.clone()),
                    ..Offer::default()
                },
                extra: serde_json::Map::new(),
            },
        );
        schedules.push(Schedule {
            schedule_id: id,
            campaign_id: id,
            start_date: start,
            end_date: end,
            repeating_schedule: None,
        });
        by_schedule.entry(id.to_string()).or_default().push(region);
    }

    Listing {
        client_id: 1,
        catchment_radius_km: 1.0,
        campaigns,
        regions: by_schedule,
        schedules,
        schedule_device_ids: Vec::new(),
        campaign_id: None,
        delivered_schedules: Vec::new(),
    }
}

#[derive(Debug)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<NotificationRequest>>,
    pub removed: Mutex<Vec<String>>,
    pub permission: AtomicBool,
}

impl Default for RecordingSender {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            permission: AtomicBool::new(true),
        }
    }
}

impl RecordingSender {
    pub fn sent_ids(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.identifier.clone())
            .collect()
    }

    pub fn removed_ids(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

impl NotificationSender for RecordingSender {
    fn send(&self, request: &NotificationRequest) {
        self.sent.lock().unwrap().push(request.clone());
    }

    fn remove(&self, identifier: &str) {
        self.removed.lock().unwrap().push(identifier.to_string());
    }

    fn has_permission(&self) -> bool {
        self.permission.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct RecordingMonitor {
    pub monitored: Mutex<Vec<MonitoredRegion>>,
    pub stop_calls: AtomicUsize,
    pub permission: AtomicBool,
    pub fail: AtomicBool,
}

impl Default for RecordingMonitor {
    fn default() -> Self {
        Self {
            monitored: Mutex::new(Vec::new()),
            stop_calls: AtomicUsize::new(0),
            permission: AtomicBool::new(true),
            fail: AtomicBool::new(false),
        }
    }
}

impl RecordingMonitor {
    pub fn monitored_ids(&self) -> Vec<String> {
        self.monitored
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.identifier.clone())
            .collect()
    }
}

impl RegionMonitor for RecordingMonitor {
    fn has_permission(&self) -> bool {
        self.permission.load(Ordering::SeqCst)
    }

    fn start_monitoring(&self, regions: &[MonitoredRegion]) -> Result<(), EngineError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::Config("monitoring unavailable".to_string()));
        }
        *self.monitored.lock().unwrap() = regions.to_vec();
        Ok(())
    }

    fn stop_monitoring_all(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.monitored.lock().unwrap().clear();
    }
}

/// Transport that replays scripted results. Unscripted calls succeed
/// (polls return `default_listing`, or an error if none is set).
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    pub poll_results: Mutex<VecDeque<Result<String, ApiError>>>,
    pub track_results: Mutex<VecDeque<Result<(), ApiError>>>,
    pub default_listing: Mutex<Option<String>>,
    pub batches: Mutex<Vec<TrackingBatch>>,
    pub poll_calls: AtomicUsize,
    pub polled_at: Mutex<Vec<(f64, f64)>>,
    /// When set, polls wait for a notification before completing.
    pub poll_gate: Option<Arc<Notify>>,
    /// When set, uploads wait for a notification before completing.
    pub track_gate: Option<Arc<Notify>>,
}

impl ScriptedTransport {
    pub fn with_listing(listing: &Listing) -> Self {
        let transport = Self::default();
        *transport.default_listing.lock().unwrap() = Some(serde_json::to_string(listing).unwrap());
        transport
    }

    pub fn push_track_result(&self, result: Result<(), ApiError>) {
        self.track_results.lock().unwrap().push_back(result);
    }

    pub fn push_poll_result(&self, result: Result<String, ApiError>) {
        self.poll_results.lock().unwrap().push_back(result);
    }

    pub fn sent_batches(&self) -> Vec<TrackingBatch> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl NetworkTransport for ScriptedTransport {
    async fn poll_nearby_offers(&self, latitude: f64, longitude: f64) -> Result<String, ApiError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        self.polled_at.lock().unwrap().push((latitude, longitude));
        if let Some(gate) = &self.poll_gate {
            gate.notified().await;
        }
        let scripted = self.poll_results.lock().unwrap().pop_front();
        match scripted {
            Some(result) => result,
            None => self
                .default_listing
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| ApiError::NotFound("no listing scripted".to_string())),
        }
    }

    async fn track_events(&self, batch: &TrackingBatch) -> Result<(), ApiError> {
        if let Some(gate) = &self.track_gate {
            gate.notified().await;
        }
        let result = self
            .track_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()));
        if result.is_ok() {
            self.batches.lock().unwrap().push(batch.clone());
        }
        result
    }
}
