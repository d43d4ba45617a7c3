//! Host service around the processor.
//!
//! Owns the collaborators (transport, persistence, region monitor, clock) and
//! serializes all engine mutation behind one async mutex. Network calls run
//! with the lock released; their completions re-lock before touching state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::notifications::NotificationSender;
use super::processor::{EngineStatus, ProcessReport, Processor};
use super::regions::{MonitoredRegion, RegionMonitor, MAX_MONITORED_REGIONS};
use crate::api::NetworkTransport;
use crate::cache::Persistence;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::EngineError;
use crate::models::{Coordinate, PushData, PushUpdate, TrackingBatch, TrackingEvent};
use crate::signals::{EngineSignal, Signals};

/// Region callback from the OS monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionEvent {
    Enter,
    Exit,
}

/// Clears an in-flight flag when dropped.
struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Clone is cheap; clones share the same engine.
#[derive(Clone)]
pub struct GeoOfferService {
    processor: Arc<Mutex<Processor>>,
    transport: Arc<dyn NetworkTransport>,
    persistence: Arc<dyn Persistence>,
    monitor: Arc<dyn RegionMonitor>,
    clock: Arc<dyn Clock>,
    signals: Signals,
    config: Arc<Config>,
    flush_in_flight: Arc<AtomicBool>,
    poll_in_flight: Arc<AtomicBool>,
    /// Location of a poll requested while another was running.
    poll_requested: Arc<std::sync::Mutex<Option<Coordinate>>>,
}

impl std::fmt::Debug for GeoOfferService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoOfferService")
            .field("device_id", &self.config.device_id)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl GeoOfferService {
    pub fn new(
        config: Config,
        transport: Arc<dyn NetworkTransport>,
        persistence: Arc<dyn Persistence>,
        sender: Arc<dyn NotificationSender>,
        monitor: Arc<dyn RegionMonitor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let signals = Signals::default();
        let processor = Processor::new(sender, signals.clone(), config.server_event_types.clone());
        Self {
            processor: Arc::new(Mutex::new(processor)),
            transport,
            persistence,
            monitor,
            clock,
            signals,
            config: Arc::new(config),
            flush_in_flight: Arc::new(AtomicBool::new(false)),
            poll_in_flight: Arc::new(AtomicBool::new(false)),
            poll_requested: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineSignal> {
        self.signals.subscribe()
    }

    pub async fn status(&self) -> EngineStatus {
        self.processor.lock().await.status()
    }

    /// Run `f` against the processor under the engine lock.
    pub async fn with_processor<R>(&self, f: impl FnOnce(&mut Processor) -> R) -> R {
        let mut processor = self.processor.lock().await;
        f(&mut processor)
    }

    // ===== Persistence =====

    /// Restore saved state. A missing or unreadable state file starts fresh.
    pub async fn load(&self) -> bool {
        match self.persistence.load() {
            Ok(Some(blob)) => {
                let mut processor = self.processor.lock().await;
                processor.restore(blob);
                let status = processor.status();
                info!(
                    delivered = status.delivered,
                    pending = status.pending_offers,
                    queued_events = status.queued_events,
                    "Restored engine state"
                );
                true
            }
            Ok(None) => {
                debug!("No saved engine state");
                false
            }
            Err(e) => {
                warn!(error = %e, "Saved engine state unreadable, starting fresh");
                false
            }
        }
    }

    pub async fn save(&self) -> Result<(), EngineError> {
        let mut processor = self.processor.lock().await;
        self.persistence.save(&processor.snapshot())?;
        processor.mark_clean();
        debug!("Saved engine state");
        Ok(())
    }

    /// Save only if some cache changed. Returns whether a save happened.
    pub async fn save_if_dirty(&self) -> Result<bool, EngineError> {
        let mut processor = self.processor.lock().await;
        if !processor.is_dirty() {
            return Ok(false);
        }
        self.persistence.save(&processor.snapshot())?;
        processor.mark_clean();
        debug!("Saved engine state");
        Ok(true)
    }

    /// App moved to the background.
    pub async fn on_background(&self) {
        if let Err(e) = self.save().await {
            error!(error = %e, "Failed to save engine state");
        }
    }

    /// Forget all engine state and persist the empty state.
    pub async fn reset(&self) -> Result<(), EngineError> {
        self.processor.lock().await.clear();
        self.monitor.stop_monitoring_all();
        self.save().await
    }

    // ===== Location =====

    /// New device location: refresh the listing if due, process, re-pick
    /// monitored regions and upload queued events.
    pub async fn on_location_update(&self, location: Coordinate) -> ProcessReport {
        let refresh_due = {
            let mut processor = self.processor.lock().await;
            processor.set_last_location(location);
            // Moving past half the catchment also leaves the listing's coverage
            let min_distance = self
                .config
                .min_refresh_distance_m
                .min(processor.minimum_movement_distance());
            processor.should_refresh(
                &location,
                self.clock.now(),
                Duration::seconds(self.config.min_refresh_wait_secs as i64),
                min_distance,
            )
        };
        if refresh_due {
            if let Err(e) = self.retrieve_nearby_offers(location).await {
                warn!(error = %e, "Nearby offers refresh failed");
            }
        }

        let report = self.process_at(location).await;
        self.update_monitoring(location).await;
        if let Err(e) = self.flush_tracking().await {
            warn!(error = %e, "Tracking upload failed, events kept for retry");
        }
        report
    }

    pub async fn process_at(&self, location: Coordinate) -> ProcessReport {
        let now = self.clock.now();
        self.processor.lock().await.process(&location, now)
    }

    /// Periodic tick: re-run processing at the last known location so dwell
    /// and delivery delays fire without a new fix.
    pub async fn tick(&self) -> Option<ProcessReport> {
        let mut processor = self.processor.lock().await;
        let location = processor.last_location()?;
        Some(processor.process(&location, self.clock.now()))
    }

    /// One background tick: process, then upload whatever is queued,
    /// including events left behind by an earlier failed upload.
    pub async fn run_tick(&self) -> Option<ProcessReport> {
        let report = self.tick().await;
        if self.processor.lock().await.has_cached_events() {
            if let Err(e) = self.flush_tracking().await {
                warn!(error = %e, "Tracking upload failed, events kept for retry");
            }
        }
        report
    }

    /// OS region monitor callback. Falls back to the region center when no
    /// fix has been seen yet.
    pub async fn on_region_event(&self, identifier: &str, event: RegionEvent) -> ProcessReport {
        let now = self.clock.now();
        let mut processor = self.processor.lock().await;
        let location = match processor
            .last_location()
            .or_else(|| processor.region_by_key(identifier).map(|r| r.center()))
        {
            Some(location) => location,
            None => {
                warn!(identifier, "Region event for unknown region");
                return ProcessReport::default();
            }
        };

        match event {
            RegionEvent::Enter => {
                debug!(identifier, "Region enter reported");
                processor.handle_region_enter(identifier);
                processor.process(&location, now)
            }
            RegionEvent::Exit => {
                debug!(identifier, "Region exit reported");
                let mut report = ProcessReport::default();
                if processor.handle_region_exit(identifier, &location, now) {
                    if let Some(region) = processor.region_by_key(identifier) {
                        report.exited.push(region.schedule_id);
                    }
                }
                report
            }
        }
    }

    // ===== Region monitoring =====

    pub async fn update_monitoring(&self, location: Coordinate) {
        if !self.monitor.has_permission() {
            debug!("No location permission, not monitoring regions");
            self.monitor.stop_monitoring_all();
            return;
        }

        let max = self.config.max_monitored_regions.min(MAX_MONITORED_REGIONS);
        let regions: Vec<MonitoredRegion> = {
            let processor = self.processor.lock().await;
            processor
                .regions_to_monitor(&location, self.clock.now(), max)
                .iter()
                .map(MonitoredRegion::from)
                .collect()
        };

        if regions.is_empty() {
            self.monitor.stop_monitoring_all();
            return;
        }
        if let Err(e) = self.monitor.start_monitoring(&regions) {
            warn!(error = %e, "Region monitoring failed, stopping all");
            self.monitor.stop_monitoring_all();
        }
    }

    pub fn stop_monitoring(&self) {
        self.monitor.stop_monitoring_all();
    }

    // ===== Network =====

    /// Poll the backend for the listing around `location`.
    ///
    /// Only one poll runs at a time. A call made while one is running is
    /// queued and the running poll repeats once for the latest location.
    pub async fn retrieve_nearby_offers(&self, location: Coordinate) -> Result<(), EngineError> {
        // Queue first: whoever holds the flag checks the queue after releasing it
        *self.requested_poll() = Some(location);
        loop {
            let Some(guard) = InFlight::acquire(&self.poll_in_flight) else {
                debug!("Poll already in flight, coalescing");
                return Ok(());
            };

            loop {
                let next = self.requested_poll().take();
                match next {
                    Some(location) => self.poll_once(location).await?,
                    None => break,
                }
            }

            drop(guard);
            if self.requested_poll().is_none() {
                return Ok(());
            }
        }
    }

    async fn poll_once(&self, location: Coordinate) -> Result<(), EngineError> {
        info!(%location, "Polling nearby offers");
        let body = self
            .transport
            .poll_nearby_offers(location.latitude, location.longitude)
            .await?;

        let mut processor = self.processor.lock().await;
        if let Err(e) =
            processor.apply_poll_response(&body, &self.config.device_id, &location, self.clock.now())
        {
            warn!(error = %e, "Dropping malformed listing");
        }
        Ok(())
    }

    fn requested_poll(&self) -> std::sync::MutexGuard<'_, Option<Coordinate>> {
        self.poll_requested.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_polling(&self) -> bool {
        self.poll_in_flight.load(Ordering::Acquire)
    }

    pub fn is_flushing(&self) -> bool {
        self.flush_in_flight.load(Ordering::Acquire)
    }

    /// Upload queued tracking events in batches until the outbox is empty.
    ///
    /// Returns the number of events sent. If a flush is already running this
    /// returns `Ok(0)` and leaves the events to it. A batch that failed for a
    /// transient or credentials reason goes back to the front of the outbox;
    /// one the backend rejected outright is dropped.
    pub async fn flush_tracking(&self) -> Result<usize, EngineError> {
        let mut sent = 0;
        loop {
            let Some(guard) = InFlight::acquire(&self.flush_in_flight) else {
                debug!("Tracking upload already in flight");
                break;
            };
            sent += self.drain_outbox().await?;
            drop(guard);

            // Events queued after the last pop but before the flag cleared
            if !self.processor.lock().await.has_cached_events() {
                break;
            }
        }

        if sent > 0 {
            info!(count = sent, "Uploaded tracking events");
        }
        Ok(sent)
    }

    async fn drain_outbox(&self) -> Result<usize, EngineError> {
        let batch_size = self.config.tracking_batch_size.max(1);
        let timezone = self.config.timezone_label();
        let mut sent = 0;
        loop {
            let events = self.processor.lock().await.pop_tracking_batch(batch_size);
            if events.is_empty() {
                return Ok(sent);
            }

            let batch = TrackingBatch {
                device_id: self.config.device_id.clone(),
                timezone: timezone.clone(),
                events,
            };
            match self.transport.track_events(&batch).await {
                Ok(()) => {
                    sent += batch.events.len();
                    debug!(count = batch.events.len(), "Tracking batch uploaded");
                }
                Err(e) => {
                    let err = EngineError::from(e);
                    let count = batch.events.len();
                    if err.is_transient() || err.is_auth_failure() {
                        warn!(error = %err, count, "Tracking batch failed, requeued");
                        self.processor
                            .lock()
                            .await
                            .requeue_tracking_batch(batch.events);
                    } else {
                        error!(error = %err, count, "Tracking batch rejected by backend, dropped");
                    }
                    return Err(err);
                }
            }
        }
    }

    // ===== Push & user actions =====

    /// Feed a raw push payload (one portion of a possibly split message).
    pub async fn handle_push_payload(&self, payload: &str) -> Result<Option<PushUpdate>, EngineError> {
        let part: PushData = serde_json::from_str(payload).inspect_err(|e| {
            warn!(error = %e, "Dropping malformed push payload");
        })?;
        let now = self.clock.now();
        let update = self.processor.lock().await.handle_push(part, now)?;

        if matches!(update, Some(PushUpdate::Listing(_))) {
            let location = self.processor.lock().await.last_location();
            if let Some(location) = location {
                self.update_monitoring(location).await;
            }
        }
        Ok(update)
    }

    pub async fn redeem_coupon(&self, campaign_id: i64) -> bool {
        let redeemed = self.processor.lock().await.redeem_coupon(campaign_id);
        if !redeemed {
            debug!(campaign_id, "Redeem for unknown campaign ignored");
        }
        redeemed
    }

    pub async fn track(&self, event: TrackingEvent) {
        self.processor.lock().await.track(event);
    }

    // ===== Background tasks =====

    /// Start the periodic tick and save loops. Abort the handles to stop them.
    pub fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let tick_every = StdDuration::from_secs(self.config.tick_interval_secs.max(1));
        let save_every = StdDuration::from_secs(self.config.save_period_secs.max(1));

        let service = self.clone();
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_every);
            loop {
                interval.tick().await;
                service.run_tick().await;
            }
        });

        let service = self.clone();
        let saver = tokio::spawn(async move {
            let mut interval = tokio::time::interval(save_every);
            loop {
                interval.tick().await;
                if let Err(e) = service.save_if_dirty().await {
                    error!(error = %e, "Periodic save failed");
                }
            }
        });

        vec![ticker, saver]
    }
}
