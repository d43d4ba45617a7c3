//! The geofence/offer state machine.
//!
//! Per schedule the engine moves `Unseen -> pending dwell -> (pending delivery)
//! -> delivered`, with a separate "inside region" flag kept by the
//! entered-region cache. `process` runs one tick of that machine for the
//! current location; the host service serializes every call behind a mutex.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::notifications::{NotificationRequest, NotificationSender};
use super::regions::filter_and_reduce_crossed_regions;
use crate::cache::{
    CacheBlob, EnteredRegionCache, ListingStore, OfferCache, PendingNotificationCache,
    PendingOutcome, PushMessageCache, TrackingOutbox,
};
use crate::error::EngineError;
use crate::models::{
    Coordinate, DeliveredOffer, EnteredRegionRecord, GeoFence, Listing, PendingNotification,
    PendingOffer, PushData, PushUpdate, ScheduleId, TrackingEvent, TrackingEventType,
};
use crate::signals::Signals;

/// What one `process` call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub entered: Vec<ScheduleId>,
    pub exited: Vec<ScheduleId>,
    /// Dwell satisfied this tick.
    pub dwelled: Vec<ScheduleId>,
    pub delivered: Vec<ScheduleId>,
    pub notified: Vec<ScheduleId>,
    /// Entered-region records dropped because their schedule left the listing.
    pub pruned: usize,
}

impl ProcessReport {
    pub fn is_empty(&self) -> bool {
        self.entered.is_empty()
            && self.exited.is_empty()
            && self.dwelled.is_empty()
            && self.delivered.is_empty()
            && self.notified.is_empty()
            && self.pruned == 0
    }
}

/// Counts for status displays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStatus {
    pub has_listing: bool,
    pub regions: usize,
    pub delivered: usize,
    pub pending_offers: usize,
    pub entered_regions: usize,
    pub pending_notifications: usize,
    pub queued_events: usize,
}

/// Where and when the listing was last fetched.
#[derive(Debug, Clone, Copy, PartialEq)]
struct RefreshMark {
    at: DateTime<Utc>,
    location: Coordinate,
}

pub struct Processor {
    listing: ListingStore,
    offers: OfferCache,
    entered: EnteredRegionCache,
    notifications: PendingNotificationCache,
    outbox: TrackingOutbox,
    push_messages: PushMessageCache,
    sender: Arc<dyn NotificationSender>,
    last_refresh: Option<RefreshMark>,
    last_location: Option<Coordinate>,
    /// Regions the OS reported leaving since the last fresh fix. The stored
    /// fix may still sit inside them, so entry detection skips them.
    exited_since_fix: HashSet<ScheduleId>,
    refresh_dirty: bool,
}

impl Processor {
    pub fn new(
        sender: Arc<dyn NotificationSender>,
        signals: Signals,
        server_event_types: impl IntoIterator<Item = TrackingEventType>,
    ) -> Self {
        Self {
            listing: ListingStore::new(signals.clone()),
            offers: OfferCache::new(signals),
            entered: EnteredRegionCache::new(),
            notifications: PendingNotificationCache::new(),
            outbox: TrackingOutbox::new(server_event_types),
            push_messages: PushMessageCache::new(),
            sender,
            last_refresh: None,
            last_location: None,
            exited_since_fix: HashSet::new(),
            refresh_dirty: false,
        }
    }

    // ===== Processing =====

    /// Run one tick for `location`. Sweeps run before exit/entry detection so
    /// a region that expires and is re-entered in the same tick fires once.
    pub fn process(&mut self, location: &Coordinate, now: DateTime<Utc>) -> ProcessReport {
        let mut report = ProcessReport::default();
        self.last_location = Some(*location);

        let containing = self.listing.regions_containing(location);
        let inside: HashSet<ScheduleId> = containing.iter().map(|r| r.schedule_id).collect();

        self.sweep_dwell(location, &inside, now, &mut report);
        self.sweep_delivery(now, &mut report);
        self.detect_exits(location, &inside, now, &mut report);
        self.detect_entries(location, &containing, now, &mut report);
        self.prune_stale(&mut report);

        if !report.is_empty() {
            debug!(?report, "Processed location");
        }
        report
    }

    fn sweep_dwell(
        &mut self,
        location: &Coordinate,
        inside: &HashSet<ScheduleId>,
        now: DateTime<Utc>,
        report: &mut ProcessReport,
    ) {
        for pending in self.offers.pending_offers() {
            if !pending.dwell_elapsed(now) {
                continue;
            }
            let id = pending.schedule_id();
            if !inside.contains(&id) {
                debug!(schedule_id = id, "Left region before dwell completed");
                self.offers.remove_pending_offer(id);
                continue;
            }

            info!(schedule_id = id, "Dwell satisfied");
            self.outbox.add(TrackingEvent::for_region(
                TrackingEventType::GeofenceDwell,
                &pending.region,
                location,
                now,
            ));
            report.dwelled.push(id);
            self.deliver(&pending.region, location, now, report);
        }
    }

    fn sweep_delivery(&mut self, now: DateTime<Utc>, report: &mut ProcessReport) {
        for id in self.notifications.due(now) {
            if let Some(pending) = self.notifications.remove(id) {
                self.notify(&pending.region, report);
            }
        }
    }

    fn detect_exits(
        &mut self,
        location: &Coordinate,
        inside: &HashSet<ScheduleId>,
        now: DateTime<Utc>,
        report: &mut ProcessReport,
    ) {
        for record in self.entered.all() {
            let id = record.schedule_id();
            if !inside.contains(&id) {
                self.exit_region(&record, location, now);
                report.exited.push(id);
            }
        }
    }

    fn exit_region(&mut self, record: &EnteredRegionRecord, location: &Coordinate, now: DateTime<Utc>) {
        let id = record.schedule_id();
        info!(schedule_id = id, "Exited region");
        self.entered.remove(id);
        self.outbox.add(TrackingEvent::for_region(
            TrackingEventType::GeofenceExit,
            &record.region,
            location,
            now,
        ));
        // Dwell was not satisfied; the offer has to be earned again on re-entry
        if self.offers.remove_pending_offer(id).is_some() {
            self.sender.remove(&id.to_string());
        }
    }

    fn detect_entries(
        &mut self,
        location: &Coordinate,
        containing: &[GeoFence],
        now: DateTime<Utc>,
        report: &mut ProcessReport,
    ) {
        for region in containing {
            let id = region.schedule_id;
            if self.entered.exists(id) || !self.listing.is_schedule_valid(id, now) {
                continue;
            }
            if self.exited_since_fix.contains(&id) {
                debug!(schedule_id = id, "Region exited by OS callback, waiting for a fresh fix");
                continue;
            }

            info!(schedule_id = id, "Entered region");
            self.entered.add(region, now);
            self.outbox.add(TrackingEvent::for_region(
                TrackingEventType::GeofenceEntry,
                region,
                location,
                now,
            ));
            report.entered.push(id);

            if self.offers.add_pending_offer(region, now) == PendingOutcome::DeliverNow {
                self.deliver(region, location, now, report);
            }
        }
    }

    fn prune_stale(&mut self, report: &mut ProcessReport) {
        if self.listing.listing().is_none() {
            return;
        }
        let listing = &self.listing;
        report.pruned = self
            .entered
            .retain(|record| listing.contains_schedule(record.schedule_id()));
        if report.pruned > 0 {
            debug!(count = report.pruned, "Pruned entered regions no longer in listing");
        }

        for pending in self.offers.pending_offers() {
            if !self.listing.contains_schedule(pending.schedule_id()) {
                self.offers.remove_pending_offer(pending.schedule_id());
            }
        }
    }

    /// Mark delivered, then notify now or after the delivery delay.
    fn deliver(
        &mut self,
        region: &GeoFence,
        location: &Coordinate,
        now: DateTime<Utc>,
        report: &mut ProcessReport,
    ) {
        let id = region.schedule_id;
        if !self.offers.add_offer(region, now) {
            return;
        }
        info!(schedule_id = id, delivery_delay_ms = region.delivery_delay_ms, "Offer delivered");
        self.outbox.add(TrackingEvent::for_region(
            TrackingEventType::Delivered,
            region,
            location,
            now,
        ));
        report.delivered.push(id);

        if region.delivery_delay_ms == 0 {
            self.notify(region, report);
        } else {
            self.notifications.add(region, now);
        }
    }

    fn notify(&mut self, region: &GeoFence, report: &mut ProcessReport) {
        let Some(request) = NotificationRequest::for_region(region) else {
            debug!(schedule_id = region.schedule_id, "Notification suppressed for region");
            return;
        };
        if !self.sender.has_permission() {
            debug!(schedule_id = region.schedule_id, "No notification permission, skipping send");
            return;
        }
        self.sender.send(&request);
        report.notified.push(region.schedule_id);
    }

    /// OS reported leaving the region with geofence key `identifier`.
    ///
    /// The region is not re-entered from the stored fix; only a new location
    /// update or an OS enter callback can enter it again.
    pub fn handle_region_exit(
        &mut self,
        identifier: &str,
        location: &Coordinate,
        now: DateTime<Utc>,
    ) -> bool {
        let record = self
            .entered
            .all()
            .into_iter()
            .find(|r| r.region.key() == identifier);
        if let Some(region) = record
            .as_ref()
            .map(|r| r.region.clone())
            .or_else(|| self.region_by_key(identifier))
        {
            self.exited_since_fix.insert(region.schedule_id);
        }
        match record {
            Some(record) => {
                self.exit_region(&record, location, now);
                true
            }
            None => {
                debug!(identifier, "Exit for a region not entered");
                false
            }
        }
    }

    /// OS reported entering the region with geofence key `identifier`.
    pub fn handle_region_enter(&mut self, identifier: &str) -> Option<GeoFence> {
        let region = self.region_by_key(identifier)?;
        self.exited_since_fix.remove(&region.schedule_id);
        Some(region)
    }

    pub fn region_by_key(&self, identifier: &str) -> Option<GeoFence> {
        self.listing
            .all_regions()
            .into_iter()
            .find(|r| r.key() == identifier)
    }

    /// Regions worth watching: valid schedule, not yet delivered, nearest first.
    pub fn regions_to_monitor(
        &self,
        location: &Coordinate,
        now: DateTime<Utc>,
        max: usize,
    ) -> Vec<GeoFence> {
        let candidates: Vec<GeoFence> = self
            .listing
            .all_regions()
            .into_iter()
            .filter(|r| !self.offers.has_offer_already(r.schedule_id))
            .filter(|r| self.listing.is_schedule_valid(r.schedule_id, now))
            .collect();
        filter_and_reduce_crossed_regions(&candidates, location, max)
    }

    // ===== Listing =====

    /// Whether a new nearby-offers poll is due: never polled, waited long
    /// enough, or moved far enough since the last one.
    pub fn should_refresh(
        &self,
        location: &Coordinate,
        now: DateTime<Utc>,
        min_wait: Duration,
        min_distance_m: f64,
    ) -> bool {
        match self.last_refresh {
            None => true,
            Some(mark) => {
                (now - mark.at).abs() > min_wait || mark.location.distance_to(location) >= min_distance_m
            }
        }
    }

    pub fn last_refresh_at(&self) -> Option<DateTime<Utc>> {
        self.last_refresh.map(|m| m.at)
    }

    fn record_refresh(&mut self, location: &Coordinate, now: DateTime<Utc>) {
        self.last_refresh = Some(RefreshMark {
            at: now,
            location: *location,
        });
        self.refresh_dirty = true;
    }

    /// Apply a successful poll. A body that does not decode is dropped, but
    /// the poll still counts as a refresh so a broken payload is not refetched
    /// in a tight loop.
    pub fn apply_poll_response(
        &mut self,
        json: &str,
        device_id: &str,
        location: &Coordinate,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.record_refresh(location, now);
        self.outbox.add(TrackingEvent::polled(device_id, location, now));
        let listing: Listing = serde_json::from_str(json)?;
        self.replace_listing(listing, now);
        Ok(())
    }

    pub fn replace_listing(&mut self, listing: Listing, now: DateTime<Utc>) {
        self.listing.replace(listing, &mut self.offers, now);
    }

    pub fn listing(&self) -> Option<&Listing> {
        self.listing.listing()
    }

    pub fn minimum_movement_distance(&self) -> f64 {
        self.listing.minimum_movement_distance()
    }

    pub fn redeem_coupon(&mut self, campaign_id: i64) -> bool {
        self.listing.redeem_coupon(campaign_id)
    }

    // ===== Push =====

    /// Feed one push portion. Returns the decoded update once the message is complete.
    pub fn handle_push(
        &mut self,
        part: PushData,
        now: DateTime<Utc>,
    ) -> Result<Option<PushUpdate>, EngineError> {
        self.push_messages.clean_up(now);
        let Some(json) = self.push_messages.add(part) else {
            return Ok(None);
        };

        let update = PushUpdate::from_json(&json)?;
        match &update {
            PushUpdate::CouponRedeemed { campaign_id } => {
                info!(campaign_id, "Coupon redeemed by push");
                self.listing.redeem_coupon(*campaign_id);
            }
            PushUpdate::Listing(delta) => {
                info!(schedule_id = delta.schedule_id, kind = %delta.kind, "Listing patched by push");
                self.listing.apply_push_update(delta);
            }
        }
        Ok(Some(update))
    }

    // ===== Tracking =====

    pub fn track(&mut self, event: TrackingEvent) {
        self.outbox.add(event);
    }

    pub fn has_cached_events(&self) -> bool {
        self.outbox.has_cached_events()
    }

    pub fn pop_tracking_batch(&mut self, max: usize) -> Vec<TrackingEvent> {
        self.outbox.pop_cached_events(max)
    }

    pub fn requeue_tracking_batch(&mut self, batch: Vec<TrackingEvent>) {
        self.outbox.requeue_front(batch);
    }

    pub fn queued_events(&self) -> Vec<TrackingEvent> {
        self.outbox.events()
    }

    // ===== Queries =====

    pub fn has_offer_already(&self, schedule_id: ScheduleId) -> bool {
        self.offers.has_offer_already(schedule_id)
    }

    pub fn offers(&self) -> Vec<DeliveredOffer> {
        self.offers.offers()
    }

    pub fn pending_offers(&self) -> Vec<PendingOffer> {
        self.offers.pending_offers()
    }

    pub fn entered_regions(&self) -> Vec<EnteredRegionRecord> {
        self.entered.all()
    }

    pub fn pending_notifications(&self) -> Vec<PendingNotification> {
        self.notifications.pending_notifications()
    }

    pub fn last_location(&self) -> Option<Coordinate> {
        self.last_location
    }

    /// Record a fresh fix from the platform.
    pub fn set_last_location(&mut self, location: Coordinate) {
        self.last_location = Some(location);
        self.exited_since_fix.clear();
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            has_listing: self.listing.listing().is_some(),
            regions: self.listing.all_regions().len(),
            delivered: self.offers.offers().len(),
            pending_offers: self.offers.pending_offers().len(),
            entered_regions: self.entered.all().len(),
            pending_notifications: self.notifications.pending_notifications().len(),
            queued_events: self.outbox.len(),
        }
    }

    // ===== Persistence =====

    pub fn is_dirty(&self) -> bool {
        self.listing.is_dirty()
            || self.offers.is_dirty()
            || self.entered.is_dirty()
            || self.notifications.is_dirty()
            || self.outbox.is_dirty()
            || self.push_messages.is_dirty()
            || self.refresh_dirty
    }

    pub fn mark_clean(&mut self) {
        self.listing.mark_clean();
        self.offers.mark_clean();
        self.entered.mark_clean();
        self.notifications.mark_clean();
        self.outbox.mark_clean();
        self.push_messages.mark_clean();
        self.refresh_dirty = false;
    }

    pub fn snapshot(&self) -> CacheBlob {
        CacheBlob {
            listing: self.listing.listing().cloned(),
            delivered_offers: self.offers.offers(),
            pending_offers: self.offers.pending_offers(),
            entered_regions: self.entered.all(),
            pending_notifications: self.notifications.pending_notifications(),
            tracking_events: self.outbox.events(),
            push_messages: self.push_messages.all(),
            last_refresh_at: self.last_refresh.map(|m| m.at),
            last_refresh_location: self.last_refresh.map(|m| m.location),
        }
    }

    pub fn restore(&mut self, blob: CacheBlob) {
        self.listing.restore(blob.listing);
        self.offers.restore(blob.pending_offers, blob.delivered_offers);
        self.entered.restore(blob.entered_regions);
        self.notifications.restore(blob.pending_notifications);
        self.outbox.restore(blob.tracking_events);
        self.push_messages.restore(blob.push_messages);
        self.last_refresh = match (blob.last_refresh_at, blob.last_refresh_location) {
            (Some(at), Some(location)) => Some(RefreshMark { at, location }),
            _ => None,
        };
        self.refresh_dirty = false;
    }

    /// Forget everything, including the delivered set.
    pub fn clear(&mut self) {
        warn!("Clearing all engine state");
        self.listing.clear();
        self.offers.clear();
        self.entered.clear();
        self.notifications.clear();
        self.outbox.clear();
        self.push_messages.restore(Vec::new());
        self.exited_since_fix.clear();
        self.last_refresh = None;
        self.refresh_dirty = true;
    }
}
