use chrono::{DateTime, Local, Utc};
use tracing::{debug, info};

use super::OfferCache;
use crate::models::{Coordinate, GeoFence, Listing, ListingDelta, ScheduleId};
use crate::signals::{EngineSignal, Signals};

/// Movement threshold used before any listing has been fetched (half of 1 km).
const DEFAULT_MINIMUM_MOVEMENT_METERS: f64 = 500.0;

/// Current listing, if any.
#[derive(Debug)]
pub struct ListingStore {
    listing: Option<Listing>,
    dirty: bool,
    signals: Signals,
}

impl ListingStore {
    pub fn new(signals: Signals) -> Self {
        Self {
            listing: None,
            dirty: false,
            signals,
        }
    }

    pub fn restore(&mut self, listing: Option<Listing>) {
        self.listing = listing;
        self.dirty = false;
    }

    pub fn listing(&self) -> Option<&Listing> {
        self.listing.as_ref()
    }

    /// Swap in a freshly fetched listing and import its known deliveries.
    pub fn replace(&mut self, listing: Listing, offers: &mut OfferCache, now: DateTime<Utc>) {
        offers.append_delivered_schedules(
            &listing.delivered_schedules,
            |id| listing.delivered_at(id),
            now,
        );
        info!(
            campaigns = listing.campaigns.len(),
            regions = listing.all_regions().count(),
            schedules = listing.schedules.len(),
            "Listing replaced"
        );
        self.listing = Some(listing);
        self.dirty = true;
        self.signals.publish(EngineSignal::ListingUpdated);
    }

    pub fn regions_containing(&self, point: &Coordinate) -> Vec<GeoFence> {
        self.listing
            .as_ref()
            .map(|l| l.regions_containing(point))
            .unwrap_or_default()
    }

    pub fn all_regions(&self) -> Vec<GeoFence> {
        self.listing
            .as_ref()
            .map(|l| l.all_regions().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains_schedule(&self, schedule_id: ScheduleId) -> bool {
        self.listing
            .as_ref()
            .is_some_and(|l| l.contains_schedule(schedule_id))
    }

    /// Schedule dates are device-local, so `now` is compared in local time.
    pub fn is_schedule_valid(&self, schedule_id: ScheduleId, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&Local).naive_local();
        self.listing
            .as_ref()
            .is_some_and(|l| l.is_schedule_valid(schedule_id, local))
    }

    /// Returns false when there is no listing or no such campaign.
    pub fn redeem_coupon(&mut self, campaign_id: i64) -> bool {
        let Some(listing) = self.listing.as_mut() else {
            return false;
        };
        if !listing.redeem_coupon(campaign_id) {
            debug!(campaign_id, "Redeem for unknown campaign ignored");
            return false;
        }
        self.dirty = true;
        self.signals.publish(EngineSignal::ListingUpdated);
        true
    }

    pub fn minimum_movement_distance(&self) -> f64 {
        self.listing
            .as_ref()
            .map(|l| l.minimum_movement_distance())
            .unwrap_or(DEFAULT_MINIMUM_MOVEMENT_METERS)
    }

    /// Patch the listing from a push delta. No-op without a listing.
    pub fn apply_push_update(&mut self, delta: &ListingDelta) -> bool {
        let Some(listing) = self.listing.as_mut() else {
            debug!(schedule_id = delta.schedule_id, "No listing to patch, push update ignored");
            return false;
        };
        listing.apply_delta(delta);
        self.dirty = true;
        self.signals.publish(EngineSignal::ListingUpdated);
        true
    }

    pub fn clear(&mut self) {
        if self.listing.take().is_some() {
            self.dirty = true;
            self.signals.publish(EngineSignal::ListingUpdated);
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}
