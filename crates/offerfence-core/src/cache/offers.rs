use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::KeyedStore;
use crate::models::{DeliveredOffer, DeliveredSchedule, GeoFence, PendingOffer, ScheduleId};
use crate::signals::{EngineSignal, Signals};

/// Result of `OfferCache::add_pending_offer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOutcome {
    /// Already pending or already delivered; nothing changed.
    AlreadyKnown,
    /// Waiting for the dwell delay.
    Pending,
    /// No dwell delay. Nothing was stored; the caller delivers the offer.
    DeliverNow,
}

/// Pending and delivered offers, both keyed by schedule id.
///
/// A schedule is never pending and delivered at the same time, and is
/// delivered at most once until the cache is cleared.
#[derive(Debug)]
pub struct OfferCache {
    pending: KeyedStore<ScheduleId, PendingOffer>,
    delivered: KeyedStore<ScheduleId, DeliveredOffer>,
    signals: Signals,
}

impl OfferCache {
    pub fn new(signals: Signals) -> Self {
        Self {
            pending: KeyedStore::new(),
            delivered: KeyedStore::new(),
            signals,
        }
    }

    pub fn restore(&mut self, pending: Vec<PendingOffer>, delivered: Vec<DeliveredOffer>) {
        self.delivered = KeyedStore::from_items(delivered.into_iter().map(|o| (o.schedule_id, o)));
        self.pending = KeyedStore::from_items(
            pending
                .into_iter()
                .filter(|p| !self.delivered.contains_key(&p.schedule_id()))
                .map(|p| (p.schedule_id(), p)),
        );
    }

    pub fn has_offer_already(&self, schedule_id: ScheduleId) -> bool {
        self.delivered.contains_key(&schedule_id)
    }

    pub fn is_pending(&self, schedule_id: ScheduleId) -> bool {
        self.pending.contains_key(&schedule_id)
    }

    pub fn pending_offer(&self, schedule_id: ScheduleId) -> Option<&PendingOffer> {
        self.pending.get(&schedule_id)
    }

    pub fn add_pending_offer(&mut self, region: &GeoFence, now: DateTime<Utc>) -> PendingOutcome {
        let id = region.schedule_id;
        if self.has_offer_already(id) || self.is_pending(id) {
            return PendingOutcome::AlreadyKnown;
        }

        if region.dwell_delay_ms == 0 {
            return PendingOutcome::DeliverNow;
        }
        debug!(schedule_id = id, dwell_ms = region.dwell_delay_ms, "Offer pending dwell");
        self.pending
            .insert(id, PendingOffer::new(region.clone(), now));
        PendingOutcome::Pending
    }

    /// Record a delivery. Returns false if the schedule was already delivered.
    pub fn add_offer(&mut self, region: &GeoFence, now: DateTime<Utc>) -> bool {
        let id = region.schedule_id;
        self.pending.remove(&id);
        if self.has_offer_already(id) {
            warn!(schedule_id = id, "Offer already delivered, ignoring");
            return false;
        }

        self.delivered.insert(
            id,
            DeliveredOffer {
                schedule_id: id,
                device_key: region.device_key.clone(),
                delivered_at: now,
            },
        );
        self.signals.publish(EngineSignal::OffersUpdated);
        true
    }

    /// Import deliveries the backend already knows about.
    ///
    /// `delivered_at` supplies the backend's timestamp when it has one.
    pub fn append_delivered_schedules(
        &mut self,
        schedules: &[DeliveredSchedule],
        delivered_at: impl Fn(ScheduleId) -> Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> usize {
        let mut added = 0;
        for schedule in schedules {
            let id = schedule.schedule_id;
            self.pending.remove(&id);
            if self.delivered.contains_key(&id) {
                continue;
            }
            self.delivered.insert(
                id,
                DeliveredOffer {
                    schedule_id: id,
                    device_key: schedule.device_key.clone(),
                    delivered_at: delivered_at(id).unwrap_or(now),
                },
            );
            added += 1;
        }
        if added > 0 {
            debug!(count = added, "Imported delivered schedules from listing");
            self.signals.publish(EngineSignal::OffersUpdated);
        }
        added
    }

    pub fn remove_pending_offer(&mut self, schedule_id: ScheduleId) -> Option<PendingOffer> {
        self.pending.remove(&schedule_id)
    }

    pub fn pending_offers(&self) -> Vec<PendingOffer> {
        self.pending.to_vec()
    }

    pub fn offers(&self) -> Vec<DeliveredOffer> {
        self.delivered.to_vec()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.delivered.clear();
        self.signals.publish(EngineSignal::OffersUpdated);
    }

    pub fn is_dirty(&self) -> bool {
        self.pending.is_dirty() || self.delivered.is_dirty()
    }

    pub fn mark_clean(&mut self) {
        self.pending.mark_clean();
        self.delivered.mark_clean();
    }
}
