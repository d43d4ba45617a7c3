//! Change notifications fired by the engine.
//!
//! Observers subscribe for a `broadcast::Receiver` and unsubscribe by
//! dropping it. A lagging receiver loses old signals, never blocks the engine.

use tokio::sync::broadcast;
use tracing::trace;

/// Default channel capacity.
const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineSignal {
    /// The listing was replaced, patched or a coupon was redeemed.
    ListingUpdated,
    /// The delivered-offer set changed.
    OffersUpdated,
}

#[derive(Debug, Clone)]
pub struct Signals {
    sender: broadcast::Sender<EngineSignal>,
}

impl Signals {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineSignal> {
        self.sender.subscribe()
    }

    pub fn publish(&self, signal: EngineSignal) {
        // No receivers is fine
        if self.sender.send(signal).is_err() {
            trace!(?signal, "No subscribers for engine signal");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for Signals {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
