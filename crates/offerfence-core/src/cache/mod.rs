//! Engine state: the listing store, the offer and region caches, the tracking
//! outbox and the persistence backends that carry them across restarts.
//!
//! Each cache tracks its own dirty flag. The host saves a single `CacheBlob`
//! when any of them is dirty and marks them clean afterwards.

pub mod entered_regions;
pub mod listing;
pub mod offers;
pub mod pending_notifications;
pub mod persistence;
pub mod push_messages;
pub mod store;
pub mod tracking;

pub use entered_regions::EnteredRegionCache;
pub use listing::ListingStore;
pub use offers::{OfferCache, PendingOutcome};
pub use pending_notifications::PendingNotificationCache;
pub use persistence::{CacheBlob, CachedData, JsonFilePersistence, MemoryPersistence, Persistence};
pub use push_messages::PushMessageCache;
pub use store::KeyedStore;
pub use tracking::{TrackingOutbox, DEFAULT_BATCH_SIZE};
