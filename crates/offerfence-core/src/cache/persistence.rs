use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::error::EngineError;
use crate::models::{
    Coordinate, DeliveredOffer, EnteredRegionRecord, Listing, PendingNotification, PendingOffer,
    PushData, TrackingEvent,
};

/// Name of the engine state file inside the cache directory.
const STATE_FILE: &str = "engine_state";

/// Everything the engine needs to resume after a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheBlob {
    pub listing: Option<Listing>,
    #[serde(rename = "offers")]
    pub delivered_offers: Vec<DeliveredOffer>,
    #[serde(rename = "pendingOffers")]
    pub pending_offers: Vec<PendingOffer>,
    #[serde(rename = "enteredRegions")]
    pub entered_regions: Vec<EnteredRegionRecord>,
    #[serde(rename = "pendingNotifications")]
    pub pending_notifications: Vec<PendingNotification>,
    #[serde(rename = "trackingEvents")]
    pub tracking_events: Vec<TrackingEvent>,
    #[serde(rename = "pushNotificationSplitMessages")]
    pub push_messages: Vec<PushData>,
    #[serde(rename = "lastRefreshAt")]
    pub last_refresh_at: Option<DateTime<Utc>>,
    #[serde(rename = "lastRefreshLocation")]
    pub last_refresh_location: Option<Coordinate>,
}

/// Storage for the engine state blob.
pub trait Persistence: Send + Sync {
    fn load(&self) -> Result<Option<CacheBlob>, EngineError>;
    fn save(&self, blob: &CacheBlob) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }
}

/// JSON files under a cache directory, one file per named entry.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    cache_dir: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(cache_dir: PathBuf) -> Result<Self, EngineError> {
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn cache_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", name))
    }

    fn load_entry<T: DeserializeOwned>(&self, name: &str) -> Result<Option<CachedData<T>>, EngineError> {
        let path = self.cache_path(name);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)?;
        let cached: CachedData<T> = serde_json::from_str(&contents)?;
        debug!(file = %path.display(), cached_at = %cached.cached_at, "Loaded cache file");
        Ok(Some(cached))
    }

    /// Written to a temp file first, then renamed over the old one.
    fn save_entry<T: Serialize>(&self, name: &str, data: &T) -> Result<(), EngineError> {
        let cached = CachedData::new(data);
        let path = self.cache_path(name);
        let tmp = self.cache_dir.join(format!("{}.json.tmp", name));
        let contents = serde_json::to_string_pretty(&cached)?;
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            EngineError::Persistence(format!("Failed to replace {}: {}", path.display(), e))
        })?;
        Ok(())
    }
}

impl Persistence for JsonFilePersistence {
    fn load(&self) -> Result<Option<CacheBlob>, EngineError> {
        Ok(self.load_entry::<CacheBlob>(STATE_FILE)?.map(|c| c.data))
    }

    fn save(&self, blob: &CacheBlob) -> Result<(), EngineError> {
        self.save_entry(STATE_FILE, blob)
    }
}

/// In-memory persistence for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    blob: Mutex<Option<CacheBlob>>,
    saves: Mutex<usize>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(blob: CacheBlob) -> Self {
        Self {
            blob: Mutex::new(Some(blob)),
            saves: Mutex::new(0),
        }
    }

    pub fn snapshot(&self) -> Option<CacheBlob> {
        self.blob.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Persistence for MemoryPersistence {
    fn load(&self) -> Result<Option<CacheBlob>, EngineError> {
        Ok(self.snapshot())
    }

    fn save(&self, blob: &CacheBlob) -> Result<(), EngineError> {
        *self.blob.lock().unwrap_or_else(|e| e.into_inner()) = Some(blob.clone());
        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}
