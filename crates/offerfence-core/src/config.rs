//! Engine configuration.
//!
//! Holds the backend credentials, the device identifier and the tuning knobs
//! of the engine (refresh throttling, save cadence, batch size, region cap).
//!
//! Configuration is stored at `~/.config/offerfence/config.json`. Credentials
//! can also come from `OFFERFENCE_REGISTRATION_CODE` / `OFFERFENCE_AUTH_TOKEN`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::TrackingEventType;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "offerfence";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Production API base URL
pub const PRODUCTION_API_URL: &str = "https://app.zappitrewards.com/api";

/// Staging API base URL, used when `testing` is set
pub const STAGING_API_URL: &str = "https://app-stg.zappitrewards.com/api";

pub const ENV_REGISTRATION_CODE: &str = "OFFERFENCE_REGISTRATION_CODE";
pub const ENV_AUTH_TOKEN: &str = "OFFERFENCE_AUTH_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub registration_code: String,
    pub auth_token: String,
    pub device_id: String,
    /// Use the staging backend.
    pub testing: bool,
    /// Overrides both production and staging URLs when set.
    pub api_base_url: Option<String>,
    /// IANA timezone name reported with tracking batches.
    pub timezone: Option<String>,
    /// Minimum seconds between two nearby-offers polls.
    pub min_refresh_wait_secs: u64,
    /// Minimum movement in meters before a new poll is worth it.
    pub min_refresh_distance_m: f64,
    pub save_period_secs: u64,
    pub tick_interval_secs: u64,
    pub tracking_batch_size: usize,
    pub max_monitored_regions: usize,
    /// Event types kept in the outbox for upload.
    pub server_event_types: Vec<TrackingEventType>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registration_code: String::new(),
            auth_token: String::new(),
            device_id: String::new(),
            testing: false,
            api_base_url: None,
            timezone: None,
            min_refresh_wait_secs: 60,
            min_refresh_distance_m: 200.0,
            save_period_secs: 30,
            tick_interval_secs: 1,
            tracking_batch_size: 50,
            max_monitored_regions: 20,
            server_event_types: TrackingEventType::default_server_types(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            debug!(path = %path.display(), "Loaded config");
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;

        let mut path = cache_dir.join(APP_NAME);
        if self.testing {
            path = path.join("staging");
        }
        Ok(path)
    }

    /// Apply credential overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(code) = lookup(ENV_REGISTRATION_CODE).filter(|v| !v.is_empty()) {
            self.registration_code = code;
        }
        if let Some(token) = lookup(ENV_AUTH_TOKEN).filter(|v| !v.is_empty()) {
            self.auth_token = token;
        }
    }

    /// Generate a device id if none is stored yet. Returns true when one was created.
    pub fn ensure_device_id(&mut self) -> bool {
        if !self.device_id.is_empty() {
            return false;
        }
        self.device_id = generate_device_id();
        info!(device_id = %self.device_id, "Generated new device id");
        true
    }

    pub fn api_url(&self) -> &str {
        match self.api_base_url.as_deref() {
            Some(url) if !url.is_empty() => url,
            _ if self.testing => STAGING_API_URL,
            _ => PRODUCTION_API_URL,
        }
    }

    /// Timezone reported to the backend: configured name, `TZ`, or the local UTC offset.
    pub fn timezone_label(&self) -> String {
        if let Some(tz) = self.timezone.as_ref().filter(|tz| !tz.is_empty()) {
            return tz.clone();
        }
        if let Ok(tz) = std::env::var("TZ") {
            if !tz.is_empty() {
                return tz;
            }
        }
        chrono::Local::now().format("%:z").to_string()
    }

    pub fn has_credentials(&self) -> bool {
        !self.registration_code.is_empty() && !self.auth_token.is_empty()
    }
}

/// Random 128-bit id formatted like a UUID.
fn generate_device_id() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}
