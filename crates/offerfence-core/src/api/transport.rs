use async_trait::async_trait;

use super::ApiError;
use crate::models::TrackingBatch;

/// Backend operations the engine depends on.
#[async_trait]
pub trait NetworkTransport: Send + Sync {
    /// Fetch the raw listing JSON for the device's position.
    async fn poll_nearby_offers(&self, latitude: f64, longitude: f64) -> Result<String, ApiError>;

    /// Upload one batch of tracking events.
    async fn track_events(&self, batch: &TrackingBatch) -> Result<(), ApiError>;
}
