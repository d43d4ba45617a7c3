//! API client for the geofence offer backend.
//!
//! Two endpoints are used: a GET returning the nearby-offers listing for a
//! position, and a POST uploading batches of tracking events.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder};
use tracing::{debug, warn};

use super::{ApiError, NetworkTransport};
use crate::config::Config;
use crate::models::TrackingBatch;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

const NEARBY_OFFERS_PATH: &str = "nearby-geofences";
const TRACKING_PATH: &str = "geo-offer-events";

/// API client for the offer backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    registration_code: String,
    auth_token: String,
    device_id: String,
    initial_backoff_ms: u64,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("registration_code", &self.registration_code)
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a client for the backend selected by `config`.
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_url().trim_end_matches('/').to_string(),
            registration_code: config.registration_code.clone(),
            auth_token: config.auth_token.clone(),
            device_id: config.device_id.clone(),
            initial_backoff_ms: INITIAL_BACKOFF_MS,
        })
    }

    /// Point the client at another server, sharing the connection pool.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn nearby_offers_url(&self, latitude: f64, longitude: f64) -> String {
        format!(
            "{}/{}/{}/{}/{}/{}",
            self.base_url,
            NEARBY_OFFERS_PATH,
            self.registration_code,
            latitude,
            longitude,
            self.device_id
        )
    }

    fn tracking_url(&self) -> String {
        format!("{}/{}", self.base_url, TRACKING_PATH)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .basic_auth("", Some(&self.auth_token))
            .header(header::ACCEPT, "application/json")
    }

    /// Send a request, retrying with exponential backoff while rate limited.
    async fn send_with_retry(
        &self,
        url: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<reqwest::Response, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = self.initial_backoff_ms;

        loop {
            let response = self.authorize(build()).send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    // Rate limited
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            // Rate limited - signal to retry
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }
}

#[async_trait]
impl NetworkTransport for ApiClient {
    async fn poll_nearby_offers(&self, latitude: f64, longitude: f64) -> Result<String, ApiError> {
        let url = self.nearby_offers_url(latitude, longitude);
        debug!(url = %url, "Polling nearby offers");

        let response = self.send_with_retry(&url, || self.client.get(&url)).await?;
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(ApiError::InvalidResponse("Empty listing body".to_string()));
        }
        Ok(body)
    }

    async fn track_events(&self, batch: &TrackingBatch) -> Result<(), ApiError> {
        let url = self.tracking_url();
        debug!(count = batch.events.len(), "Uploading tracking events");

        self.send_with_retry(&url, || self.client.post(&url).json(batch))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TrackingEvent, TrackingEventType};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> Config {
        Config {
            registration_code: "REG1".to_string(),
            auth_token: "secret".to_string(),
            device_id: "dev-1".to_string(),
            ..Config::default()
        }
    }

    fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::new(&test_config())
            .unwrap()
            .with_base_url(server.uri())
            .with_initial_backoff(Duration::from_millis(1))
    }

    fn batch() -> TrackingBatch {
        TrackingBatch {
            device_id: "dev-1".to_string(),
            timezone: "Europe/London".to_string(),
            events: vec![TrackingEvent {
                kind: TrackingEventType::GeofenceEntry,
                timestamp_ms: 1_700_000_000_000,
                device_key: "dev-1".to_string(),
                schedule_id: 42,
                latitude: 51.5,
                longitude: -0.12,
            }],
        }
    }

    #[test]
    fn test_base_url_from_config() {
        let client = ApiClient::new(&test_config()).unwrap();
        assert_eq!(client.base_url(), crate::config::PRODUCTION_API_URL);
        let client = client.with_base_url("http://localhost:1234/api/");
        assert_eq!(client.base_url(), "http://localhost:1234/api");
    }

    #[tokio::test]
    async fn test_poll_nearby_offers_sends_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nearby-geofences/REG1/51.5/-0.12/dev-1"))
            .and(header("Authorization", "Basic OnNlY3JldA=="))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"clientId": 1}"#))
            .expect(1)
            .mount(&server)
            .await;

        let body = client_for(&server).poll_nearby_offers(51.5, -0.12).await.unwrap();
        assert_eq!(body, r#"{"clientId": 1}"#);
    }

    #[tokio::test]
    async fn test_track_events_posts_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/geo-offer-events"))
            .and(body_json(batch()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).track_events(&batch()).await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/geo-offer-events"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = client_for(&server).track_events(&batch()).await.unwrap_err();
        assert!(matches!(err, ApiError::ServerError(ref body) if body == "maintenance"));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client_for(&server).poll_nearby_offers(1.0, 2.0).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let body = client_for(&server).poll_nearby_offers(1.0, 2.0).await.unwrap();
        assert_eq!(body, "{}");
    }

    #[tokio::test]
    async fn test_rate_limit_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = client_for(&server).track_events(&batch()).await.unwrap_err();
        assert!(matches!(err, ApiError::RateLimited));
    }

    #[tokio::test]
    async fn test_empty_listing_body_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let err = client_for(&server).poll_nearby_offers(1.0, 2.0).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }
}
