//! HTTP transport for the geofence offer backend.
//!
//! `ApiClient` implements `NetworkTransport` over reqwest. Requests use
//! basic auth with an empty user and the auth token as password.

pub mod client;
pub mod error;
pub mod transport;

pub use client::ApiClient;
pub use error::ApiError;
pub use transport::NetworkTransport;
