//! Catalog acquisition.
//!
//! The core never parses markup: a [`CatalogSource`] hands back an
//! already-structured [`Snapshot`].

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::catalog::Snapshot;

/// Errors that can occur while acquiring a snapshot.
#[derive(Debug, Error, Clone)]
pub enum FetchError {
    /// The fetch did not finish within its time budget
    #[error("Catalog fetch timed out after {elapsed_secs:.1}s")]
    Timeout { elapsed_secs: f64 },

    #[error("Network error: {message}")]
    Network { message: String },

    /// Server answered with a non-success status
    #[error("Catalog source returned status {status}")]
    Status { status: u16 },

    #[error("Failed to decode snapshot: {message}")]
    Decode { message: String },

    #[error("URL error: {message}")]
    InvalidUrl { message: String },
}

impl FetchError {
    /// Returns true if a later cycle may succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Network { .. } => true,
            FetchError::Status { status } => *status >= 500 || *status == 429,
            FetchError::Decode { .. } | FetchError::InvalidUrl { .. } => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Decode {
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            FetchError::Status {
                status: status.as_u16(),
            }
        } else {
            FetchError::Network {
                message: err.to_string(),
            }
        }
    }
}

impl From<url::ParseError> for FetchError {
    fn from(err: url::ParseError) -> Self {
        FetchError::InvalidUrl {
            message: err.to_string(),
        }
    }
}

/// Produces a fresh snapshot of the catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<Snapshot, FetchError>;
}

/// Fetches snapshots serialized as JSON from an HTTP endpoint.
pub struct HttpCatalogSource {
    client: Client,
    url: Url,
}

impl HttpCatalogSource {
    /// Creates a source for `url`; every request is capped at `timeout`.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let url = Url::parse(url)?;
        let client = Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl CatalogSource for HttpCatalogSource {
    async fn fetch_snapshot(&self) -> Result<Snapshot, FetchError> {
        info!(url = %self.url, "Fetching catalog snapshot");

        let response = self.client.get(self.url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status().as_u16(),
            });
        }

        let snapshot: Snapshot = response.json().await?;
        info!(
            courses = snapshot.courses().len(),
            captured_at = %snapshot.captured_at(),
            "Fetched catalog snapshot"
        );
        Ok(snapshot)
    }
}
