use async_trait::async_trait;
use std::time::Duration;

use super::error::FetchError;
use super::types::SatelliteId;

pub const DEFAULT_BASE_URL: &str = "https://api.wheretheiss.at/v1/satellites/";

/// Something that can produce one raw position payload per call.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self) -> Result<String, FetchError>;
}

/// HTTP fetcher bound to a single satellite resource.
pub struct SatLoc {
    satellite: SatelliteId,
    url: String,
    http: reqwest::Client,
}

impl SatLoc {
    pub fn new(satellite: SatelliteId) -> Result<Self, FetchError> {
        Self::with_base_url(satellite, DEFAULT_BASE_URL, None)
    }

    pub fn with_base_url(
        satellite: SatelliteId,
        base_url: &str,
        timeout: Option<Duration>,
    ) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("sat-loc/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            url: resource_url(base_url, &satellite),
            satellite,
            http,
        })
    }

    pub fn satellite(&self) -> &SatelliteId {
        &self.satellite
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Fetch for SatLoc {
    async fn fetch(&self) -> Result<String, FetchError> {
        let response = self.http.get(&self.url).send().await?;
        log::debug!("GET {} -> {}", self.url, response.status());

        // Non-2xx bodies are returned as-is; callers inspect them for error fields.
        let body = response.text().await?;
        Ok(body)
    }
}

fn resource_url(base_url: &str, satellite: &SatelliteId) -> String {
    if base_url.ends_with('/') {
        format!("{}{}", base_url, satellite)
    } else {
        format!("{}/{}", base_url, satellite)
    }
}
