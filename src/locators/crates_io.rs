//! Source locator for crates.io

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{SourceLocator, read_json, send};
use crate::error::ErrorKind;
use crate::purl::PackageIdentity;

const DEFAULT_BASE_URL: &str = "https://crates.io/api/v1";

/// Reads `crate.repository` from the crates.io API.
///
/// crates.io requires a user agent identifying the client; the shared client
/// from [`create_shared_client`](super::http_client::create_shared_client)
/// sets one.
pub struct CratesIoLocator {
    client: Arc<Client>,
    base_url: String,
}

impl CratesIoLocator {
    pub fn with_client(client: Arc<Client>) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn http_client(&self) -> Arc<Client> {
        Arc::clone(&self.client)
    }
}

// API response structures
#[derive(Debug, Deserialize)]
struct CrateResponse {
    #[serde(rename = "crate")]
    krate: CrateInfo,
}

#[derive(Debug, Deserialize)]
struct CrateInfo {
    repository: Option<String>,
}

#[async_trait]
impl SourceLocator for CratesIoLocator {
    async fn detect_source(&self, identity: &PackageIdentity) -> Result<String, ErrorKind> {
        let url = format!("{}/crates/{}", self.base_url, identity.name());

        let response = send(self.client.get(&url), &url).await?;
        let body: CrateResponse = read_json(response, &url).await?;

        body.krate
            .repository
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .ok_or_else(|| ErrorKind::NotFound(format!("no repository URL found for {identity}")))
    }
}
