//! Source locator for PyPI

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{SourceLocator, read_json, send};
use crate::error::ErrorKind;
use crate::purl::PackageIdentity;

const DEFAULT_BASE_URL: &str = "https://pypi.org/pypi";

/// `project_urls` keys that point at source code, most specific first
const SOURCE_KEYS: &[&str] = &["Source", "Source Code", "Repository", "GitHub", "Code"];

/// Reads `info.project_urls` from the PyPI JSON API
pub struct PyPiLocator {
    client: Arc<Client>,
    base_url: String,
}

impl PyPiLocator {
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
struct PyPiResponse {
    info: PackageInfo,
}

#[derive(Debug, Deserialize)]
struct PackageInfo {
    project_urls: Option<HashMap<String, String>>,
}

fn source_url(project_urls: &HashMap<String, String>) -> Option<&str> {
    SOURCE_KEYS.iter().find_map(|key| {
        project_urls
            .iter()
            .find(|(k, v)| k.eq_ignore_ascii_case(key) && !v.trim().is_empty())
            .map(|(_, v)| v.trim())
    })
}

#[async_trait]
impl SourceLocator for PyPiLocator {
    async fn detect_source(&self, identity: &PackageIdentity) -> Result<String, ErrorKind> {
        let url = format!("{}/{}/json", self.base_url, identity.name());

        let response = send(self.client.get(&url), &url).await?;
        let pkg: PyPiResponse = read_json(response, &url).await?;

        pkg.info
            .project_urls
            .as_ref()
            .and_then(source_url)
            .map(str::to_string)
            .ok_or_else(|| ErrorKind::NotFound(format!("source URL not found for {identity}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locators::http_client::create_shared_client;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn locator(server: &MockServer) -> PyPiLocator {
        PyPiLocator::with_client(create_shared_client().expect("Failed to create client"))
            .with_base_url(&server.uri())
    }

    #[test]
    fn test_source_url_key_priority() {
        let urls: HashMap<String, String> = [
            ("Homepage", "https://example.com"),
            ("Repository", "https://github.com/org/repo"),
            ("Source", "https://github.com/org/source"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(source_url(&urls), Some("https://github.com/org/source"));

        let urls: HashMap<String, String> = [("source code", "https://gitlab.com/org/repo")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(source_url(&urls), Some("https://gitlab.com/org/repo"));

        let urls: HashMap<String, String> = [("Homepage", "https://example.com")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(source_url(&urls), None);
    }

    #[tokio::test]
    async fn test_detect_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/requests/json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"info":{"name":"requests","project_urls":{"Documentation":"https://requests.readthedocs.io","Source":"https://github.com/psf/requests"}}}"#,
            ))
            .mount(&server)
            .await;

        let identity: PackageIdentity = "pkg:pypi/requests@2.32.3".parse().unwrap();
        let raw = locator(&server).detect_source(&identity).await.unwrap();
        assert_eq!(raw, "https://github.com/psf/requests");
    }

    #[tokio::test]
    async fn test_detect_source_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bare/json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"info":{"project_urls":null}}"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing/json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let locator = locator(&server);

        let bare: PackageIdentity = "pkg:pypi/bare".parse().unwrap();
        let err = locator.detect_source(&bare).await.unwrap_err();
        assert!(err.to_string().contains("source URL not found"));

        let missing: PackageIdentity = "pkg:pypi/missing".parse().unwrap();
        assert!(matches!(
            locator.detect_source(&missing).await,
            Err(ErrorKind::NotFound(_))
        ));
    }
}
