//! Source locator for Maven repositories
//!
//! Maven metadata carries no repository URL, so the locator resolves a
//! version from `maven-metadata.xml` and reads the `<scm>` section of that
//! version's POM.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{SourceLocator, read_text, send};
use crate::error::ErrorKind;
use crate::purl::{PackageIdentity, REPOSITORY_URL};

const DEFAULT_BASE_URL: &str = "https://repo.maven.apache.org/maven2";

/// Reads repository URLs from POM files
pub struct MavenLocator {
    client: Arc<Client>,
    base_url: String,
}

impl MavenLocator {
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

    async fn fetch_xml<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, ErrorKind> {
        let response = send(self.client.get(url), url).await?;
        let body = read_text(response, url).await?;
        quick_xml::de::from_str(&body)
            .map_err(|e| ErrorKind::MalformedResponse(format!("{url}: {e}")))
    }

    async fn latest_version(&self, artifact_url: &str) -> Result<String, ErrorKind> {
        let url = format!("{artifact_url}/maven-metadata.xml");
        let metadata: Metadata = self.fetch_xml(&url).await?;
        metadata
            .versioning
            .and_then(Versioning::pick)
            .ok_or_else(|| ErrorKind::NotFound(format!("no latest version found in {url}")))
    }
}

// maven-metadata.xml
#[derive(Debug, Deserialize)]
struct Metadata {
    versioning: Option<Versioning>,
}

#[derive(Debug, Deserialize)]
struct Versioning {
    latest: Option<String>,
    release: Option<String>,
    versions: Option<Versions>,
}

impl Versioning {
    fn pick(self) -> Option<String> {
        self.latest
            .filter(|v| !v.is_empty())
            .or(self.release.filter(|v| !v.is_empty()))
            .or_else(|| self.versions.and_then(|v| v.version.into_iter().last()))
    }
}

#[derive(Debug, Deserialize)]
struct Versions {
    #[serde(default)]
    version: Vec<String>,
}

// <artifact>-<version>.pom
#[derive(Debug, Deserialize)]
struct Pom {
    scm: Option<Scm>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Scm {
    url: Option<String>,
    connection: Option<String>,
}

impl Pom {
    /// `scm.url`, then `scm.connection`, then the project `url`. Values with
    /// unresolved `${...}` properties are skipped.
    fn source_url(self) -> Option<String> {
        let (scm_url, connection) = match self.scm {
            Some(scm) => (scm.url, scm.connection),
            None => (None, None),
        };
        [scm_url, connection, self.url]
            .into_iter()
            .flatten()
            .map(|u| {
                let u = u.trim();
                u.strip_prefix("scm:git:").unwrap_or(u).to_string()
            })
            .find(|u| !u.is_empty() && !u.contains("${"))
    }
}

#[async_trait]
impl SourceLocator for MavenLocator {
    async fn detect_source(&self, identity: &PackageIdentity) -> Result<String, ErrorKind> {
        let group = identity.namespace().ok_or_else(|| ErrorKind::InvalidIdentity {
            identity: identity.to_string(),
            reason: "missing group id".to_string(),
        })?;
        let base = identity
            .qualifier(REPOSITORY_URL)
            .map(|u| u.trim_end_matches('/'))
            .unwrap_or(&self.base_url);

        // e.g. pkg:maven/ai.catboost/catboost-spark-aggregate_2.11 =>
        // <base>/ai/catboost/catboost-spark-aggregate_2.11
        let artifact = identity.name();
        let artifact_url = format!("{base}/{}/{artifact}", group.replace('.', "/"));

        let version = match identity.version() {
            Some(v) => v.to_string(),
            None => self.latest_version(&artifact_url).await?,
        };
        tracing::info!(purl = %identity, version, "Resolved Maven version");

        let pom_url = format!("{artifact_url}/{version}/{artifact}-{version}.pom");
        let pom: Pom = self.fetch_xml(&pom_url).await?;
        pom.source_url()
            .ok_or_else(|| ErrorKind::NotFound(format!("no repository URL found in {pom_url}")))
    }
}
