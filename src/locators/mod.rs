//! Source locators: find the repository of a package by asking its registry
//!
//! Each ecosystem has one [`SourceLocator`] strategy. The [`LocatorTable`]
//! maps the closed set of supported [`Ecosystem`]s to strategies; an identity
//! whose type is not in the table is an
//! [`UnsupportedEcosystem`](ErrorKind::UnsupportedEcosystem) error.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::config::RegistrySettings;
use crate::error::ErrorKind;
use crate::purl::PackageIdentity;

pub mod crates_io;
pub mod golang;
pub mod http_client;
pub mod maven;
pub mod npm;
pub mod oci;
pub mod pypi;

use crates_io::CratesIoLocator;
use golang::GoLocator;
use maven::MavenLocator;
use npm::NpmLocator;
use oci::OciLocator;
use pypi::PyPiLocator;

/// Package ecosystems with a source locator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Ecosystem {
    Cargo,
    Golang,
    Maven,
    Npm,
    Oci,
    Pypi,
}

impl Ecosystem {
    pub const ALL: [Ecosystem; 6] = [
        Ecosystem::Cargo,
        Ecosystem::Golang,
        Ecosystem::Maven,
        Ecosystem::Npm,
        Ecosystem::Oci,
        Ecosystem::Pypi,
    ];

    /// PURL type tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Ecosystem::Cargo => "cargo",
            Ecosystem::Golang => "golang",
            Ecosystem::Maven => "maven",
            Ecosystem::Npm => "npm",
            Ecosystem::Oci => "oci",
            Ecosystem::Pypi => "pypi",
        }
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Ecosystem {
    type Err = ErrorKind;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        Ecosystem::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(tag))
            .ok_or_else(|| ErrorKind::UnsupportedEcosystem(tag.to_string()))
    }
}

/// Turns a package identity into a raw repository URL.
///
/// The URL is not normalized; callers pass it through
/// [`normalize`](crate::source::normalize). Failures are
/// [`NotFound`](ErrorKind::NotFound) when the registry knows no repository,
/// [`UpstreamUnavailable`](ErrorKind::UpstreamUnavailable) when the registry
/// could not be queried, and [`MalformedResponse`](ErrorKind::MalformedResponse)
/// when its answer could not be decoded.
#[async_trait]
pub trait SourceLocator: Send + Sync {
    async fn detect_source(&self, identity: &PackageIdentity) -> Result<String, ErrorKind>;
}

/// Ecosystem-to-strategy dispatch table
#[derive(Clone, Default)]
pub struct LocatorTable {
    locators: HashMap<Ecosystem, Arc<dyn SourceLocator>>,
}

impl LocatorTable {
    /// An empty table; every lookup fails until strategies are inserted.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in strategies for every [`Ecosystem`], sharing one HTTP
    /// client.
    pub fn with_defaults(client: Arc<Client>, registries: &RegistrySettings) -> Self {
        let mut npm = NpmLocator::with_client(Arc::clone(&client));
        if let Some(url) = &registries.npm {
            npm = npm.with_base_url(url);
        }
        let mut pypi = PyPiLocator::with_client(Arc::clone(&client));
        if let Some(url) = &registries.pypi {
            pypi = pypi.with_base_url(url);
        }
        let mut crates = CratesIoLocator::with_client(Arc::clone(&client));
        if let Some(url) = &registries.crates {
            crates = crates.with_base_url(url);
        }
        let mut maven = MavenLocator::with_client(Arc::clone(&client));
        if let Some(url) = &registries.maven {
            maven = maven.with_base_url(url);
        }

        let mut table = Self::new();
        table.insert(Ecosystem::Npm, Arc::new(npm));
        table.insert(Ecosystem::Pypi, Arc::new(pypi));
        table.insert(Ecosystem::Cargo, Arc::new(crates));
        table.insert(Ecosystem::Maven, Arc::new(maven));
        table.insert(Ecosystem::Golang, Arc::new(GoLocator::with_client(Arc::clone(&client))));
        table.insert(Ecosystem::Oci, Arc::new(OciLocator::with_client(client)));
        table
    }

    pub fn insert(&mut self, ecosystem: Ecosystem, locator: Arc<dyn SourceLocator>) {
        self.locators.insert(ecosystem, locator);
    }

    /// Strategy for the identity's type tag.
    pub fn get(&self, identity: &PackageIdentity) -> Result<Arc<dyn SourceLocator>, ErrorKind> {
        let ecosystem: Ecosystem = identity.ecosystem().parse()?;
        self.locators
            .get(&ecosystem)
            .cloned()
            .ok_or_else(|| ErrorKind::UnsupportedEcosystem(ecosystem.to_string()))
    }

    pub async fn detect_source(&self, identity: &PackageIdentity) -> Result<String, ErrorKind> {
        self.get(identity)?.detect_source(identity).await
    }
}

/// Sends a registry request, mapping transport failures and HTTP statuses
/// to locator errors.
pub(crate) async fn send(request: RequestBuilder, url: &str) -> Result<Response, ErrorKind> {
    tracing::debug!(url, "Querying registry");
    let response = request
        .send()
        .await
        .map_err(|e| ErrorKind::UpstreamUnavailable(format!("{url}: {e}")))?;
    check_status(response, url)
}

pub(crate) fn check_status(response: Response, url: &str) -> Result<Response, ErrorKind> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(ErrorKind::NotFound(format!("{url}: {status}")));
    }
    if !status.is_success() {
        return Err(ErrorKind::UpstreamUnavailable(format!("{url}: {status}")));
    }
    Ok(response)
}

pub(crate) async fn read_json<T: DeserializeOwned>(
    response: Response,
    url: &str,
) -> Result<T, ErrorKind> {
    response.json::<T>().await.map_err(|e| {
        if e.is_decode() {
            ErrorKind::MalformedResponse(format!("{url}: {e}"))
        } else {
            ErrorKind::UpstreamUnavailable(format!("{url}: {e}"))
        }
    })
}

pub(crate) async fn read_text(response: Response, url: &str) -> Result<String, ErrorKind> {
    response
        .text()
        .await
        .map_err(|e| ErrorKind::UpstreamUnavailable(format!("{url}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locators::http_client::create_shared_client;

    struct Fixed(&'static str);

    #[async_trait]
    impl SourceLocator for Fixed {
        async fn detect_source(&self, _identity: &PackageIdentity) -> Result<String, ErrorKind> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_ecosystem_from_str() {
        assert_eq!("npm".parse::<Ecosystem>().unwrap(), Ecosystem::Npm);
        assert_eq!("PyPI".parse::<Ecosystem>().unwrap(), Ecosystem::Pypi);
        assert_eq!("golang".parse::<Ecosystem>().unwrap(), Ecosystem::Golang);
        assert!(matches!(
            "gem".parse::<Ecosystem>(),
            Err(ErrorKind::UnsupportedEcosystem(tag)) if tag == "gem"
        ));
    }

    #[test]
    fn test_ecosystem_round_trips_tag() {
        for ecosystem in Ecosystem::ALL {
            assert_eq!(ecosystem.as_str().parse::<Ecosystem>().unwrap(), ecosystem);
        }
    }

    #[tokio::test]
    async fn test_table_dispatches_by_type() {
        let mut table = LocatorTable::new();
        table.insert(Ecosystem::Npm, Arc::new(Fixed("https://github.com/debug-js/debug")));

        let identity: PackageIdentity = "pkg:npm/debug".parse().unwrap();
        assert_eq!(
            table.detect_source(&identity).await.unwrap(),
            "https://github.com/debug-js/debug"
        );
    }

    #[tokio::test]
    async fn test_table_unmapped_ecosystem() {
        let table = LocatorTable::new();

        let known_but_unmapped: PackageIdentity = "pkg:npm/debug".parse().unwrap();
        assert!(matches!(
            table.detect_source(&known_but_unmapped).await,
            Err(ErrorKind::UnsupportedEcosystem(_))
        ));

        let unknown: PackageIdentity = "pkg:gem/rails".parse().unwrap();
        assert!(matches!(
            table.detect_source(&unknown).await,
            Err(ErrorKind::UnsupportedEcosystem(tag)) if tag == "gem"
        ));
    }

    #[test]
    fn test_default_table_covers_every_ecosystem() {
        let client = create_shared_client().expect("Failed to create client");
        let table = LocatorTable::with_defaults(client, &RegistrySettings::default());
        for ecosystem in Ecosystem::ALL {
            let identity = PackageIdentity::new(ecosystem.as_str(), "x").unwrap();
            assert!(table.get(&identity).is_ok(), "{ecosystem}");
        }
    }
}
