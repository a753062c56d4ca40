//! Crawl orchestration
//!
//! Packages are processed one at a time: locate, normalize, harvest. Each
//! package owns its curated directory only while it is being processed, so
//! no two harvests ever write to the hub concurrently. The index is rebuilt
//! once every package has been handled.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Package;
use crate::error::{Context, Error, ErrorKind, Result, ResultExt};
use crate::fetch::Fetcher;
use crate::harvest::Harvester;
use crate::index;
use crate::locators::LocatorTable;
use crate::manifest::Manifest;
use crate::source::normalize;

/// A package that could not be harvested in tolerant mode
#[derive(Debug)]
pub struct PackageFailure {
    pub id: String,
    pub error: Error,
}

/// Outcome of a crawl
#[derive(Debug, Default)]
pub struct CrawlSummary {
    /// Canonical PURLs of the packages harvested successfully
    pub harvested: Vec<String>,
    pub failed: Vec<PackageFailure>,
}

impl CrawlSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Crawler {
    harvester: Harvester,
    locators: LocatorTable,
    strict: bool,
}

impl Crawler {
    pub fn new(root: impl Into<PathBuf>, locators: LocatorTable, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            harvester: Harvester::new(root, fetcher),
            locators,
            strict: false,
        }
    }

    /// Abort on the first package failure instead of logging it.
    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn root(&self) -> &Path {
        self.harvester.root()
    }

    /// Harvests every package, then rebuilds the index.
    ///
    /// In strict mode the first package failure is returned and the index is
    /// left as it was. Index failures are always returned.
    pub async fn crawl(&self, packages: &[Package]) -> Result<CrawlSummary> {
        let mut summary = CrawlSummary::default();

        for package in packages {
            let id = package.identity.to_string();
            match self.crawl_package(package).await {
                Ok(manifest) => {
                    tracing::info!(purl = %id, files = manifest.sources.len(), "Harvested VEX files");
                    summary.harvested.push(id);
                }
                Err(e) if self.strict => return Err(e),
                Err(e) => {
                    tracing::error!(
                        ecosystem = package.identity.ecosystem(),
                        purl = %id,
                        url = e.context().get("url").unwrap_or_default(),
                        "Failed to crawl package: {e}"
                    );
                    summary.failed.push(PackageFailure { id, error: e });
                }
            }
        }

        self.generate_index().await?;

        tracing::info!(
            harvested = summary.harvested.len(),
            failed = summary.failed.len(),
            "Crawl finished"
        );
        Ok(summary)
    }

    /// Locates, normalizes and harvests a single package.
    pub async fn crawl_package(&self, package: &Package) -> Result<Manifest> {
        let identity = &package.identity;
        let ctx = Context::new()
            .with("ecosystem", identity.ecosystem())
            .with("purl", identity);
        tracing::info!(purl = %identity, "Crawling package");

        let raw_url = match &package.url {
            Some(url) => url.clone(),
            None => self.locators.detect_source(identity).await.at(&ctx)?,
        };
        let ctx = ctx.with("url", &raw_url);

        let source = normalize(&raw_url).at(&ctx)?;
        tracing::debug!(source = %source, "Normalized source URL");

        self.harvester.harvest(identity, &source, &ctx).await
    }

    /// Rebuilds `index.json` from the manifests in the hub.
    pub async fn generate_index(&self) -> Result<index::Index> {
        let root = self.root().to_path_buf();
        let ctx = Context::new().with("root", root.display());
        tokio::task::spawn_blocking(move || index::generate(&root))
            .await
            .map_err(|e| {
                tracing::error!("Index task failed: {e}");
                ErrorKind::PersistFailure {
                    path: self.root().join(index::FILE_NAME),
                    reason: format!("index task failed: {e}"),
                }
                .at(&ctx)
            })?
    }
}
