//! Hub configuration (`vexhub.yaml`)

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Context, ErrorKind, Result, ResultExt};
use crate::purl::PackageIdentity;

/// Name of the configuration file at the hub root
pub const FILE_NAME: &str = "vexhub.yaml";

/// Default timeout for a single git invocation (5 minutes)
const DEFAULT_GIT_TIMEOUT_SECS: u64 = 5 * 60;

/// Parsed hub configuration
#[derive(Debug, Clone, Default)]
pub struct Hub {
    /// Packages to crawl, grouped by ecosystem in sorted order
    pub packages: Vec<Package>,
    pub settings: Settings,
}

/// One configured package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub identity: PackageIdentity,
    /// Explicit repository URL; skips registry lookup when set
    pub url: Option<String>,
}

/// Crawler settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Abort the run on the first package failure
    pub strict: bool,
    /// Timeout for a single git invocation in seconds
    pub git_timeout_secs: u64,
    /// Registry base URL overrides
    pub registries: RegistrySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            strict: false,
            git_timeout_secs: DEFAULT_GIT_TIMEOUT_SECS,
            registries: RegistrySettings::default(),
        }
    }
}

/// Registry base URLs. `None` means the public registry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub npm: Option<String>,
    pub pypi: Option<String>,
    pub crates: Option<String>,
    pub maven: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawHub {
    pkg: BTreeMap<String, Vec<RawPackage>>,
    settings: Settings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPackage {
    namespace: Option<String>,
    name: Option<String>,
    qualifiers: Vec<Qualifier>,
    subpath: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Qualifier {
    key: String,
    value: String,
}

impl Hub {
    /// Loads `<dir>/vexhub.yaml`.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(FILE_NAME);
        let ctx = Context::new().with("path", path.display());
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ErrorKind::io("read", &path, e))
            .at(&ctx)?;
        Self::parse(&content).at(&ctx)
    }

    /// Parses the content of a configuration file.
    pub fn parse(content: &str) -> std::result::Result<Self, ErrorKind> {
        let raw: RawHub = match serde_yaml::from_str::<Option<RawHub>>(content) {
            Ok(raw) => raw.unwrap_or_default(),
            Err(e) => return Err(ErrorKind::InvalidConfig(e.to_string())),
        };

        let mut packages = Vec::new();
        for (ecosystem, entries) in &raw.pkg {
            for (i, entry) in entries.iter().enumerate() {
                packages.push(entry.to_package(ecosystem, i)?);
            }
        }

        Ok(Self {
            packages,
            settings: raw.settings,
        })
    }
}

impl RawPackage {
    fn to_package(&self, ecosystem: &str, position: usize) -> std::result::Result<Package, ErrorKind> {
        let name = self
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ErrorKind::InvalidConfig(format!("pkg.{ecosystem}[{position}]: missing name")))?;

        let mut identity = PackageIdentity::new(ecosystem, name)?;
        if let Some(namespace) = self.namespace.as_deref().filter(|n| !n.is_empty()) {
            identity = identity.with_namespace(namespace);
        }
        for q in &self.qualifiers {
            identity = identity.with_qualifier(&q.key, &q.value);
        }
        if let Some(subpath) = self.subpath.as_deref().filter(|s| !s.is_empty()) {
            identity = identity.with_subpath(subpath);
        }

        Ok(Package {
            identity,
            url: self.url.clone().filter(|u| !u.is_empty()),
        })
    }
}
