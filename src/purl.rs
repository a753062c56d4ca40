//! Package identities (PURLs)
//!
//! A [`PackageIdentity`] is an immutable, parsed package URL. Parsing is
//! delegated to the `packageurl` crate; rendering is done here so the
//! canonical string (sorted qualifiers, percent-encoded components) is stable
//! across crate versions, since it is written verbatim into manifests and the
//! hub index.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use packageurl::PackageUrl;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::error::ErrorKind;

/// Everything except the PURL "unreserved" characters is encoded
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Qualifier naming the registry coordinate of an OCI image
/// (or an alternative Maven repository)
pub const REPOSITORY_URL: &str = "repository_url";

/// A parsed package identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageIdentity {
    ecosystem: String,
    namespace: Option<String>,
    name: String,
    version: Option<String>,
    /// Sorted by key, keys unique
    qualifiers: Vec<(String, String)>,
    subpath: Option<String>,
}

impl PackageIdentity {
    /// Creates an identity with only an ecosystem tag and a name.
    pub fn new(ecosystem: &str, name: &str) -> Result<Self, ErrorKind> {
        let ecosystem = ecosystem.trim().to_lowercase();
        let name = name.trim().trim_matches('/').to_string();
        if ecosystem.is_empty() || name.is_empty() {
            return Err(ErrorKind::InvalidIdentity {
                identity: format!("pkg:{ecosystem}/{name}"),
                reason: "type and name are required".to_string(),
            });
        }
        Ok(Self {
            ecosystem,
            namespace: None,
            name,
            version: None,
            qualifiers: Vec::new(),
            subpath: None,
        })
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = non_empty(namespace.trim_matches('/'));
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: &str) -> Self {
        self.version = non_empty(version);
        self
    }

    /// Adds or replaces a qualifier. Keys are case-insensitive; empty values
    /// are dropped as the PURL format requires.
    #[must_use]
    pub fn with_qualifier(mut self, key: &str, value: &str) -> Self {
        let key = key.trim().to_lowercase();
        self.qualifiers.retain(|(k, _)| *k != key);
        if !key.is_empty() && !value.is_empty() {
            self.qualifiers.push((key, value.to_string()));
            self.qualifiers.sort();
        }
        self
    }

    #[must_use]
    pub fn with_subpath(mut self, subpath: &str) -> Self {
        let cleaned: Vec<&str> = subpath
            .split('/')
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
            .collect();
        self.subpath = non_empty(&cleaned.join("/"));
        self
    }

    pub fn ecosystem(&self) -> &str {
        &self.ecosystem
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn qualifiers(&self) -> &[(String, String)] {
        &self.qualifiers
    }

    pub fn qualifier(&self, key: &str) -> Option<&str> {
        self.qualifiers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn subpath(&self) -> Option<&str> {
        self.subpath.as_deref()
    }

    /// PURL matching: `self` is the general identity, `candidate` the
    /// specific one (e.g. a product named in a VEX statement).
    ///
    /// Type, namespace and name must be equal (compared with the ecosystem's
    /// own name rules). A version or qualifier present on `self` must be
    /// present and equal on `candidate`; when absent on `self` it matches
    /// anything. Subpaths are not compared: VEX products name the module,
    /// not a path inside it.
    pub fn matches(&self, candidate: &PackageIdentity) -> bool {
        if self.ecosystem != candidate.ecosystem {
            return false;
        }

        let same = |a: Option<&str>, b: Option<&str>| {
            a.map(|s| self.fold_case(s)) == b.map(|s| self.fold_case(s))
        };
        if !same(self.namespace(), candidate.namespace())
            || !same(Some(self.name()), Some(candidate.name()))
        {
            return false;
        }

        if self.version.is_some() && self.version != candidate.version {
            return false;
        }

        self.qualifiers
            .iter()
            .all(|(k, v)| candidate.qualifier(k) == Some(v.as_str()))
    }

    /// Like [`matches`](Self::matches) for an unparsed candidate. Strings that
    /// are not valid PURLs never match.
    pub fn matches_str(&self, candidate: &str) -> bool {
        candidate
            .parse::<PackageIdentity>()
            .is_ok_and(|c| self.matches(&c))
    }

    /// Case and separator folding used when comparing names.
    fn fold_case(&self, s: &str) -> String {
        match self.ecosystem.as_str() {
            "pypi" => s.to_lowercase().replace('_', "-"),
            "github" | "bitbucket" | "npm" => s.to_lowercase(),
            _ => s.to_string(),
        }
    }

    /// Directory under the hub root holding this package's VEX documents:
    /// `<root>/pkg/<type>/<namespace>/<name>/<subpath>`, or
    /// `<root>/pkg/oci/<repository_url>` for container images.
    pub fn curated_dir(&self, root: &Path) -> Result<PathBuf, ErrorKind> {
        let mut segments: Vec<&str> = Vec::new();

        if self.ecosystem == "oci" {
            match self.qualifier(REPOSITORY_URL) {
                Some(repo) => segments.extend(repo.split('/')),
                None => segments.push(&self.name),
            }
        } else {
            if let Some(ns) = &self.namespace {
                segments.extend(ns.split('/'));
            }
            segments.extend(self.name.split('/'));
            if let Some(sub) = &self.subpath {
                segments.extend(sub.split('/'));
            }
        }

        let mut dir = root.join("pkg").join(&self.ecosystem);
        for segment in segments {
            if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
                return Err(ErrorKind::InvalidIdentity {
                    identity: self.to_string(),
                    reason: format!("unsafe path segment {segment:?}"),
                });
            }
            dir.push(segment);
        }
        Ok(dir)
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn encode_segments(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    for (i, segment) in value.split('/').enumerate() {
        if i > 0 {
            f.write_str("/")?;
        }
        write!(f, "{}", utf8_percent_encode(segment, COMPONENT))?;
    }
    Ok(())
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkg:{}/", self.ecosystem)?;
        if let Some(ns) = &self.namespace {
            encode_segments(f, ns)?;
            f.write_str("/")?;
        }
        write!(f, "{}", utf8_percent_encode(&self.name, COMPONENT))?;
        if let Some(version) = &self.version {
            write!(f, "@{}", utf8_percent_encode(version, COMPONENT))?;
        }
        for (i, (key, value)) in self.qualifiers.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{key}={}", utf8_percent_encode(value, COMPONENT))?;
        }
        if let Some(sub) = &self.subpath {
            f.write_str("#")?;
            encode_segments(f, sub)?;
        }
        Ok(())
    }
}

impl FromStr for PackageIdentity {
    type Err = ErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let purl = PackageUrl::from_str(s).map_err(|e| ErrorKind::InvalidIdentity {
            identity: s.to_string(),
            reason: e.to_string(),
        })?;

        let mut identity = PackageIdentity::new(purl.ty(), purl.name())?
            .with_namespace(purl.namespace().unwrap_or_default())
            .with_version(purl.version().unwrap_or_default())
            .with_subpath(purl.subpath().unwrap_or_default());
        for (key, value) in purl.qualifiers() {
            identity = identity.with_qualifier(key.as_ref(), value.as_ref());
        }
        Ok(identity)
    }
}
