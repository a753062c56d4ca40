//! Repository URL normalization
//!
//! Registries report repository URLs in many dialects (`git+https://`,
//! `git://`, scp-style `git@host:owner/repo`, hosting-service "tree" links,
//! ...). [`normalize`] turns any of them into a [`SourceDescriptor`], whose
//! rendering is the fetch string handed to a
//! [`Fetcher`](crate::fetch::Fetcher):
//!
//! ```text
//! git::https://github.com/user/repo.git//subfolder?depth=1&ref=main
//! ```

use std::fmt;

use percent_encoding::percent_decode_str;
use url::{Url, form_urlencoded};

use crate::error::ErrorKind;

/// Shallow fetches only
pub const DEPTH: u32 = 1;

const GIT_PREFIX: &str = "git::";
const GIT_SUFFIX: &str = ".git";

/// Hosting services whose URL layout is understood
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostingService {
    GitHub,
    GitLab,
}

impl HostingService {
    pub fn from_host(host: &str) -> Option<Self> {
        match host.to_ascii_lowercase().as_str() {
            "github.com" | "www.github.com" => Some(HostingService::GitHub),
            "gitlab.com" | "www.gitlab.com" => Some(HostingService::GitLab),
            _ => None,
        }
    }

    /// Path segments between `<owner>/<repo>` and the ref in a tree link
    fn tree_marker(self) -> &'static [&'static str] {
        match self {
            HostingService::GitHub => &["tree"],
            HostingService::GitLab => &["-", "tree"],
        }
    }

    /// Splits `<owner>/<repo>/tree/<ref>/<subpath...>` into ref and subpath.
    fn split_tree(self, segments: &[&str]) -> Option<(String, Option<String>)> {
        let marker = self.tree_marker();
        let rest = segments.get(2..)?;
        if !rest.starts_with(marker) {
            return None;
        }
        let after = &rest[marker.len()..];
        let git_ref = percent_decode_str(after.first()?).decode_utf8_lossy();
        let subdir = after[1..].join("/");
        Some((git_ref.into_owned(), non_empty(subdir)))
    }

    /// Base of a permanent link to a file at `commit`, ending with `/`.
    pub fn blob_base(self, browse_url: &str, commit: &str) -> String {
        match self {
            HostingService::GitHub => format!("{browse_url}/blob/{commit}/"),
            HostingService::GitLab => format!("{browse_url}/-/blob/{commit}/"),
        }
    }
}

/// A normalized, fetch-ready repository location
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceDescriptor {
    /// `https://<host>/<path>.git`
    repo_url: String,
    host: String,
    git_ref: Option<String>,
    subdir: Option<String>,
}

impl SourceDescriptor {
    /// HTTPS URL of the repository, with the `.git` suffix
    pub fn repo_url(&self) -> &str {
        &self.repo_url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn git_ref(&self) -> Option<&str> {
        self.git_ref.as_deref()
    }

    /// Subdirectory of the repository the package lives in
    pub fn subdir(&self) -> Option<&str> {
        self.subdir.as_deref()
    }

    pub fn hosting_service(&self) -> Option<HostingService> {
        HostingService::from_host(&self.host)
    }

    /// The repository URL a person would open in a browser.
    pub fn browse_url(&self) -> String {
        self.repo_url
            .strip_suffix(GIT_SUFFIX)
            .unwrap_or(&self.repo_url)
            .to_string()
    }

    /// Permalink base for files at `commit`, when the host is a known
    /// hosting service.
    pub fn permalink_base(&self, commit: &str) -> Option<String> {
        self.hosting_service()
            .map(|service| service.blob_base(&self.browse_url(), commit))
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{GIT_PREFIX}{}", self.repo_url)?;
        if let Some(subdir) = &self.subdir {
            write!(f, "//{subdir}")?;
        }

        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("depth", &DEPTH.to_string());
        if let Some(git_ref) = &self.git_ref {
            query.append_pair("ref", git_ref);
        }
        write!(f, "?{}", query.finish())
    }
}

/// Normalizes a raw repository URL.
///
/// Any scheme is rewritten to HTTPS behind the `git::` prefix, the `.git`
/// suffix is added, and hosting-service tree links are decomposed into
/// repository, ref and subdirectory. Already normalized strings come back
/// unchanged.
pub fn normalize(raw: &str) -> Result<SourceDescriptor, ErrorKind> {
    let malformed = |reason: &str| ErrorKind::MalformedUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix(GIT_PREFIX).unwrap_or(trimmed);
    let trimmed = trimmed.strip_prefix("git+").unwrap_or(trimmed);
    let candidate = scp_to_url(trimmed).unwrap_or_else(|| trimmed.to_string());

    let url = Url::parse(&candidate).map_err(|e| malformed(&e.to_string()))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| malformed("missing host"))?;

    let mut git_ref = url
        .query_pairs()
        .find(|(k, _)| k == "ref")
        .map(|(_, v)| v.into_owned())
        .and_then(non_empty);

    let (repo_path, mut subdir) = match url.path().split_once("//") {
        Some((repo, sub)) => (repo, clean_subdir(sub)),
        None => (url.path(), None),
    };

    let mut segments: Vec<&str> = repo_path.split('/').filter(|s| !s.is_empty()).collect();
    if subdir.is_none()
        && let Some(service) = HostingService::from_host(host)
        && let Some((tree_ref, tree_subdir)) = service.split_tree(&segments)
    {
        git_ref = git_ref.or(Some(tree_ref));
        subdir = tree_subdir;
        segments.truncate(2);
    }

    let mut path = segments.join("/");
    if path.is_empty() {
        return Err(malformed("missing repository path"));
    }
    if !path.ends_with(GIT_SUFFIX) {
        path.push_str(GIT_SUFFIX);
    }

    // Ports only carry over between HTTP dialects; git:// and ssh ports mean
    // nothing to an HTTPS fetch.
    let host = host.to_ascii_lowercase();
    let authority = match url.port() {
        Some(port) if matches!(url.scheme(), "http" | "https") => format!("{host}:{port}"),
        _ => host.clone(),
    };

    Ok(SourceDescriptor {
        repo_url: format!("https://{authority}/{path}"),
        host,
        git_ref,
        subdir,
    })
}

/// `git@github.com:owner/repo.git` -> `https://github.com/owner/repo.git`
fn scp_to_url(s: &str) -> Option<String> {
    if s.contains("://") {
        return None;
    }
    let (user_host, path) = s.split_once(':')?;
    let (_, host) = user_host.rsplit_once('@')?;
    if host.is_empty() || host.contains('/') || path.is_empty() {
        return None;
    }
    Some(format!("https://{host}/{}", path.trim_start_matches('/')))
}

fn clean_subdir(subdir: &str) -> Option<String> {
    let segments: Vec<&str> = subdir
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    non_empty(segments.join("/"))
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}
