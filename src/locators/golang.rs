//! Source locator for Go modules
//!
//! Well-known hosts map an import path to a repository directly; any other
//! import path is resolved through its `go-import` meta tag
//! (`https://<import-path>?go-get=1`), the same discovery `go get` performs.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;

use super::{SourceLocator, read_text, send};
use crate::error::ErrorKind;
use crate::purl::PackageIdentity;

/// Hosts whose repository root is always `<host>/<owner>/<repo>`
const KNOWN_HOSTS: &[&str] = &["github.com", "gitlab.com", "bitbucket.org"];

static META_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<meta\s[^>]*>").expect("invalid regex"));
static META_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(name|content)\s*=\s*["']([^"']*)["']"#).expect("invalid regex")
});

/// Resolves Go import paths to repositories
pub struct GoLocator {
    client: Arc<Client>,
    scheme: String,
}

impl GoLocator {
    pub fn with_client(client: Arc<Client>) -> Self {
        Self {
            client,
            scheme: "https".to_string(),
        }
    }

    #[cfg(test)]
    fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }

    pub fn http_client(&self) -> Arc<Client> {
        Arc::clone(&self.client)
    }

    /// Fetches the `go-import` meta tag for `import_path`, returning the
    /// module root and the repository URL.
    async fn discover(&self, import_path: &str) -> Result<(String, String), ErrorKind> {
        let url = format!("{}://{import_path}?go-get=1", self.scheme);
        let response = send(self.client.get(&url), &url).await?;
        let html = read_text(response, &url).await?;

        find_go_import(&html, import_path).ok_or_else(|| {
            ErrorKind::NotFound(format!("no go-import meta tag for {import_path}"))
        })
    }
}

/// Repository root for import paths on [`KNOWN_HOSTS`]
fn known_host_root(import_path: &str) -> Option<Result<String, ErrorKind>> {
    let host = import_path.split('/').next()?;
    if !KNOWN_HOSTS.contains(&host) {
        return None;
    }

    let parts: Vec<&str> = import_path.splitn(4, '/').collect();
    if parts.len() < 3 || parts.iter().take(3).any(|p| p.is_empty()) {
        return Some(Err(ErrorKind::NotFound(format!(
            "invalid import path {import_path}"
        ))));
    }
    Some(Ok(parts[..3].join("/")))
}

/// Picks the `go-import` tag whose prefix covers `import_path`.
fn find_go_import(html: &str, import_path: &str) -> Option<(String, String)> {
    META_TAG.find_iter(html).find_map(|tag| {
        let mut name = None;
        let mut content = None;
        for cap in META_ATTR.captures_iter(tag.as_str()) {
            match cap[1].to_ascii_lowercase().as_str() {
                "name" => name = Some(cap[2].to_string()),
                _ => content = Some(cap[2].to_string()),
            }
        }
        if name.as_deref() != Some("go-import") {
            return None;
        }

        let content = content?;
        let fields: Vec<&str> = content.split_whitespace().collect();
        let [prefix, vcs, repo] = fields[..] else {
            return None;
        };
        let covers = import_path == prefix
            || import_path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'));
        (covers && vcs == "git").then(|| (prefix.to_string(), repo.to_string()))
    })
}

#[async_trait]
impl SourceLocator for GoLocator {
    async fn detect_source(&self, identity: &PackageIdentity) -> Result<String, ErrorKind> {
        let import_path = [identity.namespace(), Some(identity.name()), identity.subpath()]
            .into_iter()
            .flatten()
            .map(|s| s.trim_matches('/'))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/");

        let (root, repo) = match known_host_root(&import_path) {
            Some(root) => {
                let root = root?;
                let repo = format!("https://{root}");
                (root, repo)
            }
            None => self.discover(&import_path).await?,
        };

        // Everything below the repository root is a directory of the
        // repository, including a major-version suffix such as `/v2`.
        let rest = import_path[root.len()..].trim_matches('/');
        if rest.is_empty() {
            Ok(repo)
        } else {
            Ok(format!("{repo}//{rest}"))
        }
    }
}
