//! Source locator for the npm registry

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{SourceLocator, read_json, send};
use crate::error::ErrorKind;
use crate::purl::PackageIdentity;

const DEFAULT_BASE_URL: &str = "https://registry.npmjs.org";

/// Reads `repository` from the npm package document
pub struct NpmLocator {
    client: Arc<Client>,
    base_url: String,
}

impl NpmLocator {
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
struct PackageResponse {
    repository: Option<Repository>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Repository {
    String(String),
    Object {
        url: Option<String>,
        directory: Option<String>,
    },
}

impl Repository {
    fn url(&self) -> Option<String> {
        match self {
            Repository::String(s) => expand_shorthand(s),
            Repository::Object { url, directory } => {
                let url = expand_shorthand(url.as_deref()?)?;
                match directory.as_deref().map(|d| d.trim_matches('/')) {
                    Some(dir) if !dir.is_empty() => Some(format!("{url}//{dir}")),
                    _ => Some(url),
                }
            }
        }
    }
}

/// Expands npm repository shorthands (`github:owner/repo`, `owner/repo`, ...)
fn expand_shorthand(repo: &str) -> Option<String> {
    let repo = repo.trim();
    if repo.is_empty() {
        return None;
    }

    for (prefix, host) in [
        ("github:", "github.com"),
        ("gitlab:", "gitlab.com"),
        ("bitbucket:", "bitbucket.org"),
    ] {
        if let Some(path) = repo.strip_prefix(prefix) {
            return Some(format!("https://{host}/{path}"));
        }
    }

    // Bare `owner/repo` means GitHub
    if !repo.contains(':') && repo.matches('/').count() == 1 {
        return Some(format!("https://github.com/{repo}"));
    }

    Some(repo.to_string())
}

#[async_trait]
impl SourceLocator for NpmLocator {
    async fn detect_source(&self, identity: &PackageIdentity) -> Result<String, ErrorKind> {
        // Handle scoped packages (@scope/name -> @scope%2fname)
        let package_name = match identity.namespace() {
            Some(scope) => format!("{scope}%2f{}", identity.name()),
            None => identity.name().to_string(),
        };
        let url = format!("{}/{}", self.base_url, package_name);

        let response = send(self.client.get(&url), &url).await?;
        let pkg: PackageResponse = read_json(response, &url).await?;

        pkg.repository
            .as_ref()
            .and_then(Repository::url)
            .ok_or_else(|| ErrorKind::NotFound(format!("no repository URL found for {identity}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locators::http_client::create_shared_client;
    use crate::source::normalize;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn locator(server: &MockServer) -> NpmLocator {
        NpmLocator::with_client(create_shared_client().expect("Failed to create client"))
            .with_base_url(&server.uri())
    }

    #[test]
    fn test_expand_shorthand() {
        assert_eq!(
            expand_shorthand("github:user/repo").as_deref(),
            Some("https://github.com/user/repo")
        );
        assert_eq!(
            expand_shorthand("gitlab:user/repo").as_deref(),
            Some("https://gitlab.com/user/repo")
        );
        assert_eq!(
            expand_shorthand("user/repo").as_deref(),
            Some("https://github.com/user/repo")
        );
        assert_eq!(
            expand_shorthand("git+https://github.com/user/repo.git").as_deref(),
            Some("git+https://github.com/user/repo.git")
        );
        assert_eq!(expand_shorthand("  "), None);
    }

    #[tokio::test]
    async fn test_detect_source_object_repository() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/debug"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"name":"debug","repository":{"type":"git","url":"git://github.com/debug-js/debug.git"}}"#,
            ))
            .mount(&server)
            .await;

        let identity: PackageIdentity = "pkg:npm/debug".parse().unwrap();
        let raw = locator(&server).detect_source(&identity).await.unwrap();
        assert_eq!(raw, "git://github.com/debug-js/debug.git");
        assert_eq!(
            normalize(&raw).unwrap().to_string(),
            "git::https://github.com/debug-js/debug.git?depth=1"
        );
    }

    #[tokio::test]
    async fn test_detect_source_scoped_with_directory() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/@babel%2fparser"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"repository":{"type":"git","url":"https://github.com/babel/babel.git","directory":"packages/babel-parser"}}"#,
            ))
            .mount(&server)
            .await;

        let identity: PackageIdentity = "pkg:npm/%40babel/parser".parse().unwrap();
        let raw = locator(&server).detect_source(&identity).await.unwrap();
        let source = normalize(&raw).unwrap();
        assert_eq!(source.repo_url(), "https://github.com/babel/babel.git");
        assert_eq!(source.subdir(), Some("packages/babel-parser"));
    }

    #[tokio::test]
    async fn test_detect_source_string_repository() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/left-pad"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"repository":"stevemao/left-pad"}"#),
            )
            .mount(&server)
            .await;

        let identity: PackageIdentity = "pkg:npm/left-pad".parse().unwrap();
        let raw = locator(&server).detect_source(&identity).await.unwrap();
        assert_eq!(raw, "https://github.com/stevemao/left-pad");
    }

    #[tokio::test]
    async fn test_detect_source_without_repository() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/debug"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"name":"debug"}"#))
            .mount(&server)
            .await;

        let identity: PackageIdentity = "pkg:npm/debug".parse().unwrap();
        let err = locator(&server).detect_source(&identity).await.unwrap_err();
        assert!(matches!(err, ErrorKind::NotFound(_)));
        assert!(err.to_string().contains("no repository URL found"));
    }

    #[tokio::test]
    async fn test_detect_source_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/garbage"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let locator = locator(&server);

        let missing: PackageIdentity = "pkg:npm/missing".parse().unwrap();
        let err = locator.detect_source(&missing).await.unwrap_err();
        assert!(matches!(err, ErrorKind::NotFound(_)));
        assert!(err.to_string().contains("404"));

        let broken: PackageIdentity = "pkg:npm/broken".parse().unwrap();
        assert!(matches!(
            locator.detect_source(&broken).await,
            Err(ErrorKind::UpstreamUnavailable(_))
        ));

        let garbage: PackageIdentity = "pkg:npm/garbage".parse().unwrap();
        assert!(matches!(
            locator.detect_source(&garbage).await,
            Err(ErrorKind::MalformedResponse(_))
        ));
    }
}
