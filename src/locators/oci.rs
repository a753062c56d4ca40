//! Source locator for OCI images
//!
//! Reads the `org.opencontainers.image.source` label (or manifest
//! annotation) through the registry's distribution API. Anonymous bearer
//! tokens are requested when the registry answers with a challenge.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{ACCEPT, AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use url::Url;

use super::{SourceLocator, check_status, read_json};
use crate::error::ErrorKind;
use crate::purl::{PackageIdentity, REPOSITORY_URL};

const IMAGE_SOURCE: &str = "org.opencontainers.image.source";
const DEFAULT_TAG: &str = "latest";

const MANIFEST_TYPES: &str = "application/vnd.oci.image.index.v1+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.docker.distribution.manifest.v2+json";

static CHALLENGE_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)="([^"]*)""#).expect("invalid regex"));

/// Finds the source repository of a container image
pub struct OciLocator {
    client: Arc<Client>,
}

impl OciLocator {
    pub fn with_client(client: Arc<Client>) -> Self {
        Self { client }
    }

    pub fn http_client(&self) -> Arc<Client> {
        Arc::clone(&self.client)
    }
}

// Distribution API structures
#[derive(Debug, Deserialize)]
struct Manifest {
    /// Present on image indexes and manifest lists
    manifests: Option<Vec<Descriptor>>,
    config: Option<Descriptor>,
    annotations: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: String,
    platform: Option<Platform>,
}

#[derive(Debug, Deserialize)]
struct Platform {
    os: Option<String>,
    architecture: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageConfig {
    config: Option<ContainerConfig>,
}

#[derive(Debug, Deserialize)]
struct ContainerConfig {
    #[serde(rename = "Labels")]
    labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// One repository on one registry, with the token obtained so far
struct RegistrySession<'a> {
    client: &'a Client,
    base_url: String,
    repository: String,
    token: Option<String>,
}

impl<'a> RegistrySession<'a> {
    /// Splits `host[:port]/path` into a registry endpoint and repository.
    fn open(client: &'a Client, repository_url: &str) -> Result<Self, ErrorKind> {
        let invalid = |reason: &str| ErrorKind::InvalidIdentity {
            identity: repository_url.to_string(),
            reason: reason.to_string(),
        };
        let (host, repository) = repository_url
            .trim_matches('/')
            .split_once('/')
            .ok_or_else(|| invalid("repository_url must be <registry>/<repository>"))?;
        if host.is_empty() || repository.is_empty() {
            return Err(invalid("repository_url must be <registry>/<repository>"));
        }

        let (host, repository) = match host {
            "docker.io" | "index.docker.io" if !repository.contains('/') => {
                ("registry-1.docker.io", format!("library/{repository}"))
            }
            "docker.io" | "index.docker.io" => ("registry-1.docker.io", repository.to_string()),
            _ => (host, repository.to_string()),
        };

        let hostname = host.split(':').next().unwrap_or(host);
        let scheme = if matches!(hostname, "localhost" | "127.0.0.1") {
            "http"
        } else {
            "https"
        };

        Ok(Self {
            client,
            base_url: format!("{scheme}://{host}"),
            repository,
            token: None,
        })
    }

    fn request(&self, url: &str, accept: Option<&str>) -> reqwest::RequestBuilder {
        let mut request = self.client.get(url);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        request
    }

    async fn get(&mut self, path: &str, accept: Option<&str>) -> Result<(Response, String), ErrorKind> {
        let url = format!("{}/v2/{}/{path}", self.base_url, self.repository);
        tracing::debug!(url, "Querying registry");

        let upstream = |e: reqwest::Error| ErrorKind::UpstreamUnavailable(format!("{url}: {e}"));
        let response = self.request(&url, accept).send().await.map_err(upstream)?;

        if response.status() == StatusCode::UNAUTHORIZED && self.token.is_none() {
            let challenge = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            if let Some(challenge) = challenge {
                self.token = Some(self.authenticate(&challenge).await?);
                let response = self.request(&url, accept).send().await.map_err(upstream)?;
                return Ok((check_status(response, &url)?, url));
            }
        }

        Ok((check_status(response, &url)?, url))
    }

    /// Answers a `Bearer realm="...",service="...",scope="..."` challenge.
    async fn authenticate(&self, challenge: &str) -> Result<String, ErrorKind> {
        let params: HashMap<String, String> = CHALLENGE_PARAM
            .captures_iter(challenge)
            .map(|c| (c[1].to_ascii_lowercase(), c[2].to_string()))
            .collect();
        let realm = params.get("realm").ok_or_else(|| {
            ErrorKind::UpstreamUnavailable(format!("unsupported auth challenge: {challenge}"))
        })?;

        let scope = params
            .get("scope")
            .cloned()
            .unwrap_or_else(|| format!("repository:{}:pull", self.repository));
        let mut query = vec![("scope", scope.as_str())];
        if let Some(service) = params.get("service") {
            query.push(("service", service.as_str()));
        }
        let url = Url::parse_with_params(realm, &query)
            .map_err(|e| ErrorKind::MalformedResponse(format!("auth realm {realm:?}: {e}")))?;
        let url = url.to_string();

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ErrorKind::UpstreamUnavailable(format!("{url}: {e}")))?;
        let body: TokenResponse = read_json(check_status(response, &url)?, &url).await?;
        body.token
            .or(body.access_token)
            .ok_or_else(|| ErrorKind::MalformedResponse(format!("{url}: no token in response")))
    }

    async fn manifest(&mut self, reference: &str) -> Result<Manifest, ErrorKind> {
        let (response, url) = self
            .get(&format!("manifests/{reference}"), Some(MANIFEST_TYPES))
            .await?;
        read_json(response, &url).await
    }

    async fn labels(&mut self, config_digest: &str) -> Result<HashMap<String, String>, ErrorKind> {
        let (response, url) = self.get(&format!("blobs/{config_digest}"), None).await?;
        let config: ImageConfig = read_json(response, &url).await?;
        Ok(config.config.and_then(|c| c.labels).unwrap_or_default())
    }
}

/// Prefers linux/amd64, otherwise the first entry of an image index.
fn pick_platform(manifests: &[Descriptor]) -> Option<&Descriptor> {
    manifests
        .iter()
        .find(|d| {
            d.platform.as_ref().is_some_and(|p| {
                p.os.as_deref() == Some("linux") && p.architecture.as_deref() == Some("amd64")
            })
        })
        .or_else(|| manifests.first())
}

#[async_trait]
impl SourceLocator for OciLocator {
    async fn detect_source(&self, identity: &PackageIdentity) -> Result<String, ErrorKind> {
        let repository_url =
            identity
                .qualifier(REPOSITORY_URL)
                .ok_or_else(|| ErrorKind::InvalidIdentity {
                    identity: identity.to_string(),
                    reason: "repository_url not found".to_string(),
                })?;
        let tag = identity.qualifier("tag").unwrap_or(DEFAULT_TAG);
        let reference = format!("{repository_url}:{tag}");

        let mut session = RegistrySession::open(&self.client, repository_url)?;
        let mut manifest = session.manifest(tag).await?;
        if let Some(entries) = &manifest.manifests {
            let digest = pick_platform(entries)
                .map(|d| d.digest.clone())
                .ok_or_else(|| ErrorKind::NotFound(format!("empty image index for {reference}")))?;
            manifest = session.manifest(&digest).await?;
        }

        if let Some(config) = &manifest.config {
            let labels = session.labels(&config.digest).await?;
            if let Some(src) = labels.get(IMAGE_SOURCE) {
                tracing::info!(label = IMAGE_SOURCE, value = %src, "Found an image label");
                return Ok(src.clone());
            }
        }

        if let Some(src) = manifest.annotations.as_ref().and_then(|a| a.get(IMAGE_SOURCE)) {
            tracing::info!(annotation = IMAGE_SOURCE, value = %src, "Found an image annotation");
            return Ok(src.clone());
        }

        Err(ErrorKind::NotFound(format!("{IMAGE_SOURCE} not found in {reference}")))
    }
}
