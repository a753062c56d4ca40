//! VEX harvesting
//!
//! A harvest turns one repository snapshot into the curated directory of one
//! package. It runs in three phases:
//!
//! 1. the repository is fetched into a private temporary directory,
//! 2. every candidate under `<snapshot>/.vex` is decoded and checked against
//!    the package identity before anything in the hub is touched,
//! 3. accepted files and the manifest are staged in a hidden sibling of the
//!    curated directory, which then replaces the old directory.
//!
//! A harvest that fails at any point leaves the previous curated directory
//! as it was.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use crate::error::{Context, ErrorKind, Result, ResultExt};
use crate::fetch::{Fetcher, Origin};
use crate::manifest::{self, Manifest, Source};
use crate::purl::PackageIdentity;
use crate::source::{SourceDescriptor, normalize};
use crate::vex::{VexDocument, is_vex_file_name};

/// Directory of a repository where projects publish their VEX documents
pub const VEX_DIR: &str = ".vex";

const TEMP_PREFIX: &str = "vexhub-crawler-";
const STAGING_PREFIX: &str = ".staging-";

/// Harvests VEX documents into the hub rooted at `root`.
#[derive(Clone)]
pub struct Harvester {
    root: PathBuf,
    fetcher: Arc<dyn Fetcher>,
}

impl Harvester {
    pub fn new(root: impl Into<PathBuf>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            root: root.into(),
            fetcher,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fetches `source` and replaces the curated directory of `identity` with
    /// the VEX documents found in it.
    pub async fn harvest(
        &self,
        identity: &PackageIdentity,
        source: &SourceDescriptor,
        ctx: &Context,
    ) -> Result<Manifest> {
        let curated_dir = identity.curated_dir(&self.root).at(ctx)?;

        let workdir = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir()
            .map_err(|e| ErrorKind::io("create temporary directory", std::env::temp_dir(), e).at(ctx))?;
        let repo_dir = workdir.path().join("snapshot");

        tracing::info!(url = %source, "Fetching repository");
        self.fetcher
            .fetch(source, &repo_dir)
            .await
            .map_err(|e| ErrorKind::FetchFailed(e).at(ctx))?;

        let permalink_base = self
            .fetcher
            .origin(&repo_dir)
            .await
            .and_then(|origin| origin_permalink_base(&origin));

        let snapshot_root = match source.subdir() {
            Some(subdir) => repo_dir.join(subdir),
            None => repo_dir.clone(),
        };

        let curation = Curation {
            identity: identity.clone(),
            curated_dir: curated_dir.clone(),
            repo_dir,
            snapshot_root,
            permalink_base,
            fallback_url: source.browse_url(),
        };
        let task_ctx = ctx.clone();

        // The temporary directory moves into the task so it is removed once
        // curation ends, even if this future is dropped first.
        tokio::task::spawn_blocking(move || {
            let result = curation.run(&task_ctx);
            drop(workdir);
            result
        })
        .await
        .map_err(|e| {
            tracing::error!("Curation task failed: {e}");
            ErrorKind::PersistFailure {
                path: curated_dir,
                reason: format!("curation task failed: {e}"),
            }
            .at(ctx)
        })?
    }
}

/// `https://<host>/<owner>/<repo>/blob/<commit>/` for snapshots cloned from
/// a known hosting service.
fn origin_permalink_base(origin: &Origin) -> Option<String> {
    normalize(&origin.remote_url)
        .ok()?
        .permalink_base(&origin.commit)
}

/// Everything the blocking part of a harvest needs
struct Curation {
    identity: PackageIdentity,
    curated_dir: PathBuf,
    repo_dir: PathBuf,
    snapshot_root: PathBuf,
    permalink_base: Option<String>,
    fallback_url: String,
}

/// A validated candidate
struct Accepted {
    path: PathBuf,
    file_name: String,
}

impl Curation {
    fn run(&self, ctx: &Context) -> Result<Manifest> {
        let accepted = self.select(ctx)?;
        if accepted.is_empty() {
            return Err(ErrorKind::NoVexFound.at(ctx));
        }
        self.install(&accepted, ctx)
    }

    /// Decodes and filters every candidate. Nothing is modified.
    fn select(&self, ctx: &Context) -> Result<Vec<Accepted>> {
        let candidates = find_candidates(&self.snapshot_root.join(VEX_DIR)).at(ctx)?;
        let mut accepted = Vec::new();
        let mut seen = HashSet::new();

        for path in candidates {
            let file_ctx = ctx.with("path", path.display());
            tracing::info!(path = %path.display(), "Parsing VEX file");

            let bytes = fs::read(&path)
                .map_err(|e| ErrorKind::io("read", &path, e))
                .at(&file_ctx)?;
            let document = VexDocument::from_slice(&bytes)
                .map_err(|source| ErrorKind::InvalidDocument {
                    path: path.clone(),
                    source,
                })
                .at(&file_ctx)?;

            if document.statements().is_empty() {
                return Err(ErrorKind::NoStatementsFound { path }.at(&file_ctx));
            }
            if !document.mentions(&self.identity) {
                let mismatch = ErrorKind::PurlMismatch { path };
                tracing::warn!(purl = %self.identity, "{mismatch}, skipping");
                continue;
            }

            let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if !seen.insert(file_name.clone()) {
                tracing::warn!(path = %path.display(), "Another VEX file with the same name was already accepted, skipping");
                continue;
            }
            accepted.push(Accepted { path, file_name });
        }

        Ok(accepted)
    }

    /// Stages accepted files plus the manifest, then swaps the staging
    /// directory in for the curated one.
    fn install(&self, accepted: &[Accepted], ctx: &Context) -> Result<Manifest> {
        let ctx = ctx.with("dir", self.curated_dir.display());
        let parent = self
            .curated_dir
            .parent()
            .ok_or_else(|| ErrorKind::PersistFailure {
                path: self.curated_dir.clone(),
                reason: "curated directory has no parent".to_string(),
            })
            .at(&ctx)?;
        fs::create_dir_all(parent)
            .map_err(|e| ErrorKind::io("create directory", parent, e))
            .at(&ctx)?;

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(parent)
            .map_err(|e| ErrorKind::io("create staging directory in", parent, e))
            .at(&ctx)?;

        let mut sources = Vec::with_capacity(accepted.len());
        for file in accepted {
            move_file(&file.path, &staging.path().join(&file.file_name))
                .map_err(|e| ErrorKind::io("move", &file.path, e))
                .at(&ctx)?;
            sources.push(Source {
                path: file.file_name.clone(),
                url: self.source_url(&file.path),
            });
            tracing::info!(file = %file.file_name, "Accepted VEX file");
        }

        let manifest = Manifest {
            id: self.identity.to_string(),
            sources,
        };
        manifest::write(&staging.path().join(manifest::FILE_NAME), &manifest).at(&ctx)?;

        if self.curated_dir.exists() {
            fs::remove_dir_all(&self.curated_dir)
                .map_err(|e| ErrorKind::io("remove", &self.curated_dir, e))
                .at(&ctx)?;
        }
        let staged = staging.keep();
        if let Err(e) = fs::rename(&staged, &self.curated_dir) {
            let _ = fs::remove_dir_all(&staged);
            return Err(ErrorKind::io("rename staging directory to", &self.curated_dir, e).at(&ctx));
        }

        Ok(manifest)
    }

    /// Permalink to `path` when the origin is a hosting service, otherwise
    /// the repository URL.
    fn source_url(&self, path: &Path) -> String {
        let Some(base) = &self.permalink_base else {
            return self.fallback_url.clone();
        };
        let rel = path.strip_prefix(&self.repo_dir).unwrap_or(path);
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        format!("{base}{rel}")
    }
}

/// VEX candidates below `vex_dir`, in path order. Symbolic links are not
/// followed. A missing directory has no candidates.
pub fn find_candidates(vex_dir: &Path) -> std::result::Result<Vec<PathBuf>, ErrorKind> {
    if !vex_dir.is_dir() {
        tracing::debug!(dir = %vex_dir.display(), "No VEX directory in snapshot");
        return Ok(Vec::new());
    }

    let mut candidates = Vec::new();
    for entry in WalkDir::new(vex_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(vex_dir).to_path_buf();
            ErrorKind::io("walk", path, e.into())
        })?;
        if entry.file_type().is_file() && is_vex_file_name(&entry.file_name().to_string_lossy()) {
            candidates.push(entry.into_path());
        }
    }
    Ok(candidates)
}

/// `rename`, falling back to copy and delete across file systems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
        result => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use async_trait::async_trait;

    const COMMIT: &str = "ed76fc6c0e8e56318ce3148bd7bd938aad41491c";

    /// Writes a fixed file set instead of cloning.
    struct FakeFetcher {
        files: Vec<(&'static str, String)>,
        origin: Option<Origin>,
    }

    impl FakeFetcher {
        fn new(files: &[(&'static str, String)]) -> Self {
            Self {
                files: files.to_vec(),
                origin: None,
            }
        }

        fn with_origin(mut self, remote_url: &str) -> Self {
            self.origin = Some(Origin {
                remote_url: remote_url.to_string(),
                commit: COMMIT.to_string(),
            });
            self
        }
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(&self, _source: &SourceDescriptor, dest: &Path) -> std::result::Result<(), BoxError> {
            fs::create_dir_all(dest)?;
            for (rel, content) in &self.files {
                let path = dest.join(rel);
                fs::create_dir_all(path.parent().unwrap())?;
                fs::write(path, content)?;
            }
            Ok(())
        }

        async fn origin(&self, _snapshot: &Path) -> Option<Origin> {
            self.origin.clone()
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl Fetcher for FailingFetcher {
        async fn fetch(&self, _source: &SourceDescriptor, _dest: &Path) -> std::result::Result<(), BoxError> {
            Err("repository not found".into())
        }
    }

    fn vex(product: &str) -> String {
        format!(
            r#"{{"@context":"https://openvex.dev/ns/v0.2.0","@id":"https://openvex.dev/docs/example","author":"test","timestamp":"2024-01-01T00:00:00Z","version":1,
                "statements":[{{"vulnerability":{{"name":"CVE-2024-0001"}},"products":[{{"@id":"{product}"}}],"status":"not_affected","justification":"component_not_present"}}]}}"#
        )
    }

    fn no_statements() -> String {
        r#"{"@context":"https://openvex.dev/ns/v0.2.0","@id":"x","statements":[]}"#.to_string()
    }

    const PURL: &str = "pkg:golang/github.com/example/package@v1.2.3";

    fn identity() -> PackageIdentity {
        PURL.parse().unwrap()
    }

    fn source() -> SourceDescriptor {
        normalize("https://github.com/example/package").unwrap()
    }

    async fn harvest(
        root: &Path,
        fetcher: FakeFetcher,
        identity: &PackageIdentity,
        source: &SourceDescriptor,
    ) -> Result<Manifest> {
        Harvester::new(root, Arc::new(fetcher))
            .harvest(identity, source, &Context::new().with("purl", identity))
            .await
    }

    fn curated(root: &Path) -> PathBuf {
        root.join("pkg/golang/github.com/example/package")
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_harvest_single_matching_file() {
        let root = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::new(&[(".vex/openvex.json", vex(PURL)), ("README.md", "hi".to_string())]);

        let manifest = harvest(root.path(), fetcher, &identity(), &source()).await.unwrap();

        assert_eq!(
            manifest,
            Manifest {
                id: PURL.to_string(),
                sources: vec![Source {
                    path: "openvex.json".to_string(),
                    url: "https://github.com/example/package".to_string(),
                }],
            }
        );
        assert_eq!(listing(&curated(root.path())), ["manifest.json", "openvex.json"]);
        assert_eq!(
            manifest::read(&curated(root.path()).join(manifest::FILE_NAME)).unwrap(),
            manifest
        );
        assert_eq!(
            fs::read_to_string(curated(root.path()).join("openvex.json")).unwrap(),
            vex(PURL)
        );
    }

    #[tokio::test]
    async fn test_harvest_subpath_identity_accepts_module_products() {
        let root = tempfile::tempdir().unwrap();
        let identity: PackageIdentity = "pkg:golang/github.com/example/package#cmd/tool".parse().unwrap();
        let fetcher = FakeFetcher::new(&[(".vex/openvex.json", vex(PURL))]);

        let manifest = harvest(root.path(), fetcher, &identity, &source()).await.unwrap();

        assert_eq!(manifest.sources.len(), 1);
        assert_eq!(manifest.sources[0].path, "openvex.json");
        assert!(curated(root.path()).join("cmd/tool/openvex.json").exists());
    }

    #[tokio::test]
    async fn test_harvest_records_permalink() {
        let root = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::new(&[(".vex/nested/app.openvex.json", vex(PURL))])
            .with_origin("https://github.com/example/package.git");

        let manifest = harvest(root.path(), fetcher, &identity(), &source()).await.unwrap();

        assert_eq!(manifest.sources.len(), 1);
        assert_eq!(manifest.sources[0].path, "app.openvex.json");
        assert_eq!(
            manifest.sources[0].url,
            format!("https://github.com/example/package/blob/{COMMIT}/.vex/nested/app.openvex.json")
        );
    }

    #[tokio::test]
    async fn test_harvest_unknown_host_has_no_permalink() {
        let root = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::new(&[(".vex/openvex.json", vex(PURL))])
            .with_origin("https://git.example.com/example/package.git");
        let source = normalize("git+https://git.example.com/example/package.git").unwrap();

        let manifest = harvest(root.path(), fetcher, &identity(), &source).await.unwrap();
        assert_eq!(manifest.sources[0].url, "https://git.example.com/example/package");
    }

    #[tokio::test]
    async fn test_harvest_subdirectory_source() {
        let root = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::new(&[
            (".vex/openvex.json", vex("pkg:golang/github.com/example/other@v1.2.3")),
            ("tools/cli/.vex/openvex.json", vex(PURL)),
        ])
        .with_origin("https://github.com/example/monorepo");
        let source = normalize("https://github.com/example/monorepo/tree/main/tools/cli").unwrap();

        let manifest = harvest(root.path(), fetcher, &identity(), &source).await.unwrap();
        assert_eq!(
            manifest.sources[0].url,
            format!("https://github.com/example/monorepo/blob/{COMMIT}/tools/cli/.vex/openvex.json")
        );
    }

    #[tokio::test]
    async fn test_zero_statements_fails_whole_harvest() {
        let root = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::new(&[
            (".vex/a.openvex.json", vex(PURL)),
            (".vex/b.openvex.json", no_statements()),
        ]);

        let err = harvest(root.path(), fetcher, &identity(), &source()).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NoStatementsFound { .. }));
        assert!(err.to_string().contains("no statement found"));
        assert!(!curated(root.path()).exists());
    }

    #[tokio::test]
    async fn test_mismatching_files_yield_no_vex_found() {
        let root = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::new(&[
            (".vex/openvex.json", vex("pkg:golang/github.com/other/package@v1.2.3")),
            (".vex/old.vex.json", vex("pkg:golang/github.com/example/package@v1.0.0")),
        ]);

        let err = harvest(root.path(), fetcher, &identity(), &source()).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NoVexFound));
        assert_eq!(err.context().get("purl"), Some(PURL));
    }

    #[tokio::test]
    async fn test_missing_vex_directory() {
        let root = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::new(&[("openvex.json", vex(PURL)), ("docs/vex.json", vex(PURL))]);

        let err = harvest(root.path(), fetcher, &identity(), &source()).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NoVexFound));
    }

    #[tokio::test]
    async fn test_invalid_document_fails() {
        let root = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::new(&[(".vex/openvex.json", "{not json".to_string())]);

        let err = harvest(root.path(), fetcher, &identity(), &source()).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidDocument { .. }));
        assert!(err.context().get("path").is_some_and(|p| p.ends_with("openvex.json")));
    }

    #[tokio::test]
    async fn test_rerun_replaces_curated_directory() {
        let root = tempfile::tempdir().unwrap();

        let first = FakeFetcher::new(&[(".vex/first.openvex.json", vex(PURL))]);
        harvest(root.path(), first, &identity(), &source()).await.unwrap();
        assert_eq!(listing(&curated(root.path())), ["first.openvex.json", "manifest.json"]);

        let second = FakeFetcher::new(&[(".vex/second.openvex.json", vex(PURL))]);
        let manifest = harvest(root.path(), second, &identity(), &source()).await.unwrap();
        assert_eq!(listing(&curated(root.path())), ["manifest.json", "second.openvex.json"]);
        assert_eq!(manifest.sources.len(), 1);
        assert_eq!(manifest.sources[0].path, "second.openvex.json");

        // No staging directories are left behind
        assert_eq!(listing(curated(root.path()).parent().unwrap()), ["package"]);
    }

    #[tokio::test]
    async fn test_failed_harvest_keeps_previous_content() {
        let root = tempfile::tempdir().unwrap();
        let first = FakeFetcher::new(&[(".vex/openvex.json", vex(PURL))]);
        harvest(root.path(), first, &identity(), &source()).await.unwrap();

        let broken = FakeFetcher::new(&[(".vex/openvex.json", no_statements())]);
        assert!(harvest(root.path(), broken, &identity(), &source()).await.is_err());

        assert_eq!(listing(&curated(root.path())), ["manifest.json", "openvex.json"]);
    }

    #[tokio::test]
    async fn test_fetch_failure() {
        let root = tempfile::tempdir().unwrap();
        let harvester = Harvester::new(root.path(), Arc::new(FailingFetcher));

        let err = harvester
            .harvest(&identity(), &source(), &Context::new())
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::FetchFailed(_)));
        assert!(err.to_string().contains("repository not found"));
    }

    #[tokio::test]
    async fn test_duplicate_file_names_keep_first() {
        let root = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::new(&[
            (".vex/a/openvex.json", vex(PURL)),
            (".vex/b/openvex.json", vex(PURL)),
        ])
        .with_origin("https://github.com/example/package");

        let manifest = harvest(root.path(), fetcher, &identity(), &source()).await.unwrap();
        assert_eq!(manifest.sources.len(), 1);
        assert!(manifest.sources[0].url.ends_with("/.vex/a/openvex.json"));
    }

    #[tokio::test]
    async fn test_oci_layout() {
        let root = tempfile::tempdir().unwrap();
        let identity: PackageIdentity = "pkg:oci/trivy?repository_url=ghcr.io/aquasecurity/trivy".parse().unwrap();
        let fetcher = FakeFetcher::new(&[(
            ".vex/trivy.openvex.json",
            vex("pkg:oci/trivy@sha256:abc?repository_url=ghcr.io/aquasecurity/trivy"),
        )]);
        let source = normalize("https://github.com/aquasecurity/trivy").unwrap();

        harvest(root.path(), fetcher, &identity, &source).await.unwrap();
        assert!(
            root.path()
                .join("pkg/oci/ghcr.io/aquasecurity/trivy/trivy.openvex.json")
                .exists()
        );
    }

    #[test]
    fn test_find_candidates_filters_names() {
        let dir = tempfile::tempdir().unwrap();
        let vex_dir = dir.path().join(VEX_DIR);
        for rel in ["openvex.json", "x/vex.json", "y.openvex.json", "notes.json", "z/readme.md"] {
            let path = vex_dir.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "{}").unwrap();
        }

        let found: Vec<String> = find_candidates(&vex_dir)
            .unwrap()
            .iter()
            .map(|p| p.strip_prefix(&vex_dir).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(found, ["openvex.json", "x/vex.json", "y.openvex.json"]);
    }

    #[test]
    fn test_move_file() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.json");
        let to = dir.path().join("b.json");
        fs::write(&from, "content").unwrap();

        move_file(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read_to_string(&to).unwrap(), "content");
    }
}
