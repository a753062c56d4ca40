//! Fetchers materialize a [`SourceDescriptor`] as a local directory

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BoxError;
use crate::git::Git;
use crate::source::SourceDescriptor;

/// Where a fetched snapshot came from, used to build permalinks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub remote_url: String,
    pub commit: String,
}

/// Retrieves repository snapshots.
///
/// `fetch` must create `dest` and fill it with the repository root addressed
/// by the descriptor; the descriptor's subdirectory is resolved by the caller.
/// Errors are opaque. Dropping the returned future cancels the fetch.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source: &SourceDescriptor, dest: &Path) -> Result<(), BoxError>;

    /// Remote and commit of a snapshot produced by [`fetch`](Fetcher::fetch).
    /// `None` when they cannot be determined.
    async fn origin(&self, _snapshot: &Path) -> Option<Origin> {
        None
    }
}

/// Shallow `git clone` fetcher
#[derive(Debug, Clone, Default)]
pub struct GitFetcher {
    git: Git,
}

impl GitFetcher {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            git: Git::with_timeout(timeout),
        }
    }
}

#[async_trait]
impl Fetcher for GitFetcher {
    async fn fetch(&self, source: &SourceDescriptor, dest: &Path) -> Result<(), BoxError> {
        self.git
            .clone_shallow(source.repo_url(), source.git_ref(), dest)
            .await?;
        Ok(())
    }

    async fn origin(&self, snapshot: &Path) -> Option<Origin> {
        let remote_url = self.git.remote_url(snapshot).await;
        let commit = self.git.head_commit(snapshot).await;
        match (remote_url, commit) {
            (Ok(remote_url), Ok(commit)) if !commit.is_empty() => Some(Origin { remote_url, commit }),
            (Err(e), _) | (_, Err(e)) => {
                tracing::debug!(error = %e, snapshot = %snapshot.display(), "No git origin for snapshot");
                None
            }
            _ => None,
        }
    }
}
