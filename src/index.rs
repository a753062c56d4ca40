//! Collection index (`index.json`)
//!
//! The index lists every harvested package with the location of its primary
//! VEX document. It is rebuilt from the manifests on every run; a manifest
//! that cannot be read aborts the build so a partial index is never written.

use std::borrow::Cow;
use std::ffi::OsStr;
use std::io::Write;
use std::iter;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use walkdir::{DirEntry, WalkDir};

use crate::error::{Context, ErrorKind, Result, ResultExt};
use crate::manifest;

/// Name of the index file at the hub root
pub const FILE_NAME: &str = "index.json";

/// Format version written to the index
pub const INDEX_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    pub packages: Vec<IndexEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Canonical PURL of the package
    pub id: String,
    /// Path of the package's first VEX document, relative to the hub root
    pub location: String,
}

fn is_hidden_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() && entry.file_name().to_string_lossy().starts_with('.')
}

/// Scans every manifest under `root`.
pub fn build(root: &Path) -> Result<Index> {
    let ctx = Context::new().with("root", root.display());
    let mut packages = Vec::new();

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden_dir(e));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            ErrorKind::io("walk", path, e.into()).at(&ctx)
        })?;
        if !entry.file_type().is_file() || entry.file_name() != OsStr::new(manifest::FILE_NAME) {
            continue;
        }

        let path = entry.path();
        let manifest = manifest::read(path).at(&ctx.with("path", path.display()))?;
        let Some(first) = manifest.sources.first() else {
            tracing::debug!(path = %path.display(), "Skipping manifest without sources");
            continue;
        };

        let dir = path.parent().unwrap_or(root);
        let rel = dir.strip_prefix(root).unwrap_or(dir);
        let location = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .chain(iter::once(Cow::Borrowed(first.path.as_str())))
            .collect::<Vec<_>>()
            .join("/");

        packages.push(IndexEntry {
            id: manifest.id,
            location,
        });
    }

    Ok(Index {
        version: INDEX_VERSION,
        updated_at: Utc::now(),
        packages,
    })
}

/// Atomically replaces `<root>/index.json`.
pub fn write(root: &Path, index: &Index) -> Result<()> {
    let path = root.join(FILE_NAME);
    let ctx = Context::new().with("path", path.display());
    let persist = |reason: String| {
        ErrorKind::PersistFailure {
            path: path.clone(),
            reason,
        }
        .at(&ctx)
    };

    let mut tmp = NamedTempFile::new_in(root).map_err(|e| persist(e.to_string()))?;
    serde_json::to_writer_pretty(&mut tmp, index).map_err(|e| persist(e.to_string()))?;
    tmp.write_all(b"\n").map_err(|e| persist(e.to_string()))?;
    tmp.persist(&path).map_err(|e| persist(e.error.to_string()))?;
    Ok(())
}

/// Builds and writes the index, returning it.
pub fn generate(root: &Path) -> Result<Index> {
    tracing::info!(root = %root.display(), "Generating the index of the VEX Hub");
    let index = build(root)?;
    write(root, &index)?;
    tracing::info!(packages = index.packages.len(), "Index written");
    Ok(index)
}
