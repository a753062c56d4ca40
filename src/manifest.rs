//! Per-package manifest (`manifest.json`)
//!
//! A manifest lists the VEX files harvested for one package and where each
//! came from. Field names are fixed by the hub format:
//!
//! ```json
//! {
//!     "ID": "pkg:npm/debug",
//!     "Sources": [
//!         {
//!             "Path": "openvex.json",
//!             "URL": "https://github.com/debug-js/debug/blob/<commit>/.vex/openvex.json"
//!         }
//!     ]
//! }
//! ```

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ErrorKind;

/// Name of the manifest file in every curated package directory
pub const FILE_NAME: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Canonical PURL of the package
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Sources", default, deserialize_with = "null_as_empty")]
    pub sources: Vec<Source>,
}

/// Provenance of one harvested file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Location of the file inside the package directory
    #[serde(rename = "Path")]
    pub path: String,
    /// Permalink to the originating file, or the repository URL
    #[serde(rename = "URL")]
    pub url: String,
}

/// Manifests written by older crawlers may carry `"Sources": null`.
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Source>, D::Error> {
    Ok(Option::<Vec<Source>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Writes `manifest` to `path`, replacing any existing file.
pub fn write(path: &Path, manifest: &Manifest) -> Result<(), ErrorKind> {
    let persist = |reason: String| ErrorKind::PersistFailure {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::create(path).map_err(|e| persist(e.to_string()))?;
    let mut writer = BufWriter::new(file);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut writer, formatter);
    manifest
        .serialize(&mut serializer)
        .map_err(|e| persist(e.to_string()))?;
    writer
        .write_all(b"\n")
        .and_then(|()| writer.flush())
        .map_err(|e| persist(e.to_string()))
}

/// Reads the manifest at `path`.
pub fn read(path: &Path) -> Result<Manifest, ErrorKind> {
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound(format!("manifest {}", path.display())),
        _ => ErrorKind::io("read manifest", path, e),
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ErrorKind::CorruptManifest {
        path: path.to_path_buf(),
        source,
    })
}
