//! A reference input adapter that reads a `Source` description from a local
//! JSON manifest next to a set of local disk image files.
//!
//! Declarative options parsed up front, then used to drive subprocesses.

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::Context;
use color_eyre::Result;
use serde::Deserialize;
use v2kvm_core::source::{InputAdapter, Source, SourceDisk};

/// On-disk manifest shape: a `Source` plus the disk list, both deserialized
/// directly via the same field names as the core's data model.
#[derive(Debug, Deserialize)]
struct Manifest {
    source: Source,
    disks: Vec<SourceDisk>,
}

/// Reads a guest description from `<root>/manifest.json` and resolves each
/// disk's URI relative to `root` if it isn't already an absolute `file://`
/// URI.
#[derive(Debug)]
pub struct LocalFileInput {
    root: Utf8PathBuf,
}

impl LocalFileInput {
    /// Point the adapter at a directory containing `manifest.json` and the
    /// disk image files it references.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn manifest_path(&self) -> Utf8PathBuf {
        self.root.join("manifest.json")
    }
}

impl InputAdapter for LocalFileInput {
    fn precheck(&self) -> Result<()> {
        let manifest = self.manifest_path();
        if !manifest.exists() {
            return Err(color_eyre::eyre::eyre!(
                "no manifest.json found under {}",
                self.root
            ));
        }
        Ok(())
    }

    fn as_options(&self) -> String {
        format!("local directory: {}", self.root)
    }

    fn source(&self, _bandwidth_limit: Option<u64>) -> Result<(Source, Vec<SourceDisk>)> {
        let manifest_path = self.manifest_path();
        let raw = std::fs::read_to_string(manifest_path.as_std_path())
            .with_context(|| format!("reading {manifest_path}"))?;
        let manifest: Manifest =
            serde_json::from_str(&raw).with_context(|| format!("parsing {manifest_path}"))?;

        let disks = manifest
            .disks
            .into_iter()
            .map(|mut disk| {
                disk.uri = resolve_uri(&self.root, &disk.uri);
                disk
            })
            .collect();

        Ok((manifest.source, disks))
    }
}

fn resolve_uri(root: &Utf8Path, uri: &str) -> String {
    if uri.contains("://") {
        uri.to_string()
    } else {
        format!("file://{}", root.join(uri))
    }
}
