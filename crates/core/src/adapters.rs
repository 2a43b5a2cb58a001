//! Output adapter contract, and the target-side data model.
//!
//! [`crate::source::InputAdapter`] lives in [`crate::source`] next to the
//! data it produces; this module holds everything target-facing.

use crate::capabilities::GrantedCapabilities;
use crate::inspect::Inspect;
use crate::overlay::Overlay;
use crate::planner::{TargetBusAssignment, TargetFirmware};
use crate::source::{Firmware, Source};
use camino::Utf8PathBuf;
use color_eyre::Result;
use std::collections::HashSet;

/// Where a target disk is destined: a local path, or an opaque URI handled
/// entirely by the output adapter (e.g. a remote upload slot).
#[derive(Debug, Clone)]
pub enum TargetFile {
    /// A local filesystem path (regular file or block device).
    Path(Utf8PathBuf),
    /// An opaque URI the output adapter alone understands.
    Uri(String),
}

/// One target disk: where it is written, in what format, and the overlay it
/// was copied from.
#[derive(Debug)]
pub struct TargetDisk {
    /// Destination for this disk.
    pub file: TargetFile,
    /// Chosen output format (`raw` or `qcow2`, per [`crate::format`]).
    pub format: String,
    /// The overlay this target was copied from.
    pub overlay: Overlay,
}

/// Preallocation strategy passed to `disk_create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preallocation {
    /// `-oa sparse`.
    Sparse,
    /// `-oa preallocated`.
    Full,
}

/// A read-only view of the output adapter, handed to conversion modules so
/// they can query target-side configuration without being able to mutate it.
pub trait OutputView {
    /// Firmware kinds this output supports.
    fn supported_firmware(&self) -> HashSet<Firmware>;
}

/// The output adapter contract.
pub trait OutputAdapter: OutputView {
    /// Validate prerequisites before doing any work.
    fn precheck(&self) -> Result<()>;

    /// Human description of this adapter's configuration, for messages.
    fn as_options(&self) -> String;

    /// Give the output a chance to reject a firmware choice outright.
    fn check_target_firmware(&self, caps: &GrantedCapabilities, firmware: Firmware) -> Result<()>;

    /// Per-overlay output format override, if the adapter has an opinion.
    fn override_output_format(&self, overlay: &Overlay) -> Option<String>;

    /// Decide destination paths/URIs for each planned disk.
    ///
    /// Must return exactly one entry per input disk; a length mismatch is a
    /// programming error and is asserted against by the copy engine rather
    /// than handled as a recoverable error.
    fn prepare_targets(
        &mut self,
        name: &str,
        disks: &[(String, &Overlay)],
        caps: &GrantedCapabilities,
    ) -> Result<Vec<TargetFile>>;

    /// Create one output disk ahead of the copy.
    fn disk_create(
        &self,
        target: &TargetFile,
        format: &str,
        size: u64,
        preallocation: Option<Preallocation>,
        compat: Option<&str>,
    ) -> Result<()>;

    /// Format the copier should emit for this target; may differ from the
    /// final on-disk format when the adapter streams or re-wraps the image.
    fn transfer_format(&self, target: &TargetFile, format: &str) -> String;

    /// Per-disk callback fired immediately after each disk finishes copying.
    fn disk_copied(&mut self, target: &TargetFile, index: usize, total: usize) -> Result<()>;

    /// Emit final VM/domain metadata once every disk has copied.
    fn create_metadata(
        &mut self,
        source: &Source,
        targets: &[TargetDisk],
        buses: &TargetBusAssignment,
        caps: &GrantedCapabilities,
        inspect: &Inspect,
        firmware: TargetFirmware,
    ) -> Result<()>;
}
