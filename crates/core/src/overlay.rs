//! Overlay construction and the base-26 device-name generator.

use crate::qemu_img;
use crate::source::SourceDisk;
use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use std::cell::Cell;
use tracing::debug;

/// Per-overlay size bookkeeping, filled in long after creation by the
/// estimator and the copy engine.
///
/// Modeled as an interior-mutable cell: the overlay is an owned value
/// threaded through the whole pipeline, and its stats are updated in place
/// rather than rebuilt at each stage.
#[derive(Debug, Default)]
pub struct OverlayStats {
    /// Upper-bound estimate computed by the estimator, if estimation ran.
    pub estimated_size: Cell<Option<u64>>,
    /// Actual bytes written to the target, measured after the copy completes.
    pub actual_size: Cell<Option<u64>>,
}

/// A copy-on-write qcow2 overlay layered over one source disk.
#[derive(Debug)]
pub struct Overlay {
    /// The `SourceDisk` this overlay shields from mutation.
    pub source_disk: SourceDisk,
    /// Path to the freshly created qcow2 overlay file.
    pub path: Utf8PathBuf,
    /// Synthetic device name assigned to this overlay (`sda`, `sdb`, ...).
    pub device_name: String,
    /// Virtual size of the backing file, in bytes. Always > 0.
    pub virtual_size: u64,
    /// Mutable size bookkeeping.
    pub stats: OverlayStats,
}

/// Generate the `n`th device-name suffix in the `a, b, ..., z, aa, ab, ...`
/// sequence.
///
/// This is a base-26 counting sequence with a leading-letter shift, not a
/// literal base-26 positional encoding: after `z` comes `aa`, not `ba`,
/// because there is no "zero" letter. Conversion modules depend on this
/// exact sequence for device remapping.
pub fn device_suffix(mut n: u32) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push((b'a' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    letters.iter().rev().collect()
}

/// `sd` + [`device_suffix`].
pub fn device_name(n: u32) -> String {
    format!("sd{}", device_suffix(n))
}

/// Create one overlay per source disk in `temp_dir`.
///
/// The returned overlays are in the same
/// order as `disks`. Callers are responsible for registering each overlay
/// path with a [`crate::cleanup::CleanupGuard`] before this returns control,
/// since overlay creation itself can partially fail.
pub fn create_overlays(disks: &[SourceDisk], temp_dir: &Utf8Path) -> Result<Vec<Overlay>> {
    let mut overlays = Vec::with_capacity(disks.len());
    for (i, disk) in disks.iter().enumerate() {
        let i = i as u32;
        let path = temp_dir.join(format!("overlay-{}.qcow2", device_name(i)));
        debug!("creating overlay {} for disk {}", path, disk.uri);

        qemu_img::create_overlay(&path, &disk.uri, disk.format.as_deref())?;

        let info = qemu_img::info(&path)?;
        if info.full_backing_filename.is_none() && info.backing_filename.is_none() {
            return Err(eyre!(
                "overlay {path} was created without a backing file, this should not happen"
            ));
        }

        let virtual_size = backing_virtual_size(&path)?;
        if virtual_size == 0 {
            return Err(eyre!(
                "source disk {} has a virtual size of 0 bytes; this can happen when reading \
                 a block device over ssh without the expected permissions",
                disk.uri
            ));
        }

        overlays.push(Overlay {
            source_disk: disk.clone(),
            path,
            device_name: device_name(i),
            virtual_size,
            stats: OverlayStats::default(),
        });
    }
    Ok(overlays)
}

fn backing_virtual_size(overlay_path: &Utf8Path) -> Result<u64> {
    let info = qemu_img::info(overlay_path)?;
    Ok(info.virtual_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_suffix_is_a_bijection_through_the_alphabet() {
        assert_eq!(device_suffix(0), "a");
        assert_eq!(device_suffix(1), "b");
        assert_eq!(device_suffix(25), "z");
        assert_eq!(device_suffix(26), "aa");
        assert_eq!(device_suffix(27), "ab");
        assert_eq!(device_suffix(51), "az");
        assert_eq!(device_suffix(52), "ba");
        assert_eq!(device_suffix(701), "zz");
        assert_eq!(device_suffix(702), "aaa");
    }

    #[test]
    fn device_suffix_values_are_distinct_for_first_thousand() {
        let mut seen = std::collections::HashSet::new();
        for n in 0..1000 {
            assert!(seen.insert(device_suffix(n)), "duplicate at {n}");
        }
    }

    #[test]
    fn device_name_prefixes_with_sd() {
        assert_eq!(device_name(0), "sda");
        assert_eq!(device_name(26), "sdaa");
    }
}
