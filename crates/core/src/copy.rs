//! The copy engine: pre-create, convert, measure, notify, one disk at a
//! time, in order.

use crate::adapters::{OutputAdapter, Preallocation, TargetDisk, TargetFile};
use crate::overlay::Overlay;
use crate::qemu_img::{self, ConvertOptions};
use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use tracing::info;

/// A planned target: the overlay it comes from, the chosen format, and the
/// flags that control how it's created and transferred.
///
/// Compression and format compatibility must already have been validated by
/// [`crate::format::check_compression_compatible`] before this is built.
#[derive(Debug)]
pub struct PlannedTarget<'a> {
    /// Source overlay.
    pub overlay: &'a Overlay,
    /// Output format chosen by [`crate::format::resolve_format`].
    pub format: String,
    /// Preallocation strategy, if the CLI requested one.
    pub preallocation: Option<Preallocation>,
    /// Whether the user requested compression (`--compressed`).
    pub compressed: bool,
}

/// Copy every planned target, in order, via the output adapter.
///
/// `targets` (the destinations from `prepare_targets`) must have exactly
/// one entry per `planned`; a mismatch is a programming error, so this
/// asserts rather than returning a recoverable error.
pub fn copy_all(
    output: &mut dyn OutputAdapter,
    planned: &[PlannedTarget<'_>],
    targets: Vec<TargetFile>,
) -> Result<Vec<TargetDisk>> {
    assert_eq!(
        planned.len(),
        targets.len(),
        "prepare_targets returned {} entries for {} planned disks",
        targets.len(),
        planned.len()
    );

    let total = planned.len();
    let mut results = Vec::with_capacity(total);

    for (index, (plan, target)) in planned.iter().zip(targets.into_iter()).enumerate() {
        copy_one(output, plan, &target, index, total)?;
        results.push(TargetDisk {
            file: target,
            format: plan.format.clone(),
            overlay: clone_overlay(plan.overlay),
        });
    }

    Ok(results)
}

fn clone_overlay(overlay: &Overlay) -> Overlay {
    Overlay {
        source_disk: overlay.source_disk.clone(),
        path: overlay.path.clone(),
        device_name: overlay.device_name.clone(),
        virtual_size: overlay.virtual_size,
        stats: crate::overlay::OverlayStats {
            estimated_size: overlay.stats.estimated_size.clone(),
            actual_size: overlay.stats.actual_size.clone(),
        },
    }
}

fn copy_one(
    output: &mut dyn OutputAdapter,
    plan: &PlannedTarget<'_>,
    target: &TargetFile,
    index: usize,
    total: usize,
) -> Result<()> {
    // Sanity check against image-tool corruption.
    let overlay_info = qemu_img::info(&plan.overlay.path)?;
    if overlay_info.backing_filename.is_none() && overlay_info.full_backing_filename.is_none() {
        return Err(eyre!(
            "overlay {} lost its backing file before copy",
            plan.overlay.path
        ));
    }

    if let TargetFile::Path(path) = target {
        if !path.exists() || !is_block_device(path) {
            let compat = (plan.format == "qcow2").then_some("1.1");
            output.disk_create(
                target,
                &plan.format,
                plan.overlay.virtual_size,
                plan.preallocation,
                compat,
            )?;
        }
    }

    let transfer_format = output.transfer_format(target, &plan.format);

    let dest_path: Utf8PathBuf = match target {
        TargetFile::Path(path) => path.clone(),
        TargetFile::Uri(uri) => uri.as_str().into(),
    };

    info!(
        "copying disk {}/{} ({} -> {})",
        index + 1,
        total,
        plan.overlay.path,
        dest_path
    );

    qemu_img::convert(&ConvertOptions {
        source: &plan.overlay.path,
        dest: &dest_path,
        dest_format: &transfer_format,
        compressed: plan.compressed,
    })?;

    if let TargetFile::Path(path) = target {
        if let Ok(info) = qemu_img::info(path) {
            plan.overlay.stats.actual_size.set(info.actual_size);
        }
    }

    output.disk_copied(target, index, total)?;
    Ok(())
}

fn is_block_device(path: &Utf8Path) -> bool {
    std::fs::metadata(path.as_std_path())
        .map(|meta| {
            use std::os::unix::fs::FileTypeExt;
            meta.file_type().is_block_device()
        })
        .unwrap_or(false)
}
