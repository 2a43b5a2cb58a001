//! The space estimator: the core's key algorithm.
//!
//! Given the guest's mounted-filesystem free space and the overlays'
//! virtual sizes, produce a conservative per-overlay upper bound on the
//! bytes the target will need once fstrim and non-zero-sector copying have
//! run. Skipped entirely in in-place mode.

use crate::inspect::is_trim_eligible;
use crate::mountstats::MountpointStats;
use crate::overlay::Overlay;

/// Run the estimator over `mounts`/`overlays`, writing results into each
/// overlay's `stats.estimated_size`.
///
/// If the overlays' combined virtual size is zero, estimation is skipped
/// without error: there is nothing to scale the filesystem savings onto.
pub fn estimate(mounts: &[MountpointStats], overlays: &[Overlay]) {
    let src_total: u64 = overlays.iter().map(|ov| ov.virtual_size).sum();
    if src_total == 0 {
        return;
    }

    let fs_total: u64 = mounts.iter().map(|m| m.total_bytes()).sum();
    let ratio = fs_total as f64 / src_total as f64;

    let fs_free: u64 = mounts
        .iter()
        .filter(|m| is_trim_eligible(&m.fs_type))
        .map(|m| m.free_bytes())
        .sum();

    let scaled_saving = (fs_free as f64 * ratio).floor() as u64;

    for overlay in overlays {
        let p = overlay.virtual_size as f64 / src_total as f64;
        let apportioned_saving = (p * scaled_saving as f64).floor() as u64;
        let estimated = overlay.virtual_size.saturating_sub(apportioned_saving);
        overlay.stats.estimated_size.set(Some(estimated));
    }
}
