//! Guest inspection: launching the appliance, decrypting volumes, mounting
//! filesystems, and the guest free-space invariant.

use crate::error::PipelineError;
use crate::mountstats::MountpointStats;
use crate::source::Firmware;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Distribution family as determined by the guest-filesystem appliance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OsFamily {
    /// Any Linux distribution.
    Linux,
    /// Any Windows release.
    Windows,
    /// Unrecognized.
    Unknown,
}

/// The record the appliance produces after mounting the guest's filesystems.
///
/// Treated opaquely by the CORE except for `firmware`, `os_family`, and
/// `distro`: everything else is passed through to the conversion module
/// untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inspect {
    /// Coarse OS family used to pick a conversion module.
    pub os_family: OsFamily,
    /// Distribution tag (e.g. `fedora`, `rhel`, `windows-10`).
    pub distro: String,
    /// Product name string reported by the guest.
    pub product_name: String,
    /// Firmware the appliance determined the guest actually uses.
    pub firmware: Firmware,
    /// Mounted filesystems inside the guest.
    pub mounts: Vec<MountpointStats>,
    /// Opaque extra data the conversion module may need (installed package
    /// lists, bootloader config locations, etc). The CORE never reads this.
    pub opaque: HashMap<String, String>,
}

/// What the guest-filesystem appliance must provide to the inspector.
///
/// Kept as a trait object so the CORE has no compile-time dependency on a
/// concrete appliance implementation; the appliance is an external
/// collaborator.
pub trait ApplianceHandle {
    /// Attach the overlay (or, in in-place mode, source) disk paths the
    /// appliance should present to the guest, in overlay order. Called once,
    /// before `launch`.
    fn attach(&mut self, disk_paths: &[String]) -> Result<()>;

    /// Launch the appliance with the paths from `attach` already wired up.
    fn launch(&mut self) -> Result<()>;

    /// Unlock any encrypted volumes using the supplied `{device -> passphrase}`
    /// map, then mount filesystems and return the resulting `Inspect` record.
    fn inspect(&mut self, passphrases: &HashMap<String, String>) -> Result<Inspect>;

    /// Remount `mount_path` with the `discard` option and run fstrim on it.
    /// A failure here is a warning, never fatal.
    fn fstrim(&mut self, mount_path: &str) -> Result<()>;

    /// Unmount everything and shut the appliance down cleanly.
    fn shutdown(&mut self) -> Result<()>;
}

const BOOT_MIN_BYTES: u64 = 50 * 1024 * 1024;
const ROOT_MIN_BYTES_DEFAULT: u64 = 50 * 1024 * 1024;
const ROOT_MIN_BYTES_NO_BOOT_OR_WINDOWS: u64 = 100 * 1024 * 1024;
const OTHER_MIN_BYTES: u64 = 10 * 1024 * 1024;
const MIN_FREE_INODES: u64 = 100;

/// Enforce the per-mountpoint free-space and free-inode minimums.
///
/// Fatal on any violation. `/boot` requires 50 MiB; `/` requires 50 MiB if
/// there's a separate `/boot` and the guest isn't Windows, else 100 MiB;
/// every other mount requires 10 MiB. Any mount with `files > 0` must also
/// have at least 100 free inodes.
pub fn check_guest_free_space(inspect: &Inspect) -> Result<()> {
    let has_separate_boot = inspect.mounts.iter().any(|m| m.mount_path == "/boot");
    let is_windows = inspect.os_family == OsFamily::Windows;

    for mount in &inspect.mounts {
        let required = match mount.mount_path.as_str() {
            "/boot" => BOOT_MIN_BYTES,
            "/" => {
                if !has_separate_boot && !is_windows {
                    ROOT_MIN_BYTES_DEFAULT
                } else {
                    ROOT_MIN_BYTES_NO_BOOT_OR_WINDOWS
                }
            }
            _ => OTHER_MIN_BYTES,
        };

        let available = mount.free_bytes();
        if available < required {
            return Err(PipelineError::InsufficientGuestSpace {
                mountpoint: mount.mount_path.clone(),
                available,
                required,
            }
            .into());
        }

        if mount.stats.files > 0 && mount.stats.ffree < MIN_FREE_INODES {
            return Err(PipelineError::InsufficientGuestSpace {
                mountpoint: mount.mount_path.clone(),
                available: mount.stats.ffree,
                required: MIN_FREE_INODES,
            }
            .into());
        }
    }

    Ok(())
}

/// Filesystems on which fstrim is expected to be able to run:
/// `ext2|ext3|ext4|xfs` are trimmable, `ntfs` and anything else are not,
/// and swap/unknown mounts are skipped by the trim step entirely.
pub fn is_trim_eligible(fs_type: &str) -> bool {
    matches!(fs_type, "ext2" | "ext3" | "ext4" | "xfs")
}

/// Remount and fstrim every non-swap, non-unknown filesystem.
///
/// A per-mount fstrim failure is logged as a warning and does not abort the
/// pipeline.
pub fn trim_filesystems(appliance: &mut dyn ApplianceHandle, inspect: &Inspect) {
    for mount in &inspect.mounts {
        if mount.fs_type == "swap" || mount.fs_type.is_empty() {
            continue;
        }
        if let Err(err) = appliance.fstrim(&mount.mount_path) {
            warn!("fstrim on {} failed, continuing: {err:#}", mount.mount_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mountstats::StatvfsInfo;

    fn mount(mount_path: &str, fs_type: &str, bfree_bytes: u64, files: u64, ffree: u64) -> MountpointStats {
        MountpointStats {
            device: "/dev/sda1".to_string(),
            mount_path: mount_path.to_string(),
            fs_type: fs_type.to_string(),
            stats: StatvfsInfo {
                bsize: 1,
                blocks: 0,
                bavail: 0,
                bfree: bfree_bytes,
                files,
                ffree,
            },
        }
    }

    fn inspect_with(mounts: Vec<MountpointStats>, os_family: OsFamily) -> Inspect {
        Inspect {
            os_family,
            distro: "test".to_string(),
            product_name: "test".to_string(),
            firmware: Firmware::Bios,
            mounts,
            opaque: HashMap::new(),
        }
    }

    #[test]
    fn root_needs_only_50mib_with_separate_boot_on_linux() {
        let inspect = inspect_with(
            vec![
                mount("/boot", "ext4", BOOT_MIN_BYTES, 0, 0),
                mount("/", "ext4", ROOT_MIN_BYTES_DEFAULT, 0, 0),
            ],
            OsFamily::Linux,
        );
        assert!(check_guest_free_space(&inspect).is_ok());
    }

    #[test]
    fn root_needs_100mib_without_separate_boot() {
        let inspect = inspect_with(
            vec![mount("/", "ext4", ROOT_MIN_BYTES_DEFAULT, 0, 0)],
            OsFamily::Linux,
        );
        assert!(check_guest_free_space(&inspect).is_err());
        let inspect_ok = inspect_with(
            vec![mount("/", "ext4", ROOT_MIN_BYTES_NO_BOOT_OR_WINDOWS, 0, 0)],
            OsFamily::Linux,
        );
        assert!(check_guest_free_space(&inspect_ok).is_ok());
    }

    #[test]
    fn root_needs_100mib_on_windows_even_with_separate_boot() {
        let inspect = inspect_with(
            vec![
                mount("/boot", "ntfs", BOOT_MIN_BYTES, 0, 0),
                mount("/", "ntfs", ROOT_MIN_BYTES_DEFAULT, 0, 0),
            ],
            OsFamily::Windows,
        );
        assert!(check_guest_free_space(&inspect).is_err());
    }

    #[test]
    fn zero_files_skips_inode_check() {
        let inspect = inspect_with(
            vec![mount("/data", "ext4", OTHER_MIN_BYTES, 0, 0)],
            OsFamily::Linux,
        );
        assert!(check_guest_free_space(&inspect).is_ok());
    }

    #[test]
    fn insufficient_inodes_is_fatal() {
        let inspect = inspect_with(
            vec![mount("/data", "ext4", OTHER_MIN_BYTES, 1000, 5)],
            OsFamily::Linux,
        );
        assert!(check_guest_free_space(&inspect).is_err());
    }

    #[test]
    fn trim_eligibility_matches_allowlist() {
        assert!(is_trim_eligible("ext4"));
        assert!(is_trim_eligible("xfs"));
        assert!(!is_trim_eligible("ntfs"));
        assert!(!is_trim_eligible("btrfs"));
    }
}
