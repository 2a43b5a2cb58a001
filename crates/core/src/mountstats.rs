//! Per-mounted-filesystem statvfs records.

use camino::Utf8Path;
use color_eyre::eyre::Context;
use color_eyre::Result;
use serde::{Deserialize, Serialize};

/// `statvfs(2)` fields relevant to the estimator and the guest free-space check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StatvfsInfo {
    /// Filesystem block size in bytes.
    pub bsize: u64,
    /// Total blocks.
    pub blocks: u64,
    /// Free blocks available to an unprivileged caller.
    pub bavail: u64,
    /// Free blocks, including those reserved for the superuser.
    pub bfree: u64,
    /// Total inodes.
    pub files: u64,
    /// Free inodes.
    pub ffree: u64,
}

/// One mounted filesystem inside the inspected guest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountpointStats {
    /// Device path as seen by the appliance (e.g. `/dev/sda1`).
    pub device: String,
    /// Mount path inside the guest (e.g. `/`, `/boot`).
    pub mount_path: String,
    /// Filesystem type string (e.g. `ext4`, `ntfs`, `xfs`).
    pub fs_type: String,
    /// statvfs data for this mount.
    pub stats: StatvfsInfo,
}

impl MountpointStats {
    /// Bytes free to an unprivileged caller (`bfree * bsize`).
    pub fn free_bytes(&self) -> u64 {
        self.stats.bfree * self.stats.bsize
    }

    /// Total bytes (`blocks * bsize`).
    pub fn total_bytes(&self) -> u64 {
        self.stats.blocks * self.stats.bsize
    }
}

/// Run `statvfs` on a path reachable from the current process (used by the
/// host preflight check; the guest's own mountpoints are gathered by the
/// appliance adapter instead, since they live inside the guest filesystem).
pub fn statvfs(path: &Utf8Path) -> Result<StatvfsInfo> {
    let stat = rustix::fs::statvfs(path.as_std_path())
        .with_context(|| format!("statvfs failed for {path}"))?;
    Ok(StatvfsInfo {
        bsize: stat.f_bsize as u64,
        blocks: stat.f_blocks as u64,
        bavail: stat.f_bavail as u64,
        bfree: stat.f_bfree as u64,
        files: stat.f_files as u64,
        ffree: stat.f_ffree as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_bytes_multiplies_bfree_by_bsize() {
        let mp = MountpointStats {
            device: "/dev/sda1".to_string(),
            mount_path: "/".to_string(),
            fs_type: "ext4".to_string(),
            stats: StatvfsInfo {
                bsize: 4096,
                blocks: 1000,
                bavail: 100,
                bfree: 200,
                files: 10,
                ffree: 5,
            },
        };
        assert_eq!(mp.free_bytes(), 200 * 4096);
        assert_eq!(mp.total_bytes(), 1000 * 4096);
    }

    #[test]
    fn statvfs_on_tmp_succeeds() {
        let info = statvfs(Utf8Path::new("/tmp")).unwrap();
        assert!(info.bsize > 0);
    }
}
