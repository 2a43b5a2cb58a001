//! A libguestfs-backed appliance, using `guestfish --listen` to keep one
//! guest-filesystem session open across the inspect/fstrim/shutdown calls
//! the CORE makes against a single `ApplianceHandle`.

use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use std::collections::HashMap;
use std::process::Command;
use tracing::{debug, warn};
use v2kvm_core::inspect::{ApplianceHandle, Inspect, OsFamily};
use v2kvm_core::mountstats::{MountpointStats, StatvfsInfo};

/// Appliance backed by a long-running `guestfish --listen` session against
/// the overlay disks attached for this conversion.
#[derive(Debug, Default)]
pub struct GuestfishAppliance {
    disk_paths: Vec<String>,
    pid_env: Option<(String, String)>,
}

impl GuestfishAppliance {
    /// Build an unattached handle; call [`ApplianceHandle::attach`] before
    /// [`ApplianceHandle::launch`].
    pub fn new() -> Self {
        Self::default()
    }

    fn remote(&self, args: &[&str]) -> Result<String> {
        let (key, value) = self
            .pid_env
            .as_ref()
            .ok_or_else(|| eyre!("guestfish session not launched"))?;
        debug!("guestfish --remote -- {}", args.join(" "));
        let output = Command::new("guestfish")
            .arg("--remote")
            .arg("--")
            .args(args)
            .env(key, value)
            .output()
            .with_context(|| format!("running guestfish --remote -- {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(eyre!(
                "guestfish {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn statvfs(&self, mount_path: &str) -> Result<StatvfsInfo> {
        let raw = self.remote(&["statvfs", mount_path])?;
        parse_statvfs(&raw).ok_or_else(|| eyre!("could not parse statvfs output for {mount_path}"))
    }
}

/// `guestfish -a` wants a plain local path; a `file://` URI (what source
/// disks are given as, so other adapters can also hand it `nbd://` or
/// similar) needs the scheme stripped. Anything else is passed through
/// untouched, which only works for schemes guestfish's simple `-a` shortcut
/// understands on its own.
fn local_path_for_guestfish(uri: &str) -> &str {
    uri.strip_prefix("file://").unwrap_or(uri)
}

fn parse_statvfs(raw: &str) -> Option<StatvfsInfo> {
    let mut fields: HashMap<&str, u64> = HashMap::new();
    for line in raw.lines() {
        let (key, value) = line.split_once(':')?;
        fields.insert(key.trim(), value.trim().parse().ok()?);
    }
    Some(StatvfsInfo {
        bsize: *fields.get("bsize")?,
        blocks: *fields.get("blocks")?,
        bavail: *fields.get("bavail")?,
        bfree: *fields.get("bfree")?,
        files: *fields.get("files")?,
        ffree: *fields.get("ffree")?,
    })
}

impl ApplianceHandle for GuestfishAppliance {
    fn attach(&mut self, disk_paths: &[String]) -> Result<()> {
        self.disk_paths = disk_paths.to_vec();
        Ok(())
    }

    fn launch(&mut self) -> Result<()> {
        let mut cmd = Command::new("guestfish");
        cmd.arg("--listen");
        for path in &self.disk_paths {
            cmd.arg("-a").arg(local_path_for_guestfish(path));
        }
        let output = cmd.output().with_context(|| "launching guestfish --listen")?;
        if !output.status.success() {
            return Err(eyre!(
                "guestfish --listen failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let (key, value) = stdout
            .lines()
            .find_map(|line| line.split_once('='))
            .filter(|(key, _)| *key == "GUESTFISH_PID")
            .ok_or_else(|| eyre!("guestfish --listen did not print GUESTFISH_PID"))?;
        self.pid_env = Some((key.to_string(), value.to_string()));
        self.remote(&["launch"])?;
        Ok(())
    }

    fn inspect(&mut self, passphrases: &HashMap<String, String>) -> Result<Inspect> {
        for (device, passphrase) in passphrases {
            if let Err(err) = self.remote(&["luks-open", device, passphrase]) {
                warn!("failed to unlock {device}, it will remain unmounted: {err:#}");
            }
        }

        let roots = self.remote(&["inspect-os"])?;
        let root = roots
            .lines()
            .next()
            .ok_or_else(|| eyre!("inspect-os found no root filesystem"))?
            .to_string();

        let os_type = self.remote(&["inspect-get-type", &root]).unwrap_or_default();
        let os_family = match os_type.as_str() {
            "linux" => OsFamily::Linux,
            "windows" => OsFamily::Windows,
            other => {
                if !other.is_empty() {
                    warn!("unrecognized guest OS type {other:?}");
                }
                OsFamily::Unknown
            }
        };
        let distro = self
            .remote(&["inspect-get-distro", &root])
            .unwrap_or_else(|_| "unknown".to_string());
        let product_name = self
            .remote(&["inspect-get-product-name", &root])
            .unwrap_or_else(|_| distro.clone());

        let mountpoints = self.remote(&["inspect-get-mountpoints", &root])?;
        let mut mounts = Vec::new();
        let mut has_efi_mount = false;
        for line in mountpoints.lines() {
            let Some((mount_path, device)) = line.split_once(": ") else {
                continue;
            };
            self.remote(&["mount-options", "", device, mount_path]).ok();
            if mount_path == "/boot/efi" {
                has_efi_mount = true;
            }
            let fs_type = self.remote(&["vfs-type", device]).unwrap_or_default();
            let stats = self.statvfs(mount_path)?;
            mounts.push(MountpointStats {
                device: device.to_string(),
                mount_path: mount_path.to_string(),
                fs_type,
                stats,
            });
        }

        let firmware = if has_efi_mount {
            v2kvm_core::source::Firmware::Uefi
        } else {
            v2kvm_core::source::Firmware::Bios
        };

        Ok(Inspect {
            os_family,
            distro,
            product_name,
            firmware,
            mounts,
            opaque: HashMap::new(),
        })
    }

    fn fstrim(&mut self, mount_path: &str) -> Result<()> {
        self.remote(&["fstrim", mount_path])?;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.remote(&["umount-all"]).ok();
        self.remote(&["exit"])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_statvfs_block() {
        let raw = "bsize: 4096\nblocks: 1000\nbavail: 100\nbfree: 200\nfiles: 10\nffree: 5\nfrsize: 4096";
        let stats = parse_statvfs(raw).unwrap();
        assert_eq!(stats.bsize, 4096);
        assert_eq!(stats.bfree, 200);
        assert_eq!(stats.files, 10);
    }

    #[test]
    fn rejects_incomplete_statvfs_block() {
        assert!(parse_statvfs("bsize: 4096\nblocks: 1000").is_none());
    }

    #[test]
    fn strips_file_scheme_but_leaves_other_uris_alone() {
        assert_eq!(local_path_for_guestfish("file:///tmp/a.qcow2"), "/tmp/a.qcow2");
        assert_eq!(local_path_for_guestfish("/tmp/a.qcow2"), "/tmp/a.qcow2");
        assert_eq!(local_path_for_guestfish("nbd://host/export"), "nbd://host/export");
    }
}
