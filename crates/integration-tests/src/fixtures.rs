//! Synthetic source fixtures: a `manifest.json` plus a disk image containing
//! a single-partition ext4 root libguestfs can actually inspect, built
//! entirely with `qemu-img`/`guestfish` so tests never need a real
//! hypervisor export or a downloaded distro image to run against.

use camino::Utf8PathBuf;
use color_eyre::eyre::Context;
use color_eyre::Result;
use tempfile::TempDir;

const OS_RELEASE: &str = "NAME=\"Fedora Linux\"\nID=fedora\nVERSION_ID=39\n";
const FSTAB: &str = "/dev/sda1 / ext4 defaults 0 0\n";

/// Requested format of a fixture disk (`qemu-img`'s `-O`).
#[derive(Debug, Clone, Copy)]
pub enum DiskFormat {
    /// Raw disk image.
    Raw,
    /// qcow2 disk image.
    Qcow2,
}

impl DiskFormat {
    fn as_str(self) -> &'static str {
        match self {
            DiskFormat::Raw => "raw",
            DiskFormat::Qcow2 => "qcow2",
        }
    }
}

/// A fixture source directory, kept alive for the duration of a test so its
/// `TempDir` isn't dropped (and deleted) early.
#[derive(Debug)]
pub struct Fixture {
    _dir: TempDir,
    /// Path to pass as the `v2kvm` source argument.
    pub root: Utf8PathBuf,
}

/// Build a fixture directory: `manifest.json` describing a single-disk,
/// one-vCPU guest, plus a disk image with a minimal ext4 root libguestfs
/// will recognize as a Fedora Linux install: an `/etc/os-release`, a
/// matching `/etc/fstab` entry, and a `/boot` directory, the markers
/// `inspect-os` actually keys off, not a full distro tree.
pub fn build(name: &str, size: u64, format: DiskFormat) -> Result<Fixture> {
    let dir = TempDir::new().context("creating fixture temp dir")?;
    let root: Utf8PathBuf = dir
        .path()
        .to_path_buf()
        .try_into()
        .context("fixture temp dir is not UTF-8")?;

    let raw_path = root.join("disk0.raw");
    run_ok(
        std::process::Command::new("qemu-img").args([
            "create",
            "-f",
            "raw",
            raw_path.as_str(),
            &size.to_string(),
        ]),
        "qemu-img create",
    )?;

    run_ok(
        std::process::Command::new("guestfish")
            .args(["--format=raw", "-a", raw_path.as_str(), "--"])
            .args([
                "run",
                ":",
                "part-disk",
                "/dev/sda",
                "mbr",
                ":",
                "mkfs",
                "ext4",
                "/dev/sda1",
                ":",
                "mount",
                "/dev/sda1",
                "/",
                ":",
                "mkdir",
                "/etc",
                ":",
                "write",
                "/etc/os-release",
                OS_RELEASE,
                ":",
                "write",
                "/etc/fstab",
                FSTAB,
                ":",
                "mkdir",
                "/boot",
                ":",
                "mkdir-p",
                "/usr/bin",
                ":",
                "touch",
                "/usr/bin/bash",
                ":",
                "umount",
                "/",
            ]),
        "guestfish fixture setup",
    )?;

    let disk_filename = format!("disk0.{}", format.as_str());
    match format {
        DiskFormat::Raw => {
            if disk_filename != "disk0.raw" {
                std::fs::rename(raw_path.as_std_path(), root.join(&disk_filename).as_std_path())
                    .context("renaming fixture disk")?;
            }
        }
        DiskFormat::Qcow2 => {
            let qcow2_path = root.join(&disk_filename);
            run_ok(
                std::process::Command::new("qemu-img").args([
                    "convert",
                    "-f",
                    "raw",
                    "-O",
                    "qcow2",
                    raw_path.as_str(),
                    qcow2_path.as_str(),
                ]),
                "qemu-img convert",
            )?;
            std::fs::remove_file(raw_path.as_std_path()).context("removing scratch raw disk")?;
        }
    }

    let manifest = format!(
        r#"{{
            "source": {{
                "name": "{name}",
                "original_name": null,
                "hypervisor": "Ova",
                "memory_bytes": 1073741824,
                "vcpus": 1,
                "topology": null,
                "cpu_vendor": null,
                "cpu_model": null,
                "nics": [],
                "removables": [],
                "video": "Unknown",
                "firmware": "Unknown"
            }},
            "disks": [
                {{"uri": "{disk_filename}", "format": "{}", "id": 0, "controller": "Ide"}}
            ]
        }}"#,
        format.as_str()
    );
    std::fs::write(root.join("manifest.json").as_std_path(), manifest)
        .context("writing fixture manifest.json")?;

    Ok(Fixture { _dir: dir, root })
}

fn run_ok(cmd: &mut std::process::Command, what: &str) -> Result<()> {
    let output = cmd.output().with_context(|| format!("spawning {what}"))?;
    if !output.status.success() {
        return Err(color_eyre::eyre::eyre!(
            "{what} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(())
}
