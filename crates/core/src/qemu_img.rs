//! Helpers for shelling out to `qemu-img`.

use camino::Utf8Path;
use color_eyre::eyre::eyre;
use color_eyre::{eyre::Context, Result};
use serde::Deserialize;
use std::process::Command;

/// Information returned by `qemu-img info --output=json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QemuImgInfo {
    /// Virtual size of the disk image in bytes.
    pub virtual_size: u64,
    /// Path to the disk image file.
    pub filename: String,
    /// Image format (e.g., "qcow2", "raw").
    pub format: String,
    /// Actual size on disk in bytes, if available.
    pub actual_size: Option<u64>,
    /// Backing file name, if this is a snapshot.
    pub backing_filename: Option<String>,
    /// Full resolved path to the backing file, if any.
    pub full_backing_filename: Option<String>,
}

/// Run `qemu-img info --force-share --output=json` on a disk image.
///
/// `--force-share` allows reading disk info even when the image is locked by
/// another process (e.g. a running appliance).
pub fn info(path: &Utf8Path) -> Result<QemuImgInfo> {
    let output = Command::new("qemu-img")
        .args(["info", "--force-share", "--output=json", path.as_str()])
        .output()
        .with_context(|| format!("Failed to run qemu-img info on {path}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(eyre!("qemu-img info failed for {path}: {stderr}"));
    }

    serde_json::from_slice(&output.stdout)
        .with_context(|| format!("Failed to parse qemu-img info JSON for {path}"))
}

/// Create a qcow2 overlay at `path` backed by `backing_uri`.
///
/// Uses qcow2 v3 (`compat=1.1`). `backing_fmt` is propagated only when the
/// source disk's format was declared.
pub fn create_overlay(
    path: &Utf8Path,
    backing_uri: &str,
    backing_fmt: Option<&str>,
) -> Result<()> {
    let mut backing_opt = format!("backing_file={backing_uri},compat=1.1");
    if let Some(fmt) = backing_fmt {
        backing_opt.push_str(&format!(",backing_fmt={fmt}"));
    }

    let output = Command::new("qemu-img")
        .args(["create", "-f", "qcow2", "-o", &backing_opt, path.as_str()])
        .output()
        .with_context(|| format!("Failed to run qemu-img create for {path}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(eyre!("qemu-img create failed for {path}: {stderr}"));
    }
    Ok(())
}

/// Create a blank target disk image.
///
/// `compat` is only meaningful for qcow2 and should be `Some("1.1")` there;
/// `preallocation` maps `Sparse -> "sparse"` and `Full -> "preallocated"`.
pub fn create_blank(
    path: &Utf8Path,
    format: &str,
    size: u64,
    preallocation: Option<crate::adapters::Preallocation>,
    compat: Option<&str>,
) -> Result<()> {
    let mut opts = Vec::new();
    if let Some(p) = preallocation {
        let value = match p {
            crate::adapters::Preallocation::Sparse => "sparse",
            crate::adapters::Preallocation::Full => "preallocated",
        };
        opts.push(format!("preallocation={value}"));
    }
    if let Some(compat) = compat {
        opts.push(format!("compat={compat}"));
    }

    let mut cmd = Command::new("qemu-img");
    cmd.args(["create", "-f", format]);
    if !opts.is_empty() {
        cmd.args(["-o", &opts.join(",")]);
    }
    cmd.args([path.as_str(), &size.to_string()]);

    let output = cmd
        .output()
        .with_context(|| format!("Failed to run qemu-img create for {path}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(eyre!("qemu-img create failed for {path}: {stderr}"));
    }
    Ok(())
}

/// Arguments controlling a `qemu-img convert` invocation.
#[derive(Debug, Clone)]
pub struct ConvertOptions<'a> {
    /// Source image path (an overlay, or the source disk in in-place mode).
    pub source: &'a Utf8Path,
    /// Destination path.
    pub dest: &'a Utf8Path,
    /// Format to write (the resolved transfer format).
    pub dest_format: &'a str,
    /// Whether to request compression (`-c`); caller must have already
    /// verified the destination format supports it.
    pub compressed: bool,
}

/// Run `qemu-img convert -n -f qcow2 -O <fmt> [-c] -S 64k <src> <dest>`.
pub fn convert(opts: &ConvertOptions<'_>) -> Result<()> {
    let mut cmd = Command::new("qemu-img");
    cmd.args(["convert", "-n", "-f", "qcow2", "-O", opts.dest_format]);
    if opts.compressed {
        cmd.arg("-c");
    }
    cmd.args(["-S", "64k", opts.source.as_str(), opts.dest.as_str()]);

    let output = cmd
        .output()
        .with_context(|| format!("Failed to run qemu-img convert {} -> {}", opts.source, opts.dest))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(eyre!(
            "qemu-img convert failed ({} -> {}): {stderr}",
            opts.source,
            opts.dest
        ));
    }
    Ok(())
}
