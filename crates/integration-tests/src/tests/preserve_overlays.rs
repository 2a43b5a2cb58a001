//! `--preserve-overlays` (debug-overlay mode) must leave the overlay qcow2
//! file behind after a successful run, and `--trim-overlays` must be
//! rejected without it.

use camino::Utf8PathBuf;
use color_eyre::Result;
use integration_tests::integration_test;
use tempfile::TempDir;

use crate::{fixtures, get_v2kvm_command, CapturedOutput};

fn test_preserve_overlays_keeps_overlay_file() -> Result<()> {
    let fixture = fixtures::build("vm1", 256 << 20, fixtures::DiskFormat::Raw)?;
    let out_dir = TempDir::new().expect("creating output temp dir");
    let out_root: Utf8PathBuf = out_dir.path().try_into().expect("output dir is not UTF-8");
    let tmp_dir = TempDir::new().expect("creating overlay temp dir");
    let tmp_root: Utf8PathBuf = tmp_dir.path().try_into().expect("overlay temp dir is not UTF-8");

    let bin = get_v2kvm_command().expect("failed to resolve v2kvm binary path");
    let output = std::process::Command::new(bin)
        .env("V2KVM_TMPDIR", tmp_root.as_str())
        .args(["--preserve-overlays", fixture.root.as_str(), out_root.as_str()])
        .output()
        .expect("running v2kvm");
    let output = CapturedOutput::new(output);
    output.assert_success("copy-mode conversion with --preserve-overlays");

    let overlays: Vec<_> = std::fs::read_dir(tmp_root.as_std_path())
        .expect("reading overlay temp dir")
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map(|ext| ext == "qcow2").unwrap_or(false))
        .collect();
    assert!(!overlays.is_empty(), "expected the overlay qcow2 file to survive");
    Ok(())
}
integration_test!(test_preserve_overlays_keeps_overlay_file);

fn test_trim_overlays_without_preserve_overlays_is_rejected() -> Result<()> {
    let fixture = fixtures::build("vm2", 256 << 20, fixtures::DiskFormat::Raw)?;
    let out_dir = TempDir::new().expect("creating output temp dir");
    let out_root: Utf8PathBuf = out_dir.path().try_into().expect("output dir is not UTF-8");

    let bin = get_v2kvm_command().expect("failed to resolve v2kvm binary path");
    let output = std::process::Command::new(bin)
        .args(["--trim-overlays", fixture.root.as_str(), out_root.as_str()])
        .output()
        .expect("running v2kvm");
    let output = CapturedOutput::new(output);
    output.assert_failure("--trim-overlays without --preserve-overlays");
    Ok(())
}
integration_test!(test_trim_overlays_without_preserve_overlays_is_rejected);
