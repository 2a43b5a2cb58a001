//! `--in-place` mutates the source disk directly: no overlays, no target
//! layout, no copy, no metadata.

use color_eyre::Result;
use integration_tests::integration_test;

use crate::{fixtures, run_v2kvm};

fn test_in_place_writes_no_target_artifacts() -> Result<()> {
    let fixture = fixtures::build("vm1", 256 << 20, fixtures::DiskFormat::Qcow2)?;

    let output = run_v2kvm(&["--in-place", fixture.root.as_str()])?;
    output.assert_success("--in-place conversion");

    // Nothing but the manifest and the original disk should exist in the
    // source directory; no overlay, no domain XML, no copied target.
    let entries: Vec<_> = std::fs::read_dir(fixture.root.as_std_path())
        .expect("reading fixture dir")
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(entries.contains(&"manifest.json".to_string()));
    assert!(entries.contains(&"disk0.qcow2".to_string()));
    assert!(!entries.iter().any(|e| e.ends_with(".xml")));
    Ok(())
}
integration_test!(test_in_place_writes_no_target_artifacts);
