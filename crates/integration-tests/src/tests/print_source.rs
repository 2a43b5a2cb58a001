//! `--print-source` renders the guest description and exits before any
//! temp-space preflight or appliance launch.

use color_eyre::Result;
use integration_tests::integration_test;

use crate::{fixtures, run_v2kvm};

fn test_print_source_exits_before_touching_anything() -> Result<()> {
    let fixture = fixtures::build("vm1", 256 << 20, fixtures::DiskFormat::Raw)?;

    let output = run_v2kvm(&["--print-source", fixture.root.as_str()])?;
    output.assert_success("--print-source");
    assert!(output.stdout.contains("name: vm1"));
    assert!(output.stdout.contains("disk[0]"));
    Ok(())
}
integration_test!(test_print_source_exits_before_touching_anything);
