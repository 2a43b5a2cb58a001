//! Integration tests for v2kvm.
//!
//! These exercise the `v2kvm` binary end to end against synthetic qcow2
//! fixtures built on the fly with `qemu-img`, rather than real VMs or
//! containers. `guestfish` and `qemu-img` must be on `$PATH` to run them.

use camino::Utf8Path;
use std::process::Output;

use color_eyre::eyre::eyre;
use color_eyre::Result;
use libtest_mimic::{Arguments, Trial};

pub(crate) use integration_tests::{IntegrationTest, INTEGRATION_TESTS};
use linkme::distributed_slice;

mod fixtures;
mod tests {
    pub mod compression_guard;
    pub mod copy_mode_full_run;
    pub mod estimate_only;
    pub mod in_place;
    pub mod preserve_overlays;
    pub mod print_source;
}

/// Get the path to the `v2kvm` binary, checking `V2KVM_PATH` first, then
/// falling back to a bare `v2kvm` lookup on `$PATH`.
pub(crate) fn get_v2kvm_command() -> Result<String> {
    if let Ok(path) = std::env::var("V2KVM_PATH") {
        return Ok(path);
    }
    if let Some(path) = ["target/debug/v2kvm", "target/release/v2kvm"]
        .into_iter()
        .find(|p| Utf8Path::new(p).exists())
    {
        return Err(eyre!(
            "Detected {path} - set V2KVM_PATH={path} to run using this binary"
        ));
    }
    Ok("v2kvm".to_owned())
}

/// Captured output from a command with decoded stdout/stderr strings.
pub(crate) struct CapturedOutput {
    pub output: Output,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    /// Create from a raw `Output`.
    pub fn new(output: Output) -> Self {
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        Self {
            output,
            stdout,
            stderr,
        }
    }

    /// Assert that the command succeeded, printing debug info on failure.
    pub fn assert_success(&self, context: &str) {
        assert!(
            self.output.status.success(),
            "{} failed: {}",
            context,
            self.stderr
        );
    }

    /// Assert that the command failed.
    pub fn assert_failure(&self, context: &str) {
        assert!(
            !self.output.status.success(),
            "{} unexpectedly succeeded: {}",
            context,
            self.stdout
        );
    }

    /// Check if the command succeeded.
    pub fn success(&self) -> bool {
        self.output.status.success()
    }
}

/// Run the `v2kvm` command, capturing output.
pub(crate) fn run_v2kvm(args: &[&str]) -> std::io::Result<CapturedOutput> {
    let bin = get_v2kvm_command().expect("failed to resolve v2kvm binary path");
    let output = std::process::Command::new(bin).args(args).output()?;
    Ok(CapturedOutput::new(output))
}

fn main() {
    let args = Arguments::from_args();

    let tests: Vec<Trial> = INTEGRATION_TESTS
        .iter()
        .map(|test| {
            let name = test.name;
            let f = test.f;
            Trial::test(name, move || f().map_err(|e| format!("{:?}", e).into()))
        })
        .collect();

    libtest_mimic::run(&args, tests).exit();
}
