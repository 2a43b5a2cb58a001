//! The metadata finalizer.

use crate::adapters::{OutputAdapter, TargetDisk};
use crate::capabilities::GrantedCapabilities;
use crate::cleanup::CleanupGuard;
use crate::inspect::Inspect;
use crate::planner::{TargetBusAssignment, TargetFirmware};
use crate::source::Source;
use color_eyre::Result;

/// Emit target metadata and disarm the cleanup guard.
///
/// Must run last: once `create_metadata` returns `Ok`, the guard is
/// disarmed so the freshly written targets survive process exit.
pub fn finalize(
    output: &mut dyn OutputAdapter,
    guard: &mut CleanupGuard,
    source: &Source,
    targets: &[TargetDisk],
    buses: &TargetBusAssignment,
    caps: &GrantedCapabilities,
    inspect: &Inspect,
    firmware: TargetFirmware,
) -> Result<()> {
    output.create_metadata(source, targets, buses, caps, inspect, firmware)?;
    guard.disarm();
    Ok(())
}
