//! The converter driver: selecting and invoking a guest-conversion module.

use crate::adapters::OutputView;
use crate::capabilities::{GrantedCapabilities, RequestedCapabilities};
use crate::error::PipelineError;
use crate::inspect::{ApplianceHandle, Inspect};
use crate::source::SourceDisk;
use color_eyre::Result;
use std::net::IpAddr;

/// A guest-conversion module: installs drivers, rewrites boot configuration,
/// and reports back what it was able to install.
///
/// Real modules (Linux-family, Windows) are external collaborators; this
/// trait is the contract the CORE calls through.
pub trait ConversionModule {
    /// Whether this module handles the inspected guest.
    fn matches(&self, inspect: &Inspect) -> bool;

    /// Mutate the mounted guest filesystem and return granted capabilities.
    fn convert(
        &self,
        appliance: &mut dyn ApplianceHandle,
        inspect: &Inspect,
        source_disks: &[SourceDisk],
        output: &dyn OutputView,
        requested: RequestedCapabilities,
        static_ips: &[IpAddr],
    ) -> Result<GrantedCapabilities>;
}

/// An ordered list of conversion modules, matched top to bottom.
pub struct ConversionRegistry {
    modules: Vec<Box<dyn ConversionModule>>,
}

impl std::fmt::Debug for ConversionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionRegistry")
            .field("modules", &self.modules.len())
            .finish()
    }
}

impl ConversionRegistry {
    /// Build a registry from an ordered list of modules.
    pub fn new(modules: Vec<Box<dyn ConversionModule>>) -> Self {
        Self { modules }
    }

    /// Find the first module that matches `inspect`.
    ///
    /// Returns [`PipelineError::NoMatchingConversionModule`] if none do.
    pub fn select(&self, inspect: &Inspect) -> Result<&dyn ConversionModule> {
        self.modules
            .iter()
            .find(|m| m.matches(inspect))
            .map(|m| m.as_ref())
            .ok_or_else(|| PipelineError::NoMatchingConversionModule.into())
    }
}

/// Derive the capabilities to request of the conversion module.
///
/// In copy mode everything is left unconstrained; in in-place mode each
/// field is pinned to what the source is already configured with, since
/// in-place conversion cannot change the bus the guest boots with.
pub fn requested_capabilities(
    in_place: bool,
    source_block_bus: Option<crate::capabilities::BlockBus>,
    source_net_bus: Option<crate::capabilities::NetBus>,
    source_video: Option<crate::capabilities::VideoModel>,
) -> RequestedCapabilities {
    if in_place {
        RequestedCapabilities {
            block_bus: source_block_bus,
            net_bus: source_net_bus,
            video: source_video,
        }
    } else {
        RequestedCapabilities::default()
    }
}

/// Run the converter driver: select a module and invoke it.
///
/// Leaves the appliance running on return. Filesystem trimming still needs
/// to talk to it afterward, so shutting it down is the caller's job once
/// any post-conversion appliance work is done.
pub fn run_conversion(
    registry: &ConversionRegistry,
    appliance: &mut dyn ApplianceHandle,
    inspect: &Inspect,
    source_disks: &[SourceDisk],
    output: &dyn OutputView,
    requested: RequestedCapabilities,
    static_ips: &[IpAddr],
) -> Result<GrantedCapabilities> {
    let module = registry.select(inspect)?;
    module.convert(appliance, inspect, source_disks, output, requested, static_ips)
}
