//! A minimal Linux-family conversion module: grants virtio capabilities
//! unconditionally (or honors pinned capabilities in in-place mode).
//!
//! Real Linux conversion modules rewrite `/etc/fstab`, regenerate the
//! initramfs, and reconfigure the bootloader; those steps depend on the
//! guest's package manager and are out of scope here, since guest-conversion
//! modules are an external collaborator. This module is the reference
//! implementation of the contract, not a full driver installer.

use color_eyre::Result;
use std::net::IpAddr;
use tracing::info;
use v2kvm_core::adapters::OutputView;
use v2kvm_core::capabilities::{BlockBus, GrantedCapabilities, NetBus, RequestedCapabilities, VideoModel};
use v2kvm_core::convert::ConversionModule;
use v2kvm_core::inspect::{ApplianceHandle, Inspect, OsFamily};
use v2kvm_core::source::SourceDisk;

/// Matches any guest the appliance identified as Linux.
#[derive(Debug, Default)]
pub struct GenericLinuxModule;

impl ConversionModule for GenericLinuxModule {
    fn matches(&self, inspect: &Inspect) -> bool {
        inspect.os_family == OsFamily::Linux
    }

    fn convert(
        &self,
        _appliance: &mut dyn ApplianceHandle,
        inspect: &Inspect,
        source_disks: &[SourceDisk],
        _output: &dyn OutputView,
        requested: RequestedCapabilities,
        static_ips: &[IpAddr],
    ) -> Result<GrantedCapabilities> {
        info!(
            "converting {} Linux guest with {} disk(s)",
            inspect.distro,
            source_disks.len()
        );

        if !static_ips.is_empty() {
            info!("{} static IP(s) requested, would be written to network config", static_ips.len());
        }

        Ok(GrantedCapabilities {
            block_bus: requested.block_bus.unwrap_or(BlockBus::VirtioBlk),
            net_bus: requested.net_bus.unwrap_or(NetBus::VirtioNet),
            video: requested.video.unwrap_or(VideoModel::VirtioGpu),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn inspect(os_family: OsFamily) -> Inspect {
        Inspect {
            os_family,
            distro: "fedora".to_string(),
            product_name: "Fedora Linux".to_string(),
            firmware: v2kvm_core::source::Firmware::Bios,
            mounts: vec![],
            opaque: HashMap::new(),
        }
    }

    struct NoFirmware;
    impl OutputView for NoFirmware {
        fn supported_firmware(&self) -> std::collections::HashSet<v2kvm_core::source::Firmware> {
            std::collections::HashSet::new()
        }
    }

    #[test]
    fn matches_only_linux() {
        let module = GenericLinuxModule;
        assert!(module.matches(&inspect(OsFamily::Linux)));
        assert!(!module.matches(&inspect(OsFamily::Windows)));
        assert!(!module.matches(&inspect(OsFamily::Unknown)));
    }

    #[test]
    fn unconstrained_request_grants_virtio() {
        let module = GenericLinuxModule;
        struct FakeAppliance;
        impl ApplianceHandle for FakeAppliance {
            fn attach(&mut self, _disk_paths: &[String]) -> Result<()> {
                Ok(())
            }
            fn launch(&mut self) -> Result<()> {
                Ok(())
            }
            fn inspect(&mut self, _passphrases: &HashMap<String, String>) -> Result<Inspect> {
                unreachable!()
            }
            fn fstrim(&mut self, _mount_path: &str) -> Result<()> {
                Ok(())
            }
            fn shutdown(&mut self) -> Result<()> {
                Ok(())
            }
        }
        let mut appliance = FakeAppliance;
        let granted = module
            .convert(
                &mut appliance,
                &inspect(OsFamily::Linux),
                &[],
                &NoFirmware,
                RequestedCapabilities::default(),
                &[],
            )
            .unwrap();
        assert_eq!(granted.block_bus, BlockBus::VirtioBlk);
        assert_eq!(granted.net_bus, NetBus::VirtioNet);
    }
}
