//! A Windows-guest conversion module stub.
//!
//! Real Windows conversion requires injecting signed virtio drivers into the
//! registry's critical-device database, which is out of scope here. This
//! stub matches Windows guests and grants legacy emulated devices instead
//! of failing outright, logging a "no virtio drivers installed" warning
//! rather than aborting.

use color_eyre::Result;
use std::net::IpAddr;
use tracing::warn;
use v2kvm_core::adapters::OutputView;
use v2kvm_core::capabilities::{BlockBus, GrantedCapabilities, NetBus, RequestedCapabilities, VideoModel};
use v2kvm_core::convert::ConversionModule;
use v2kvm_core::inspect::{ApplianceHandle, Inspect, OsFamily};
use v2kvm_core::source::SourceDisk;

/// Matches any guest the appliance identified as Windows.
#[derive(Debug, Default)]
pub struct GenericWindowsStub;

impl ConversionModule for GenericWindowsStub {
    fn matches(&self, inspect: &Inspect) -> bool {
        inspect.os_family == OsFamily::Windows
    }

    fn convert(
        &self,
        _appliance: &mut dyn ApplianceHandle,
        inspect: &Inspect,
        _source_disks: &[SourceDisk],
        _output: &dyn OutputView,
        requested: RequestedCapabilities,
        _static_ips: &[IpAddr],
    ) -> Result<GrantedCapabilities> {
        warn!(
            "{} ({}): no virtio drivers installed, falling back to emulated IDE/e1000",
            inspect.product_name, inspect.distro
        );

        Ok(GrantedCapabilities {
            block_bus: requested.block_bus.unwrap_or(BlockBus::Ide),
            net_bus: requested.net_bus.unwrap_or(NetBus::E1000),
            video: requested.video.unwrap_or(VideoModel::Vga),
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
            distro: "windows-10".to_string(),
            product_name: "Windows 10".to_string(),
            firmware: v2kvm_core::source::Firmware::Uefi,
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

    #[test]
    fn matches_only_windows() {
        let module = GenericWindowsStub;
        assert!(module.matches(&inspect(OsFamily::Windows)));
        assert!(!module.matches(&inspect(OsFamily::Linux)));
    }

    #[test]
    fn grants_legacy_devices_when_unconstrained() {
        let module = GenericWindowsStub;
        let mut appliance = FakeAppliance;
        let granted = module
            .convert(
                &mut appliance,
                &inspect(OsFamily::Windows),
                &[],
                &NoFirmware,
                RequestedCapabilities::default(),
                &[],
            )
            .unwrap();
        assert_eq!(granted.block_bus, BlockBus::Ide);
        assert_eq!(granted.net_bus, NetBus::E1000);
        assert_eq!(granted.video, VideoModel::Vga);
    }

    #[test]
    fn in_place_mode_honors_pinned_capabilities() {
        let module = GenericWindowsStub;
        let mut appliance = FakeAppliance;
        let requested = RequestedCapabilities {
            block_bus: Some(BlockBus::VirtioScsi),
            net_bus: None,
            video: None,
        };
        let granted = module
            .convert(&mut appliance, &inspect(OsFamily::Windows), &[], &NoFirmware, requested, &[])
            .unwrap();
        assert_eq!(granted.block_bus, BlockBus::VirtioScsi);
        assert_eq!(granted.net_bus, NetBus::E1000);
    }
}
