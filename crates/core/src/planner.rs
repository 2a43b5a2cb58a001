//! Target layout planning: bus assignment and firmware selection.

use crate::adapters::OutputView;
use crate::capabilities::{BlockBus, GrantedCapabilities};
use crate::error::PipelineError;
use crate::inspect::Inspect;
use crate::source::{Firmware, RemovableDevice, Source, SourceDisk};
use color_eyre::Result;
use tracing::info;

/// One disk or removable device's position on the target's block bus.
#[derive(Debug, Clone)]
pub struct BusSlot {
    /// Target device name (e.g. `vda`, `sda`).
    pub device: String,
    /// Positional index on the bus.
    pub index: u32,
}

/// The full mapping of source disks and removables onto the granted block
/// bus, handed to the output adapter's metadata emitter.
#[derive(Debug, Clone)]
pub struct TargetBusAssignment {
    /// Bus model every slot below was assigned to.
    pub bus: BlockBus,
    /// Disk slots, in source disk order.
    pub disks: Vec<BusSlot>,
    /// Removable-device slots.
    pub removables: Vec<BusSlot>,
}

/// Firmware the target will boot with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFirmware {
    /// Legacy BIOS.
    Bios,
    /// UEFI.
    Uefi,
}

fn bus_device_prefix(bus: BlockBus) -> &'static str {
    match bus {
        BlockBus::Ide => "hd",
        BlockBus::VirtioBlk => "vd",
        BlockBus::VirtioScsi => "sd",
    }
}

/// Assign source disks and removable devices onto the granted block bus.
pub fn assign_buses(
    disks: &[SourceDisk],
    removables: &[RemovableDevice],
    caps: &GrantedCapabilities,
) -> TargetBusAssignment {
    let prefix = bus_device_prefix(caps.block_bus);

    let disk_slots = disks
        .iter()
        .enumerate()
        .map(|(i, _disk)| BusSlot {
            device: format!("{prefix}{}", crate::overlay::device_suffix(i as u32)),
            index: i as u32,
        })
        .collect::<Vec<_>>();

    let removable_base = disks.len() as u32;
    let removable_slots = removables
        .iter()
        .enumerate()
        .map(|(i, _removable)| {
            let n = removable_base + i as u32;
            BusSlot {
                device: format!("{prefix}{}", crate::overlay::device_suffix(n)),
                index: n,
            }
        })
        .collect::<Vec<_>>();

    TargetBusAssignment {
        bus: caps.block_bus,
        disks: disk_slots,
        removables: removable_slots,
    }
}

/// Resolve the target firmware and confirm the output adapter accepts it.
///
/// Falls back to the inspector's determination when the source's firmware
/// hint was `Unknown`.
pub fn resolve_firmware(
    source: &Source,
    inspect: &Inspect,
    caps: &GrantedCapabilities,
    output: &dyn OutputView,
    check_target_firmware: impl FnOnce(&GrantedCapabilities, Firmware) -> Result<()>,
) -> Result<TargetFirmware> {
    let firmware = match source.firmware {
        Firmware::Unknown => inspect.firmware,
        known => known,
    };

    if !output.supported_firmware().contains(&firmware) {
        return Err(PipelineError::UnsupportedFirmware(firmware).into());
    }

    check_target_firmware(caps, firmware)?;

    let target = match firmware {
        Firmware::Bios => TargetFirmware::Bios,
        Firmware::Uefi => TargetFirmware::Uefi,
        Firmware::Unknown => {
            // The inspector is expected to always resolve Unknown to a
            // concrete firmware; treat a persistent Unknown as a bug in the
            // appliance adapter rather than guessing.
            return Err(color_eyre::eyre::eyre!(
                "guest firmware could not be determined"
            ));
        }
    };

    if target == TargetFirmware::Uefi {
        info!("target will boot with UEFI firmware");
    }

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{NetBus, VideoModel};
    use crate::source::ControllerKind;
    use std::collections::HashSet;

    fn disk(id: u32) -> SourceDisk {
        SourceDisk {
            uri: format!("file:///d{id}"),
            format: None,
            id,
            controller: ControllerKind::Ide,
        }
    }

    fn caps(block_bus: BlockBus) -> GrantedCapabilities {
        GrantedCapabilities {
            block_bus,
            net_bus: NetBus::VirtioNet,
            video: VideoModel::VirtioGpu,
        }
    }

    #[test]
    fn virtio_scsi_bus_uses_sd_prefix() {
        let disks = vec![disk(0), disk(1)];
        let assignment = assign_buses(&disks, &[], &caps(BlockBus::VirtioScsi));
        assert_eq!(assignment.disks[0].device, "sda");
        assert_eq!(assignment.disks[1].device, "sdb");
    }

    #[test]
    fn virtio_blk_bus_uses_vd_prefix() {
        let disks = vec![disk(0)];
        let assignment = assign_buses(&disks, &[], &caps(BlockBus::VirtioBlk));
        assert_eq!(assignment.disks[0].device, "vda");
    }

    #[test]
    fn removables_continue_the_sequence_after_disks() {
        let disks = vec![disk(0), disk(1)];
        let removables = vec![RemovableDevice {
            kind: "cdrom".to_string(),
            slot: 0,
        }];
        let assignment = assign_buses(&disks, &removables, &caps(BlockBus::Ide));
        assert_eq!(assignment.removables[0].device, "hdc");
    }

    struct FakeOutput(HashSet<Firmware>);
    impl OutputView for FakeOutput {
        fn supported_firmware(&self) -> HashSet<Firmware> {
            self.0.clone()
        }
    }

    fn source_with_firmware(firmware: Firmware) -> Source {
        Source {
            name: "vm".to_string(),
            original_name: None,
            hypervisor: crate::source::Hypervisor::Ova,
            memory_bytes: 1,
            vcpus: 1,
            topology: None,
            cpu_vendor: None,
            cpu_model: None,
            nics: vec![],
            removables: vec![],
            video: crate::source::VideoAdapter::Unknown,
            firmware,
        }
    }

    fn inspect_with_firmware(firmware: Firmware) -> Inspect {
        Inspect {
            os_family: crate::inspect::OsFamily::Linux,
            distro: "x".to_string(),
            product_name: "x".to_string(),
            firmware,
            mounts: vec![],
            opaque: Default::default(),
        }
    }

    #[test]
    fn unknown_source_firmware_falls_back_to_inspector() {
        let source = source_with_firmware(Firmware::Unknown);
        let inspect = inspect_with_firmware(Firmware::Uefi);
        let output = FakeOutput(HashSet::from([Firmware::Uefi]));
        let result = resolve_firmware(&source, &inspect, &caps(BlockBus::VirtioScsi), &output, |_, _| Ok(()));
        assert_eq!(result.unwrap(), TargetFirmware::Uefi);
    }

    #[test]
    fn unsupported_firmware_is_an_error() {
        let source = source_with_firmware(Firmware::Uefi);
        let inspect = inspect_with_firmware(Firmware::Uefi);
        let output = FakeOutput(HashSet::from([Firmware::Bios]));
        let result = resolve_firmware(&source, &inspect, &caps(BlockBus::VirtioScsi), &output, |_, _| Ok(()));
        assert!(result.is_err());
    }
}
