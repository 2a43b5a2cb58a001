//! Libvirt domain XML generation, adapted from a single-disk bootc-container
//! builder into a multi-disk, multi-NIC VM domain builder.

use crate::xml_utils::XmlWriter;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use uuid::Uuid;
use v2kvm_core::planner::{TargetBusAssignment, TargetFirmware};
use v2kvm_core::source::{Nic, Source};

/// One disk slot the domain builder should emit, already resolved to a
/// target device name and bus.
#[derive(Debug, Clone, Copy)]
pub struct DomainDisk<'a> {
    /// Path to the disk image on the libvirt host.
    pub path: &'a str,
    /// `raw` or `qcow2`.
    pub format: &'a str,
    /// Target device name, e.g. `sda`, `vda`.
    pub device: &'a str,
    /// Bus model string libvirt expects (`ide`, `virtio`, `scsi`).
    pub bus: &'static str,
}

/// Builder for a libvirt domain XML document, used by `create_metadata`.
#[derive(Debug)]
pub struct DomainBuilder {
    name: String,
    uuid: Option<String>,
    memory_mb: u64,
    vcpus: u32,
    firmware: TargetFirmware,
    nics: Vec<Nic>,
}

impl DomainBuilder {
    /// Start a builder from the converted guest's source record and the
    /// firmware the target will boot with.
    pub fn new(source: &Source, firmware: TargetFirmware) -> Self {
        Self {
            name: source.name.clone(),
            uuid: None,
            memory_mb: (source.memory_bytes / (1024 * 1024)).max(1),
            vcpus: source.vcpus,
            firmware,
            nics: source.nics.clone(),
        }
    }

    /// Pin a UUID instead of generating a random one (used by tests for
    /// deterministic output).
    pub fn with_uuid(mut self, uuid: &str) -> Self {
        self.uuid = Some(uuid.to_string());
        self
    }

    /// Render the domain XML for `disks`, using `buses` only to look up the
    /// bus model string libvirt expects.
    pub fn build_xml(self, disks: &[DomainDisk<'_>], buses: &TargetBusAssignment) -> Result<String> {
        if disks.is_empty() {
            return Err(eyre!("domain XML requires at least one disk"));
        }

        let uuid = self.uuid.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut writer = XmlWriter::new();

        writer.start_element("domain", &[("type", "kvm")])?;
        writer.write_text_element("name", &self.name)?;
        writer.write_text_element("uuid", &uuid)?;
        writer.write_text_element_with_attrs("memory", &self.memory_mb.to_string(), &[("unit", "MiB")])?;
        writer.write_text_element_with_attrs(
            "currentMemory",
            &self.memory_mb.to_string(),
            &[("unit", "MiB")],
        )?;
        writer.write_text_element("vcpu", &self.vcpus.to_string())?;

        let use_uefi = self.firmware == TargetFirmware::Uefi;
        if use_uefi {
            writer.start_element("os", &[("firmware", "efi")])?;
        } else {
            writer.start_element("os", &[])?;
        }
        writer.write_text_element_with_attrs(
            "type",
            "hvm",
            &[("arch", std::env::consts::ARCH), ("machine", "q35")],
        )?;
        writer.write_empty_element("boot", &[("dev", "hd")])?;
        writer.end_element("os")?;

        writer.start_element("features", &[])?;
        writer.write_empty_element("acpi", &[])?;
        writer.write_empty_element("apic", &[])?;
        writer.end_element("features")?;

        writer.write_empty_element("cpu", &[("mode", "host-model")])?;

        writer.start_element("clock", &[("offset", "utc")])?;
        writer.end_element("clock")?;

        writer.write_text_element("on_poweroff", "destroy")?;
        writer.write_text_element("on_reboot", "restart")?;
        writer.write_text_element("on_crash", "destroy")?;

        writer.start_element("devices", &[])?;

        for (disk, slot) in disks.iter().zip(buses.disks.iter()) {
            writer.start_element("disk", &[("type", "file"), ("device", "disk")])?;
            writer.write_empty_element("driver", &[("name", "qemu"), ("type", disk.format)])?;
            writer.write_empty_element("source", &[("file", disk.path)])?;
            writer.write_empty_element("target", &[("dev", &slot.device), ("bus", disk.bus)])?;
            writer.end_element("disk")?;
        }

        for nic in &self.nics {
            writer.start_element("interface", &[("type", "network")])?;
            writer.write_empty_element("source", &[("network", &nic.network)])?;
            if let Some(mac) = &nic.mac {
                writer.write_empty_element("mac", &[("address", mac)])?;
            }
            writer.write_empty_element("model", &[("type", "virtio")])?;
            writer.end_element("interface")?;
        }

        writer.start_element("serial", &[("type", "pty")])?;
        writer.write_empty_element("target", &[("port", "0")])?;
        writer.end_element("serial")?;
        writer.start_element("console", &[("type", "pty")])?;
        writer.write_empty_element("target", &[("type", "serial"), ("port", "0")])?;
        writer.end_element("console")?;

        writer.end_element("devices")?;
        writer.end_element("domain")?;

        writer.into_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use v2kvm_core::planner::BusSlot;
    use v2kvm_core::source::{Firmware, Hypervisor, VideoAdapter};

    fn source() -> Source {
        Source {
            name: "migrated-vm".to_string(),
            original_name: None,
            hypervisor: Hypervisor::Ova,
            memory_bytes: 4 * 1024 * 1024 * 1024,
            vcpus: 2,
            topology: None,
            cpu_vendor: None,
            cpu_model: None,
            nics: vec![Nic {
                mac: Some("52:54:00:aa:bb:cc".to_string()),
                network: "default".to_string(),
                model: None,
            }],
            removables: vec![],
            video: VideoAdapter::Unknown,
            firmware: Firmware::Unknown,
        }
    }

    fn buses() -> TargetBusAssignment {
        TargetBusAssignment {
            bus: v2kvm_core::capabilities::BlockBus::VirtioBlk,
            disks: vec![BusSlot {
                device: "vda".to_string(),
                index: 0,
            }],
            removables: vec![],
        }
    }

    #[test]
    fn emits_name_memory_and_disk() {
        let disks = [DomainDisk {
            path: "/var/lib/libvirt/images/migrated-vm.qcow2",
            format: "qcow2",
            device: "vda",
            bus: "virtio",
        }];
        let xml = DomainBuilder::new(&source(), TargetFirmware::Bios)
            .with_uuid("11111111-1111-1111-1111-111111111111")
            .build_xml(&disks, &buses())
            .unwrap();

        assert!(xml.contains("<name>migrated-vm</name>"));
        assert!(xml.contains("<memory unit=\"MiB\">4096</memory>"));
        assert!(xml.contains("source file=\"/var/lib/libvirt/images/migrated-vm.qcow2\""));
        assert!(xml.contains("target dev=\"vda\" bus=\"virtio\""));
        assert!(xml.contains("mac address=\"52:54:00:aa:bb:cc\""));
    }

    #[test]
    fn uefi_firmware_sets_os_attribute() {
        let disks = [DomainDisk {
            path: "/x.qcow2",
            format: "qcow2",
            device: "vda",
            bus: "virtio",
        }];
        let xml = DomainBuilder::new(&source(), TargetFirmware::Uefi)
            .build_xml(&disks, &buses())
            .unwrap();
        assert!(xml.contains("firmware=\"efi\""));
    }

    #[test]
    fn empty_disk_list_is_rejected() {
        let result = DomainBuilder::new(&source(), TargetFirmware::Bios).build_xml(&[], &buses());
        assert!(result.is_err());
    }
}
