//! A reference output adapter that writes target disks and a libvirt domain
//! XML file into a local directory.

use crate::domain::{DomainBuilder, DomainDisk};
use camino::Utf8PathBuf;
use color_eyre::eyre::Context;
use color_eyre::Result;
use std::collections::HashSet;
use tracing::info;
use v2kvm_core::adapters::{OutputAdapter, OutputView, Preallocation, TargetDisk, TargetFile};
use v2kvm_core::capabilities::GrantedCapabilities;
use v2kvm_core::inspect::Inspect;
use v2kvm_core::overlay::Overlay;
use v2kvm_core::planner::{TargetBusAssignment, TargetFirmware};
use v2kvm_core::qemu_img;
use v2kvm_core::source::{Firmware, Source};

/// Writes every target disk as `<dir>/<name>-<device>.<format>` and the
/// domain definition as `<dir>/<name>.xml`.
#[derive(Debug)]
pub struct LocalFileOutput {
    dir: Utf8PathBuf,
}

impl LocalFileOutput {
    /// Target directory; created if it doesn't already exist.
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn disk_bus_str(bus: v2kvm_core::capabilities::BlockBus) -> &'static str {
        use v2kvm_core::capabilities::BlockBus;
        match bus {
            BlockBus::Ide => "ide",
            BlockBus::VirtioBlk => "virtio",
            BlockBus::VirtioScsi => "scsi",
        }
    }
}

impl OutputView for LocalFileOutput {
    fn supported_firmware(&self) -> HashSet<Firmware> {
        HashSet::from([Firmware::Bios, Firmware::Uefi])
    }
}

impl OutputAdapter for LocalFileOutput {
    fn precheck(&self) -> Result<()> {
        std::fs::create_dir_all(self.dir.as_std_path())
            .with_context(|| format!("creating output directory {}", self.dir))
    }

    fn as_options(&self) -> String {
        format!("local directory: {}", self.dir)
    }

    fn check_target_firmware(&self, _caps: &GrantedCapabilities, _firmware: Firmware) -> Result<()> {
        Ok(())
    }

    fn override_output_format(&self, _overlay: &Overlay) -> Option<String> {
        None
    }

    fn prepare_targets(
        &mut self,
        name: &str,
        disks: &[(String, &Overlay)],
        _caps: &GrantedCapabilities,
    ) -> Result<Vec<TargetFile>> {
        Ok(disks
            .iter()
            .map(|(format, overlay)| {
                let filename = format!("{name}-{}.{format}", overlay.device_name);
                TargetFile::Path(self.dir.join(filename))
            })
            .collect())
    }

    fn disk_create(
        &self,
        target: &TargetFile,
        format: &str,
        size: u64,
        preallocation: Option<Preallocation>,
        compat: Option<&str>,
    ) -> Result<()> {
        let TargetFile::Path(path) = target else {
            return Err(color_eyre::eyre::eyre!("local output only creates file targets"));
        };
        qemu_img::create_blank(path, format, size, preallocation, compat)
    }

    fn transfer_format(&self, _target: &TargetFile, format: &str) -> String {
        format.to_string()
    }

    fn disk_copied(&mut self, target: &TargetFile, index: usize, total: usize) -> Result<()> {
        if let TargetFile::Path(path) = target {
            info!("disk {}/{} written to {}", index + 1, total, path);
        }
        Ok(())
    }

    fn create_metadata(
        &mut self,
        source: &Source,
        targets: &[TargetDisk],
        buses: &TargetBusAssignment,
        _caps: &GrantedCapabilities,
        _inspect: &Inspect,
        firmware: TargetFirmware,
    ) -> Result<()> {
        let bus_str = Self::disk_bus_str(buses.bus);
        let disks: Vec<DomainDisk<'_>> = targets
            .iter()
            .zip(buses.disks.iter())
            .map(|(target, slot)| {
                let path = match &target.file {
                    TargetFile::Path(p) => p.as_str(),
                    TargetFile::Uri(u) => u.as_str(),
                };
                DomainDisk {
                    path,
                    format: &target.format,
                    device: &slot.device,
                    bus: bus_str,
                }
            })
            .collect();

        let xml = DomainBuilder::new(source, firmware).build_xml(&disks, buses)?;
        let xml_path = self.dir.join(format!("{}.xml", source.name));
        std::fs::write(xml_path.as_std_path(), xml)
            .with_context(|| format!("writing domain XML to {xml_path}"))
    }
}
