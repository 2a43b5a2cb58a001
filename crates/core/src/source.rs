//! The `Source` and `SourceDisk` data model, and `open_source`.

use color_eyre::eyre::eyre;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// The hypervisor a guest was originally defined under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hypervisor {
    /// VMware ESXi / vSphere.
    VCenter,
    /// A libvirt-managed KVM/Xen/etc. host.
    Libvirt,
    /// An OVA/OVF package with no live hypervisor connection.
    Ova,
    /// Anything else, carried by tag for diagnostics.
    Other(String),
}

/// Firmware hint carried by the source, or discovered later by the inspector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Firmware {
    /// Legacy PC BIOS boot.
    Bios,
    /// UEFI boot.
    Uefi,
    /// Not known from the source metadata; the inspector must determine it.
    Unknown,
}

/// `{sockets, cores, threads}`, each required to be at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuTopology {
    /// Socket count.
    pub sockets: u32,
    /// Cores per socket.
    pub cores: u32,
    /// Threads per core.
    pub threads: u32,
}

impl CpuTopology {
    /// Total logical CPU count implied by this topology.
    pub fn total(&self) -> u32 {
        self.sockets * self.cores * self.threads
    }
}

/// A virtual NIC attached to the source guest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nic {
    /// MAC address, if known.
    pub mac: Option<String>,
    /// Source-side network name (bridge, port group, libvirt network, ...).
    pub network: String,
    /// Model hint from the source (e.g. "e1000", "virtio"), if any.
    pub model: Option<String>,
}

/// A removable device (CD-ROM, floppy) attached to the source guest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovableDevice {
    /// Human-readable label, e.g. "cdrom".
    pub kind: String,
    /// Positional slot on the source, used for target bus placement.
    pub slot: u32,
}

/// Video adapter model hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoAdapter {
    /// Standard VGA.
    Vga,
    /// Cirrus Logic emulated adapter.
    Cirrus,
    /// QXL paravirtualized adapter.
    Qxl,
    /// Unrecognized or unspecified.
    Unknown,
}

/// Disk controller kind as declared by the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerKind {
    /// IDE/ATA.
    Ide,
    /// SATA/AHCI.
    Sata,
    /// virtio-blk.
    VirtioBlk,
    /// virtio-scsi.
    VirtioScsi,
    /// Anything else, carried by tag.
    Other(String),
}

/// Immutable record describing the guest as read from input metadata.
///
/// Field invariants: `name` non-empty; if `topology` is present,
/// `sockets*cores*threads` should equal `vcpus` (a mismatch is a warning,
/// not a fatal error).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// Guest name as it will appear on the target.
    pub name: String,
    /// Name the guest had on the source, if different (kept for messages).
    pub original_name: Option<String>,
    /// Hypervisor the guest was read from.
    pub hypervisor: Hypervisor,
    /// Guest memory size in bytes. Must be positive.
    pub memory_bytes: u64,
    /// Virtual CPU count. Must be at least 1.
    pub vcpus: u32,
    /// Optional CPU topology; if present it should be consistent with `vcpus`.
    pub topology: Option<CpuTopology>,
    /// Optional CPU vendor string, non-empty if present.
    pub cpu_vendor: Option<String>,
    /// Optional CPU model string, non-empty if present.
    pub cpu_model: Option<String>,
    /// Virtual NICs.
    pub nics: Vec<Nic>,
    /// Removable devices (CD-ROM, floppy, ...).
    pub removables: Vec<RemovableDevice>,
    /// Video adapter hint.
    pub video: VideoAdapter,
    /// Firmware hint; `Unknown` defers to the guest inspector.
    pub firmware: Firmware,
}

/// Immutable record describing one disk attached to the source guest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDisk {
    /// Opaque QEMU-compatible URI identifying the disk. Must be non-empty.
    pub uri: String,
    /// Declared format, if the input adapter knows it (e.g. "vmdk", "raw").
    pub format: Option<String>,
    /// Positional id, unique across the source's disk list.
    pub id: u32,
    /// Controller the disk was attached to on the source.
    pub controller: ControllerKind,
}

/// CLI-originated overrides applied to a freshly opened `Source`.
#[derive(Debug, Default, Clone)]
pub struct SourceOverrides {
    /// Rename the guest on the target (`s_name <- output_name`).
    pub output_name: Option<String>,
    /// Rewrite NIC `network` values through a user-supplied map.
    pub network_map: HashMap<String, String>,
}

/// What an input adapter must provide to `open_source`.
pub trait InputAdapter {
    /// Validate prerequisites (tools, credentials) before doing any work.
    fn precheck(&self) -> Result<()>;

    /// Human description of this adapter's configuration, for messages.
    fn as_options(&self) -> String;

    /// Produce the source model and its disks.
    ///
    /// `bandwidth_limit` is an optional bytes/sec cap the adapter should
    /// honor for any network transfers it performs while gathering metadata.
    fn source(&self, bandwidth_limit: Option<u64>) -> Result<(Source, Vec<SourceDisk>)>;
}

/// Open a source via its input adapter, validate it, and apply CLI overrides.
///
/// Prechecks the adapter, reads the source, and applies overrides;
/// rendering `--print-source` output is left to the caller, which has
/// the final `Source` in hand once this returns.
pub fn open_source(
    adapter: &dyn InputAdapter,
    overrides: &SourceOverrides,
    bandwidth_limit: Option<u64>,
) -> Result<(Source, Vec<SourceDisk>)> {
    adapter.precheck()?;
    let (mut source, disks) = adapter.source(bandwidth_limit)?;

    validate(&source, &disks)?;
    apply_overrides(&mut source, overrides);

    Ok((source, disks))
}

fn validate(source: &Source, disks: &[SourceDisk]) -> Result<()> {
    if source.name.is_empty() {
        return Err(eyre!("source guest name must not be empty"));
    }
    if source.memory_bytes == 0 {
        return Err(eyre!("source guest memory must be positive"));
    }
    if source.vcpus == 0 {
        return Err(eyre!("source guest must have at least one vCPU"));
    }

    let mut seen_ids = std::collections::HashSet::new();
    for disk in disks {
        if disk.uri.is_empty() {
            return Err(eyre!("source disk {} has an empty URI", disk.id));
        }
        if !seen_ids.insert(disk.id) {
            return Err(eyre!("duplicate source disk id {}", disk.id));
        }
    }

    if let Hypervisor::Other(tag) = &source.hypervisor {
        warn!("source hypervisor tag {tag:?} is not one this tool recognizes by name");
    }

    if let Some(topology) = source.topology {
        if topology.total() != source.vcpus {
            warn!(
                "CPU topology {}x{}x{} = {} does not match vcpus={}",
                topology.sockets,
                topology.cores,
                topology.threads,
                topology.total(),
                source.vcpus
            );
        }
    }

    Ok(())
}

fn apply_overrides(source: &mut Source, overrides: &SourceOverrides) {
    if let Some(output_name) = &overrides.output_name {
        source.name = output_name.clone();
    }
    for nic in &mut source.nics {
        if let Some(mapped) = overrides.network_map.get(&nic.network) {
            nic.network = mapped.clone();
        }
    }
}
