//! Capability negotiation between the CORE and a conversion module.
//!
//! Expressed as a plain data value exchanged across the module boundary,
//! not as dynamic dispatch on a shared base class.

use serde::{Deserialize, Serialize};

/// Block device bus model a conversion module can install drivers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockBus {
    /// Legacy IDE/ATA emulation, always available.
    Ide,
    /// virtio-blk.
    VirtioBlk,
    /// virtio-scsi.
    VirtioScsi,
}

/// Network device bus model a conversion module can install drivers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetBus {
    /// Emulated e1000.
    E1000,
    /// virtio-net.
    VirtioNet,
}

/// Video device model a conversion module can install drivers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoModel {
    /// Standard VGA.
    Vga,
    /// QXL.
    Qxl,
    /// virtio-gpu.
    VirtioGpu,
}

/// Capabilities requested of a conversion module before it runs.
///
/// In copy mode, all fields are `None` (the module is free to pick the best
/// it can install). In in-place mode, each field is taken from the source's
/// current configuration, since in-place conversion cannot change what bus
/// the guest already expects to see.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RequestedCapabilities {
    /// Requested block bus, if constrained.
    pub block_bus: Option<BlockBus>,
    /// Requested network bus, if constrained.
    pub net_bus: Option<NetBus>,
    /// Requested video model, if constrained.
    pub video: Option<VideoModel>,
}

/// Capabilities a conversion module actually granted after running.
///
/// Always fully determined; downstream device-model selection (target bus
/// assignment, see [`crate::planner`]) depends on every field being set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GrantedCapabilities {
    /// Block bus the module installed drivers for.
    pub block_bus: BlockBus,
    /// Network bus the module installed drivers for.
    pub net_bus: NetBus,
    /// Video model the module installed drivers for.
    pub video: VideoModel,
}
