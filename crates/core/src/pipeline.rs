//! The pipeline orchestrator: composes every stage into the sequence
//! `open source -> overlays -> inspect -> estimate -> convert -> plan ->
//! format -> copy -> metadata -> cleanup`.

use crate::adapters::OutputAdapter;
use crate::cleanup::CleanupGuard;
use crate::convert::{self, ConversionRegistry};
use crate::copy::{self, PlannedTarget};
use crate::estimate;
use crate::format;
use crate::inspect::{self, ApplianceHandle};
use crate::metadata;
use crate::overlay::{self, Overlay};
use crate::planner;
use crate::preflight;
use crate::source::{self, InputAdapter, Source, SourceDisk, SourceOverrides};
use camino::Utf8PathBuf;
use color_eyre::Result;
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::info;

/// Conversion mode, selected by `--in-place`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Copy overlays to the target; the source is never touched.
    Copying,
    /// Mutate the source disks in place; no overlays, no copy, no metadata.
    InPlace,
}

/// Every option the CLI layer can set, independent of how it parses them.
///
/// A plain data value, not a dependency on the CLI's argument-parsing crate.
#[derive(Debug)]
pub struct PipelineOptions {
    /// `--in-place`.
    pub in_place: bool,
    /// `--print-source`: render the source and exit before anything else.
    pub print_source: bool,
    /// `--print-estimate`: run overlay creation and estimation only.
    pub print_estimate: bool,
    /// Render `--print-estimate` output as JSON instead of plain text.
    pub print_estimate_json: bool,
    /// `--compressed`.
    pub compressed: bool,
    /// `-of`/`--output-format` override.
    pub output_format: Option<String>,
    /// `-oa`/`--output-allocation` override.
    pub preallocation: Option<crate::adapters::Preallocation>,
    /// Source overrides (rename, network map).
    pub overrides: SourceOverrides,
    /// `{device -> passphrase}` for encrypted volumes.
    pub passphrases: HashMap<String, String>,
    /// Static IPs to hand to the conversion module.
    pub static_ips: Vec<IpAddr>,
    /// Optional bandwidth limit passed to the input adapter.
    pub bandwidth_limit: Option<u64>,
    /// Temp directory for overlays and the appliance image.
    pub temp_dir: Utf8PathBuf,
    /// Whether to run fstrim in `--in-place` mode too.
    pub trim_in_place: bool,
    /// `--preserve-overlays`: debug-overlay mode. Keeps the overlay qcow2
    /// files around after a successful run instead of deleting them.
    pub preserve_overlays: bool,
    /// Whether to trim filesystems when `preserve_overlays` is set. Ignored
    /// outside debug-overlay mode, where trimming always runs.
    pub trim_overlays: bool,
}

/// Everything the pipeline needs beyond options: its external collaborators.
pub struct PipelineContext<'a> {
    /// Input adapter.
    pub input: &'a dyn InputAdapter,
    /// Output adapter.
    pub output: &'a mut dyn OutputAdapter,
    /// Registered conversion modules.
    pub modules: &'a ConversionRegistry,
    /// Appliance handle factory: called once overlays/source disks are
    /// ready to be attached.
    pub appliance: &'a mut dyn ApplianceHandle,
    /// External tools the preflight check should verify are on `$PATH`.
    pub required_tools: &'a [&'a str],
}

impl std::fmt::Debug for PipelineContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("required_tools", &self.required_tools)
            .finish_non_exhaustive()
    }
}

/// Run the full pipeline. Returns `Ok(())` on success, on `--print-source`,
/// and on `--print-estimate`.
pub fn run(opts: &PipelineOptions, ctx: &mut PipelineContext<'_>) -> Result<()> {
    let (source, disks) = source::open_source(ctx.input, &opts.overrides, opts.bandwidth_limit)?;

    if opts.print_source {
        print_source(&source, &disks);
        return Ok(());
    }

    ctx.output.precheck()?;

    let mode = if opts.in_place {
        Mode::InPlace
    } else {
        // A forced `-of raw` together with `--compressed` is knowable before
        // any overlay exists; reject it here rather than after overlay
        // creation and guest conversion have already run.
        if let Some(forced) = opts.output_format.as_deref() {
            format::check_compression_compatible(forced, opts.compressed)?;
        }
        preflight::check_temp_space(&opts.temp_dir)?;
        Mode::Copying
    };
    preflight::check_tools_available(ctx.required_tools)?;

    match mode {
        Mode::InPlace => run_in_place(opts, ctx, source, disks),
        Mode::Copying => run_copying(opts, ctx, source, disks),
    }
}

fn print_source(source: &Source, disks: &[SourceDisk]) {
    println!("name: {}", source.name);
    if let Some(original) = &source.original_name {
        println!("original-name: {original}");
    }
    println!("memory-bytes: {}", source.memory_bytes);
    println!("vcpus: {}", source.vcpus);
    println!("firmware: {:?}", source.firmware);
    for disk in disks {
        println!("disk[{}]: {} (format={:?})", disk.id, disk.uri, disk.format);
    }
}

fn run_in_place(
    opts: &PipelineOptions,
    ctx: &mut PipelineContext<'_>,
    source: Source,
    disks: Vec<SourceDisk>,
) -> Result<()> {
    info!("in-place mode: mutating source disks directly, no overlays will be created");

    let disk_paths: Vec<String> = disks.iter().map(|d| d.uri.clone()).collect();
    ctx.appliance.attach(&disk_paths)?;
    ctx.appliance.launch()?;
    let inspect = ctx.appliance.inspect(&opts.passphrases)?;
    inspect::check_guest_free_space(&inspect)?;

    let requested = convert::requested_capabilities(true, None, None, None);
    let output_ref: &dyn OutputAdapter = &*ctx.output;
    let _granted = convert::run_conversion(
        ctx.modules,
        ctx.appliance,
        &inspect,
        &disks,
        output_ref,
        requested,
        &opts.static_ips,
    )?;

    // Trim before shutting the appliance down: fstrim needs a live appliance
    // to talk to.
    if opts.trim_in_place {
        inspect::trim_filesystems(ctx.appliance, &inspect);
    }
    ctx.appliance.shutdown()?;

    let _ = source; // the source is mutated by the conversion module directly
    Ok(())
}

fn run_copying(
    opts: &PipelineOptions,
    ctx: &mut PipelineContext<'_>,
    source: Source,
    disks: Vec<SourceDisk>,
) -> Result<()> {
    let mut guard = CleanupGuard::new(opts.preserve_overlays);

    let overlays = overlay::create_overlays(&disks, &opts.temp_dir)?;
    for ov in &overlays {
        guard.register_overlay(ov.path.clone());
    }

    let disk_paths: Vec<String> = overlays.iter().map(|ov| ov.path.to_string()).collect();
    ctx.appliance.attach(&disk_paths)?;
    ctx.appliance.launch()?;
    let inspect = ctx.appliance.inspect(&opts.passphrases)?;
    inspect::check_guest_free_space(&inspect)?;

    estimate::estimate(&inspect.mounts, &overlays);

    if opts.print_estimate {
        if opts.print_estimate_json {
            println!("{}", estimate_json(&overlays)?);
        } else {
            print_estimate(&overlays);
        }
        // The appliance was launched to gather inspection data needed for
        // estimation; shut it down before exiting, since estimate-only mode
        // exits before any guest-conversion module runs.
        let _ = ctx.appliance.shutdown();
        return Ok(());
    }

    let requested = convert::requested_capabilities(false, None, None, None);
    let output_ref: &dyn OutputAdapter = &*ctx.output;
    let granted = convert::run_conversion(
        ctx.modules,
        ctx.appliance,
        &inspect,
        &disks,
        output_ref,
        requested,
        &opts.static_ips,
    )?;

    // Trimming is mandatory in copy mode, but only conditional once the
    // overlays are being kept around for debugging: shut the appliance down
    // only after trim, since fstrim needs it alive.
    if !opts.preserve_overlays || opts.trim_overlays {
        inspect::trim_filesystems(ctx.appliance, &inspect);
    }
    ctx.appliance.shutdown()?;

    let buses = planner::assign_buses(&disks, &source.removables, &granted);
    let output_ref: &dyn OutputAdapter = &*ctx.output;
    let firmware = planner::resolve_firmware(&source, &inspect, &granted, output_ref, |caps, fw| {
        output_ref.check_target_firmware(caps, fw)
    })?;

    let planned = plan_targets(opts, &overlays, ctx.output)?;
    let target_names: Vec<(String, &Overlay)> = planned
        .iter()
        .map(|p| (p.format.clone(), p.overlay))
        .collect();
    let target_files = ctx.output.prepare_targets(&source.name, &target_names, &granted)?;
    for target in &target_files {
        guard.register_target(target.clone());
    }

    let targets = copy::copy_all(ctx.output, &planned, target_files)?;

    metadata::finalize(
        ctx.output,
        &mut guard,
        &source,
        &targets,
        &buses,
        &granted,
        &inspect,
        firmware,
    )?;

    Ok(())
}

fn plan_targets<'a>(
    opts: &PipelineOptions,
    overlays: &'a [Overlay],
    output: &dyn OutputAdapter,
) -> Result<Vec<PlannedTarget<'a>>> {
    let mut planned = Vec::with_capacity(overlays.len());
    for overlay in overlays {
        let adapter_override = output.override_output_format(overlay);
        let fmt = format::resolve_format(overlay, adapter_override, opts.output_format.as_deref())?;
        format::check_compression_compatible(&fmt, opts.compressed)?;
        planned.push(PlannedTarget {
            overlay,
            format: fmt,
            preallocation: opts.preallocation,
            compressed: opts.compressed,
        });
    }
    Ok(planned)
}

fn print_estimate(overlays: &[Overlay]) {
    let mut total = 0u64;
    for ov in overlays {
        let estimated = ov.stats.estimated_size.get().unwrap_or(ov.virtual_size);
        total += estimated;
        println!("{}: {estimated} bytes", ov.device_name);
    }
    println!("total: {total} bytes");
}

/// Render machine-readable `--print-estimate` output: `{"disks": [...],
/// "total": N}`, 2-space indented.
pub fn estimate_json(overlays: &[Overlay]) -> Result<String> {
    #[derive(serde::Serialize)]
    struct EstimateJson {
        disks: Vec<u64>,
        total: u64,
    }
    let disks: Vec<u64> = overlays
        .iter()
        .map(|ov| ov.stats.estimated_size.get().unwrap_or(ov.virtual_size))
        .collect();
    let total = disks.iter().sum();
    Ok(serde_json::to_string_pretty(&EstimateJson { disks, total })?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_json_matches_expected_shape() {
        use crate::overlay::{device_name, Overlay, OverlayStats};
        use crate::source::{ControllerKind, SourceDisk};

        let overlay = Overlay {
            source_disk: SourceDisk {
                uri: "file:///a".to_string(),
                format: None,
                id: 0,
                controller: ControllerKind::Ide,
            },
            path: "/tmp/a.qcow2".into(),
            device_name: device_name(0),
            virtual_size: 100,
            stats: OverlayStats::default(),
        };
        overlay.stats.estimated_size.set(Some(42));

        let json = estimate_json(&[overlay]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["disks"], serde_json::json!([42]));
        assert_eq!(value["total"], serde_json::json!(42));
    }
}
