//! `v2kvm`: a virt-v2v-style conversion pipeline orchestrator CLI, wiring the
//! reference local-file adapters from `v2kvm-adapters` into `v2kvm-core`.

use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use color_eyre::eyre::Context;
use color_eyre::Result;
use std::collections::HashMap;
use std::net::IpAddr;
use v2kvm_adapters::{GenericLinuxModule, GenericWindowsStub, GuestfishAppliance, LocalFileInput, LocalFileOutput};
use v2kvm_core::adapters::Preallocation;
use v2kvm_core::convert::ConversionRegistry;
use v2kvm_core::pipeline::{self, PipelineContext, PipelineOptions};
use v2kvm_core::preflight::TEMP_DIR_ENV_VAR;
use v2kvm_core::source::SourceOverrides;

/// External tools the preflight check verifies are on `$PATH` before the
/// pipeline runs.
const REQUIRED_TOOLS: &[&str] = &["qemu-img", "guestfish"];

/// Convert a guest from an input source into a libvirt/KVM-ready target.
#[derive(Debug, Parser)]
#[command(name = "v2kvm", version, about)]
struct Cli {
    /// Directory holding the input `manifest.json` and its disk images.
    source: Utf8PathBuf,

    /// Output directory for converted disk images and the domain XML
    /// (ignored with `--in-place`, `--print-source`, and `--print-estimate`).
    #[arg(required_unless_present_any = ["in_place", "print_source", "print_estimate"])]
    output: Option<Utf8PathBuf>,

    /// Rename the guest on the target.
    #[arg(long = "name")]
    output_name: Option<String>,

    /// Remap a source network to a target one, `source=target`. May be
    /// repeated.
    #[arg(long = "network", value_parser = parse_network_map_entry)]
    network: Vec<(String, String)>,

    /// Unlock an encrypted volume, `device=passphrase`. May be repeated.
    #[arg(long = "passphrase", value_parser = parse_network_map_entry)]
    passphrase: Vec<(String, String)>,

    /// Static IP to hand to the conversion module. May be repeated.
    #[arg(long = "static-ip")]
    static_ip: Vec<IpAddr>,

    /// Compress qcow2 targets (rejected for `raw` output).
    #[arg(long)]
    compressed: bool,

    /// Force the output format (`raw` or `qcow2`) instead of inferring it
    /// from the overlay.
    #[arg(short = 'o', long = "output-format")]
    output_format: Option<String>,

    /// Preallocation strategy for newly created target disks.
    #[arg(short = 'a', long = "output-allocation")]
    output_allocation: Option<AllocationArg>,

    /// Mutate the source disks directly instead of copying to a target.
    #[arg(long)]
    in_place: bool,

    /// Also run fstrim in `--in-place` mode (skipped by default since there
    /// is no overlay to reclaim space on).
    #[arg(long, requires = "in_place")]
    trim_in_place: bool,

    /// Debug-overlay mode: keep the overlay qcow2 files around after the run
    /// instead of deleting them.
    #[arg(long, conflicts_with = "in_place")]
    preserve_overlays: bool,

    /// Run fstrim even in debug-overlay mode (skipped by default, since the
    /// point of `--preserve-overlays` is usually to inspect the overlay
    /// as the guest conversion left it).
    #[arg(long, requires = "preserve_overlays")]
    trim_overlays: bool,

    /// Print the parsed source description and exit.
    #[arg(long)]
    print_source: bool,

    /// Run overlay creation and space estimation, print the result, and
    /// exit before any guest-conversion module runs.
    #[arg(long)]
    print_estimate: bool,

    /// Render `--print-estimate` output as JSON instead of plain text.
    #[arg(long, requires = "print_estimate")]
    json: bool,

    /// Cap input-adapter network transfers to this many bytes/sec.
    #[arg(long)]
    bandwidth_limit: Option<u64>,
}

/// `-oa`/`--output-allocation` values, mirroring [`Preallocation`].
#[derive(Debug, Clone, Copy, ValueEnum)]
enum AllocationArg {
    /// Sparse allocation.
    Sparse,
    /// Fully preallocated.
    Preallocated,
}

impl From<AllocationArg> for Preallocation {
    fn from(value: AllocationArg) -> Self {
        match value {
            AllocationArg::Sparse => Preallocation::Sparse,
            AllocationArg::Preallocated => Preallocation::Full,
        }
    }
}

fn parse_network_map_entry(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))
}

fn install_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let format = fmt::format().without_time().with_target(false).compact();

    let fmt_layer = fmt::layer().event_format(format).with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

fn temp_dir() -> Utf8PathBuf {
    std::env::var(TEMP_DIR_ENV_VAR)
        .map(Utf8PathBuf::from)
        .unwrap_or_else(|_| Utf8PathBuf::try_from(std::env::temp_dir()).expect("temp dir is valid UTF-8"))
}

fn main() -> Result<()> {
    install_tracing();
    color_eyre::install()?;

    let cli = Cli::parse();

    let opts = PipelineOptions {
        in_place: cli.in_place,
        print_source: cli.print_source,
        print_estimate: cli.print_estimate,
        print_estimate_json: cli.json,
        compressed: cli.compressed,
        output_format: cli.output_format,
        preallocation: cli.output_allocation.map(Preallocation::from),
        overrides: SourceOverrides {
            output_name: cli.output_name,
            network_map: cli.network.into_iter().collect::<HashMap<_, _>>(),
        },
        passphrases: cli.passphrase.into_iter().collect::<HashMap<_, _>>(),
        static_ips: cli.static_ip,
        bandwidth_limit: cli.bandwidth_limit,
        temp_dir: temp_dir(),
        trim_in_place: cli.trim_in_place,
        preserve_overlays: cli.preserve_overlays,
        trim_overlays: cli.trim_overlays,
    };

    let mut output = match cli.output {
        Some(dir) => LocalFileOutput::new(dir),
        // In-place mode never writes target disks; point the (still
        // required) output adapter back at the source directory, which
        // `precheck()`'s `create_dir_all` will find already present.
        None => LocalFileOutput::new(cli.source.clone()),
    };
    let input = LocalFileInput::new(cli.source);
    let modules = ConversionRegistry::new(vec![
        Box::new(GenericLinuxModule),
        Box::new(GenericWindowsStub),
    ]);
    let mut appliance = GuestfishAppliance::new();

    let mut ctx = PipelineContext {
        input: &input,
        output: &mut output,
        modules: &modules,
        appliance: &mut appliance,
        required_tools: REQUIRED_TOOLS,
    };

    pipeline::run(&opts, &mut ctx).with_context(|| "conversion pipeline failed")
}
