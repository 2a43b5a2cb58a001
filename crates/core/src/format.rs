//! The format resolver.

use crate::error::PipelineError;
use crate::overlay::Overlay;
use color_eyre::Result;

/// Cascading rule for picking a per-overlay output format:
/// adapter override, then the CLI flag, then the source disk's declared
/// format, then a hard failure.
pub fn resolve_format(
    overlay: &Overlay,
    adapter_override: Option<String>,
    cli_format: Option<&str>,
) -> Result<String> {
    let format = adapter_override
        .or_else(|| cli_format.map(str::to_string))
        .or_else(|| overlay.source_disk.format.clone())
        .ok_or(PipelineError::NoDefinedFormat)?;

    if format != "raw" && format != "qcow2" {
        return Err(color_eyre::eyre::eyre!(
            "unsupported output format {format:?}, must be raw or qcow2"
        ));
    }

    Ok(format)
}

/// Validate `--compressed` is only used with a format that supports it.
///
/// Must run before any overlay is created.
pub fn check_compression_compatible(format: &str, compressed: bool) -> Result<()> {
    if compressed && format != "qcow2" {
        return Err(PipelineError::CompressionRequiresQcow2(format.to_string()).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::OverlayStats;
    use crate::source::{ControllerKind, SourceDisk};

    fn overlay_with_format(format: Option<&str>) -> Overlay {
        Overlay {
            source_disk: SourceDisk {
                uri: "file:///d".to_string(),
                format: format.map(str::to_string),
                id: 0,
                controller: ControllerKind::Ide,
            },
            path: "/tmp/o.qcow2".into(),
            device_name: "sda".to_string(),
            virtual_size: 1,
            stats: OverlayStats::default(),
        }
    }

    #[test]
    fn adapter_override_wins_over_everything() {
        let overlay = overlay_with_format(Some("raw"));
        let format = resolve_format(&overlay, Some("qcow2".to_string()), Some("raw")).unwrap();
        assert_eq!(format, "qcow2");
    }

    #[test]
    fn cli_flag_wins_over_declared_format() {
        let overlay = overlay_with_format(Some("raw"));
        let format = resolve_format(&overlay, None, Some("qcow2")).unwrap();
        assert_eq!(format, "qcow2");
    }

    #[test]
    fn falls_back_to_declared_format() {
        let overlay = overlay_with_format(Some("raw"));
        let format = resolve_format(&overlay, None, None).unwrap();
        assert_eq!(format, "raw");
    }

    #[test]
    fn no_format_anywhere_is_an_error() {
        let overlay = overlay_with_format(None);
        assert!(resolve_format(&overlay, None, None).is_err());
    }

    #[test]
    fn non_raw_non_qcow2_is_rejected() {
        let overlay = overlay_with_format(Some("vmdk"));
        assert!(resolve_format(&overlay, None, None).is_err());
    }

    #[test]
    fn compressed_raw_fails_before_any_subprocess() {
        assert!(check_compression_compatible("raw", true).is_err());
        assert!(check_compression_compatible("qcow2", true).is_ok());
        assert!(check_compression_compatible("raw", false).is_ok());
    }

    #[test]
    fn resolver_output_is_stable_under_permutation() {
        let overlays = vec![overlay_with_format(Some("raw")), overlay_with_format(Some("qcow2"))];
        let forward: Vec<_> = overlays
            .iter()
            .map(|o| resolve_format(o, None, None).unwrap())
            .collect();
        let mut reversed = overlays;
        reversed.reverse();
        let mut backward: Vec<_> = reversed
            .iter()
            .map(|o| resolve_format(o, None, None).unwrap())
            .collect();
        backward.reverse();
        assert_eq!(forward, backward);
    }
}
