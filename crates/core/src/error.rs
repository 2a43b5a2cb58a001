//! The pipeline's typed error variants.
//!
//! Per the design, almost every fallible call in this crate returns
//! [`color_eyre::Result`] with an ad hoc `eyre!(...)` message. A handful of
//! failure shapes are worth matching on programmatically from the CLI layer
//! (for example, to print a dedicated hint), so those are carried as a small
//! [`thiserror`] enum that gets wrapped into a [`color_eyre::Report`] like
//! everything else.

use camino::Utf8PathBuf;

/// Distinguished error shapes callers may want to match on.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The configured temp directory does not have enough free space.
    #[error(
        "temp directory {path} has only {available} bytes free, need at least {required}; \
         set {env_var} to relocate it"
    )]
    InsufficientTempSpace {
        /// Directory that was checked.
        path: Utf8PathBuf,
        /// Bytes actually available.
        available: u64,
        /// Bytes required.
        required: u64,
        /// Environment variable the user can set to relocate the directory.
        env_var: &'static str,
    },

    /// A mounted guest filesystem does not have enough free space for the
    /// conversion to proceed.
    #[error("guest filesystem {mountpoint} has only {available} bytes free, need {required}")]
    InsufficientGuestSpace {
        /// Mount path inside the guest.
        mountpoint: String,
        /// Bytes actually available.
        available: u64,
        /// Bytes required.
        required: u64,
    },

    /// No output format could be determined for a disk.
    #[error("disk has no defined format")]
    NoDefinedFormat,

    /// `--compressed` was requested for a format that does not support it.
    #[error("compression requires the qcow2 format, got {0}")]
    CompressionRequiresQcow2(String),

    /// No registered conversion module matched the inspected guest.
    #[error("unable to convert this guest type")]
    NoMatchingConversionModule,

    /// The output adapter rejected the chosen firmware.
    #[error("output does not support {0:?} firmware")]
    UnsupportedFirmware(crate::source::Firmware),
}
