//! Host preflight: temp-directory free space and external tool availability.

use crate::error::PipelineError;
use crate::mountstats;
use camino::Utf8Path;
use color_eyre::Result;

/// Environment variable that relocates the large temp directory.
pub const TEMP_DIR_ENV_VAR: &str = "V2KVM_TMPDIR";

/// Minimum free bytes required in the temp directory: a heuristic that
/// folds in appliance size, kept as a constant rather than exposed as
/// configuration.
pub const MIN_TEMP_FREE_BYTES: u64 = 1024 * 1024 * 1024;

/// Verify `temp_dir` has at least [`MIN_TEMP_FREE_BYTES`] free.
pub fn check_temp_space(temp_dir: &Utf8Path) -> Result<()> {
    let stats = mountstats::statvfs(temp_dir)?;
    let available = stats.bavail * stats.bsize;
    if available < MIN_TEMP_FREE_BYTES {
        return Err(PipelineError::InsufficientTempSpace {
            path: temp_dir.to_owned(),
            available,
            required: MIN_TEMP_FREE_BYTES,
            env_var: TEMP_DIR_ENV_VAR,
        }
        .into());
    }
    Ok(())
}

/// Verify every required external tool is on `$PATH`.
pub fn check_tools_available(tools: &[&str]) -> Result<()> {
    for tool in tools {
        which::which(tool).map_err(|_| {
            color_eyre::eyre::eyre!(
                "required external tool {tool:?} was not found on PATH"
            )
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tmp_has_enough_space_in_test_environment() {
        check_temp_space(Utf8Path::new("/tmp")).expect("CI /tmp should have >1GiB free");
    }

    #[test]
    fn missing_tool_is_an_error() {
        let err = check_tools_available(&["definitely-not-a-real-binary-xyz"]).unwrap_err();
        assert!(err.to_string().contains("definitely-not-a-real-binary-xyz"));
    }
}
