//! The exit-time cleanup guard.
//!
//! An explicit scope guard owned by the pipeline driver, rather than a
//! process-wide mutable flag and an on-exit handler: dropping it unlinks
//! every path still registered, and it is disarmed once metadata emission
//! succeeds.

use crate::adapters::TargetFile;
use camino::Utf8PathBuf;
use tracing::debug;

/// Tracks overlay and target paths that must be removed if the pipeline
/// aborts before completing, and stops doing so once disarmed.
#[derive(Debug, Default)]
pub struct CleanupGuard {
    overlay_paths: Vec<Utf8PathBuf>,
    target_files: Vec<TargetFile>,
    armed: bool,
    preserve_overlays: bool,
}

impl CleanupGuard {
    /// Create a new, armed guard with nothing registered yet.
    ///
    /// `preserve_overlays` is the user's `--preserve-overlays` choice
    /// (debug-overlay mode): when set, overlays survive both a clean exit
    /// and an aborted one, the same as a disarmed guard's targets.
    pub fn new(preserve_overlays: bool) -> Self {
        Self {
            overlay_paths: Vec::new(),
            target_files: Vec::new(),
            armed: true,
            preserve_overlays,
        }
    }

    /// Register an overlay path for deletion if the guard is still armed
    /// when it drops.
    pub fn register_overlay(&mut self, path: Utf8PathBuf) {
        self.overlay_paths.push(path);
    }

    /// Register a target file for deletion if the guard is still armed when
    /// it drops. Block-device targets and URI targets are never unlinked
    /// even while armed; only plain file paths are.
    pub fn register_target(&mut self, target: TargetFile) {
        self.target_files.push(target);
    }

    /// Disarm the guard: called once metadata emission succeeds. After
    /// this, dropping the guard does nothing.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Whether the guard would still unlink on drop.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    fn cleanup_now(&self) {
        if !self.preserve_overlays {
            for path in &self.overlay_paths {
                // Errors here are swallowed: the user-visible failure is always
                // whatever aborted the pipeline in the first place.
                let _ = std::fs::remove_file(path.as_std_path());
            }
        }
        if self.armed {
            for target in &self.target_files {
                if let TargetFile::Path(path) = target {
                    if is_block_device(path) {
                        continue;
                    }
                    let _ = std::fs::remove_file(path.as_std_path());
                }
            }
        }
    }
}

fn is_block_device(path: &Utf8PathBuf) -> bool {
    std::fs::metadata(path.as_std_path())
        .map(|meta| {
            use std::os::unix::fs::FileTypeExt;
            meta.file_type().is_block_device()
        })
        .unwrap_or(false)
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!("pipeline aborted, cleaning up overlays and partial targets");
        }
        self.cleanup_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn armed_guard_removes_registered_target_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path: Utf8PathBuf = dir.path().join("target.raw").try_into().unwrap();
        std::fs::File::create(path.as_std_path())
            .unwrap()
            .write_all(b"data")
            .unwrap();
        assert!(path.exists());

        {
            let mut guard = CleanupGuard::new(false);
            guard.register_target(TargetFile::Path(path.clone()));
        }

        assert!(!path.exists());
    }

    #[test]
    fn disarmed_guard_leaves_target_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path: Utf8PathBuf = dir.path().join("target.raw").try_into().unwrap();
        std::fs::File::create(path.as_std_path()).unwrap();

        {
            let mut guard = CleanupGuard::new(false);
            guard.register_target(TargetFile::Path(path.clone()));
            guard.disarm();
        }

        assert!(path.exists());
    }

    #[test]
    fn overlay_paths_are_removed_by_default_even_when_disarmed() {
        let dir = tempfile::tempdir().unwrap();
        let path: Utf8PathBuf = dir.path().join("overlay.qcow2").try_into().unwrap();
        std::fs::File::create(path.as_std_path()).unwrap();

        {
            let mut guard = CleanupGuard::new(false);
            guard.register_overlay(path.clone());
            guard.disarm();
        }

        assert!(!path.exists());
    }

    #[test]
    fn preserve_overlays_keeps_overlay_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path: Utf8PathBuf = dir.path().join("overlay.qcow2").try_into().unwrap();
        std::fs::File::create(path.as_std_path()).unwrap();

        {
            let mut guard = CleanupGuard::new(true);
            guard.register_overlay(path.clone());
            guard.disarm();
        }

        assert!(path.exists());
    }

    #[test]
    fn preserve_overlays_does_not_affect_target_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let path: Utf8PathBuf = dir.path().join("target.raw").try_into().unwrap();
        std::fs::File::create(path.as_std_path()).unwrap();

        {
            let mut guard = CleanupGuard::new(true);
            guard.register_target(TargetFile::Path(path.clone()));
        }

        assert!(!path.exists());
    }
}
