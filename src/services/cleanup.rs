use std::path::PathBuf;
use tempfile::TempPath;
use tracing::{debug, warn};

/// Outcome of releasing a request's temporary files
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    pub failed: usize,
}

/// Owns every temporary file created while handling one request.
///
/// Files are registered the moment they are created. `release` removes each
/// of them exactly once; if the guard is dropped without an explicit release
/// (early return, unwinding) the same happens in `Drop`. Individual removal
/// failures are logged and counted, never propagated.
#[derive(Debug, Default)]
pub struct CleanupGuard {
    files: Vec<TempPath>,
}

impl CleanupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of a freshly created temporary file and returns its path.
    pub fn register(&mut self, path: TempPath) -> PathBuf {
        let owned = path.to_path_buf();
        self.files.push(path);
        owned
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn release(mut self) -> CleanupReport {
        self.release_all()
    }

    fn release_all(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();

        for path in self.files.drain(..) {
            let shown = path.display().to_string();
            match path.close() {
                Ok(()) => {
                    debug!("Removed spooled file {}", shown);
                    report.removed += 1;
                }
                Err(e) => {
                    warn!("Failed to remove spooled file {}: {}", shown, e);
                    report.failed += 1;
                }
            }
        }

        report
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.files.is_empty() {
            let report = self.release_all();
            debug!(
                removed = report.removed,
                failed = report.failed,
                "Cleanup guard released on drop"
            );
        }
    }
}
