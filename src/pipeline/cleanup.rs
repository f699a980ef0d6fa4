use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Deletes every tracked temp file when dropped, on every exit path
/// including early returns and unwinding. Deletion failures are logged
/// and never replace the pipeline's own result.
#[derive(Debug, Default)]
pub struct ArtifactCleaner {
    tracked: Vec<PathBuf>,
}

impl ArtifactCleaner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.tracked.contains(&path) {
            self.tracked.push(path);
        }
    }
}

impl Drop for ArtifactCleaner {
    fn drop(&mut self) {
        for path in self.tracked.drain(..) {
            remove_if_present(path.as_path());
        }
    }
}

fn remove_if_present(path: &Path) {
    if !path.exists() {
        return;
    }
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed temporary file"),
        Err(error) => warn!(path = %path.display(), %error, "failed to remove temporary file"),
    }
}
