use std::fs::{self, File, FileTimes};
use std::path::Path;

use tracing::{info, warn};

/// Copies bytes, permissions and timestamps from `source` to `dest`.
///
/// This is the terminal step of every pipeline path, so its error is the
/// only one that reaches the caller.
pub fn copy_preserving_metadata(source: &Path, dest: &Path) -> Result<u64, std::io::Error> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = fs::copy(source, dest)?;

    let meta = fs::metadata(source)?;
    let mut times = FileTimes::new();
    if let Ok(modified) = meta.modified() {
        times = times.set_modified(modified);
    }
    if let Ok(accessed) = meta.accessed() {
        times = times.set_accessed(accessed);
    }
    // Timestamps are cosmetic; a filesystem that refuses them keeps the copy.
    match File::options().write(true).open(dest) {
        Ok(file) => {
            if let Err(error) = file.set_times(times) {
                warn!(path = %dest.display(), %error, "could not preserve timestamps");
            }
        }
        Err(error) => warn!(path = %dest.display(), %error, "could not reopen copy for timestamps"),
    }

    info!(
        from = %source.display(),
        to = %dest.display(),
        bytes,
        "copied artifact"
    );
    Ok(bytes)
}
