pub mod upload;

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::AppConfig;

pub const PROCESSED_PREFIX: &str = "processed_HDR_";
pub const INTERMEDIATE_PREFIX: &str = "brightened_";
pub const WORKING_PREFIX: &str = "resized_";
/// Scratch directory under the upload directory. Sanitized upload names
/// never start with a dot, so nothing stored by an upload can land here.
pub const WORK_SUBDIR: &str = ".work";

/// The three flat directories the service reads and writes, plus a scratch
/// directory for pipeline temp files.
///
/// Every derived path is a pure function of the sanitized upload filename,
/// so two requests for the same name share the same temp and output paths.
/// Temp paths live in the scratch directory and never alias an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    pub upload_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub assets_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(
        upload_dir: impl Into<PathBuf>,
        processed_dir: impl Into<PathBuf>,
        assets_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            processed_dir: processed_dir.into(),
            assets_dir: assets_dir.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.upload_dir.clone(),
            config.processed_dir.clone(),
            config.assets_dir.clone(),
        )
    }

    /// Creates the upload, scratch and processed directories. The asset
    /// directory is optional and left alone.
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(self.work_dir())?;
        fs::create_dir_all(self.processed_dir.as_path())?;
        Ok(())
    }

    pub fn work_dir(&self) -> PathBuf {
        self.upload_dir.join(WORK_SUBDIR)
    }

    pub fn upload_path(&self, filename: &str) -> PathBuf {
        self.upload_dir.join(filename)
    }

    pub fn working_path(&self, filename: &str) -> PathBuf {
        self.work_dir().join(format!("{WORKING_PREFIX}{filename}"))
    }

    pub fn intermediate_path(&self, filename: &str) -> PathBuf {
        self.work_dir().join(format!("{INTERMEDIATE_PREFIX}{filename}"))
    }

    pub fn processed_path(&self, filename: &str) -> PathBuf {
        self.processed_dir.join(processed_filename(filename))
    }

    pub fn asset_path(&self, name: &str) -> PathBuf {
        self.assets_dir.join(name)
    }

    pub fn processed_dir(&self) -> &Path {
        self.processed_dir.as_path()
    }
}

pub fn processed_filename(filename: &str) -> String {
    format!("{PROCESSED_PREFIX}{filename}")
}

pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|v| v.to_str())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}
