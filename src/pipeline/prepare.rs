//! Bounds the working resolution before the external transform runs.
//!
//! Oversized uploads are resized to fit inside a square bound, preserving
//! aspect ratio, and written next to the original. Any failure here keeps
//! the original upload as the working input.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use tracing::{info, warn};

/// Resampling filter for downsizing. Lanczos keeps edges crisp on photos.
const RESIZE_FILTER: FilterType = FilterType::Lanczos3;

/// The image actually fed to the transform stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingInput {
    pub path: PathBuf,
    pub resized: bool,
}

impl WorkingInput {
    fn original(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            resized: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePreparer {
    max_dimension: u32,
}

impl ImagePreparer {
    pub fn new(max_dimension: u32) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
        }
    }

    /// Returns the working input for `input`, writing a resized copy to
    /// `working_path` when either side exceeds the bound.
    pub fn prepare(&self, input: &Path, working_path: &Path) -> WorkingInput {
        let image = match image::open(input) {
            Ok(image) => image,
            Err(error) => {
                warn!(path = %input.display(), %error, "could not decode input; using it unchanged");
                return WorkingInput::original(input);
            }
        };

        let (width, height) = image.dimensions();
        if width <= self.max_dimension && height <= self.max_dimension {
            return WorkingInput::original(input);
        }

        let resized = image.resize(self.max_dimension, self.max_dimension, RESIZE_FILTER);
        let dimensions = resized.dimensions();
        if let Err(message) = save_working_copy(resized, working_path) {
            warn!(
                path = %working_path.display(),
                error = %message,
                "could not write resized working copy; using original"
            );
            return WorkingInput::original(input);
        }

        info!(
            from_width = width,
            from_height = height,
            to_width = dimensions.0,
            to_height = dimensions.1,
            path = %working_path.display(),
            "resized oversized input"
        );
        WorkingInput {
            path: working_path.to_path_buf(),
            resized: true,
        }
    }
}

fn save_working_copy(image: DynamicImage, path: &Path) -> Result<(), String> {
    let format = ImageFormat::from_path(path).map_err(|e| e.to_string())?;
    // JPEG has no alpha channel and GIF frames are 8-bit RGBA.
    let image = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
        ImageFormat::Gif => DynamicImage::ImageRgba8(image.to_rgba8()),
        _ => image,
    };
    image
        .save_with_format(path, format)
        .map_err(|e| e.to_string())
}
