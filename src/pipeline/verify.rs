use std::path::Path;

use image::GenericImageView;
use serde::Deserialize;
use tracing::{info, warn};

use super::hdr::StageFailure;

/// How hard the intermediate artifact is checked after a zero exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationPolicy {
    /// Existence only.
    Skip,
    /// Decode and log; a decode failure does not force fallback.
    #[default]
    BestEffort,
    /// A decode failure forces fallback.
    Strict,
}

pub fn verify_intermediate(path: &Path, policy: VerificationPolicy) -> Result<(), StageFailure> {
    if !path.is_file() {
        warn!(path = %path.display(), "transform exited zero but wrote no output");
        return Err(StageFailure::IntermediateMissing(path.to_path_buf()));
    }
    if policy == VerificationPolicy::Skip {
        return Ok(());
    }

    match image::open(path) {
        Ok(image) => {
            let (width, height) = image.dimensions();
            info!(
                path = %path.display(),
                width,
                height,
                color = ?image.color(),
                "verified transform output"
            );
            Ok(())
        }
        Err(error) if policy == VerificationPolicy::Strict => {
            warn!(path = %path.display(), %error, "transform output does not decode");
            Err(StageFailure::IntermediateUndecodable(error.to_string()))
        }
        Err(error) => {
            warn!(path = %path.display(), %error, "transform output does not decode; keeping it");
            Ok(())
        }
    }
}
