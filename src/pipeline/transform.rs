use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::hdr::StageFailure;
use super::runtime::{CommandSpec, PipelineCommandRunner, PipelineRuntimeError};

pub const PROFILE_APPLIED_NOTE: &str = "HDR effect applied with ICC profile.";
pub const FALLBACK_NOTE: &str = "HDR effect could not be applied; the output is a copy of the original image.";

/// Optional color profile attached to the transform when the file exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformProfile {
    pub path: PathBuf,
}

impl TransformProfile {
    /// `None` when the profile file is absent; that only degrades quality.
    pub fn locate(path: PathBuf) -> Option<Self> {
        if path.is_file() {
            Some(Self { path })
        } else {
            None
        }
    }
}

pub fn profile_note(profile: Option<&TransformProfile>, profile_file_name: &str) -> String {
    match profile {
        Some(_) => String::from(PROFILE_APPLIED_NOTE),
        None => format!(
            "HDR effect applied. Note: For full HDR effect, ensure '{profile_file_name}' is in the assets directory."
        ),
    }
}

/// Builds and runs the multi-stage tone-mapping command.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorTransformInvoker {
    pub program: String,
    pub gain: f32,
    pub highlight_exponent: f32,
    pub timeout: Option<Duration>,
}

impl ColorTransformInvoker {
    pub fn build_command(
        &self,
        input: &Path,
        profile: Option<&TransformProfile>,
        output: &Path,
    ) -> CommandSpec {
        let mut spec = CommandSpec::new(self.program.as_str())
            .arg(path_arg(input))
            .arg("-define")
            .arg("quantum:format=floating-point")
            .arg("-colorspace")
            .arg("RGB")
            .arg("-auto-gamma")
            .arg("-evaluate")
            .arg("Multiply")
            .arg(self.gain.to_string())
            .arg("-evaluate")
            .arg("Pow")
            .arg(self.highlight_exponent.to_string())
            .arg("-colorspace")
            .arg("sRGB")
            .arg("-depth")
            .arg("16");
        if let Some(profile) = profile {
            spec = spec.arg("-profile").arg(path_arg(profile.path.as_path()));
        }
        spec.arg(path_arg(output)).with_timeout(self.timeout)
    }

    /// Runs the transform once. On success the intermediate file is expected
    /// at `output`; the caller verifies that.
    pub fn invoke<R>(
        &self,
        runner: &R,
        input: &Path,
        profile: Option<&TransformProfile>,
        output: &Path,
    ) -> Result<(), StageFailure>
    where
        R: PipelineCommandRunner + ?Sized,
    {
        remove_stale(output);
        let spec = self.build_command(input, profile, output);
        info!(command = %spec.display_line(), "running transform");

        let result = match runner.run(&spec) {
            Ok(result) => result,
            Err(PipelineRuntimeError::TimedOut { timeout_ms, .. }) => {
                warn!(timeout_ms, "transform timed out");
                return Err(StageFailure::TimedOut { timeout_ms });
            }
            Err(error) => {
                warn!(%error, "transform could not be executed");
                return Err(StageFailure::LaunchFailed(error.to_string()));
            }
        };

        if !result.success() {
            warn!(
                status_code = result.status_code,
                stderr = %result.stderr.trim(),
                stdout = %result.stdout.trim(),
                "transform command failed"
            );
            return Err(StageFailure::CommandFailed {
                status_code: result.status_code,
                stderr: result.stderr,
            });
        }

        debug!(stdout = %result.stdout.trim(), "transform output");
        if !result.stderr.trim().is_empty() {
            debug!(stderr = %result.stderr.trim(), "transform diagnostics (non-fatal)");
        }
        Ok(())
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// A leftover from an earlier crashed request would mask a silent no-op.
fn remove_stale(output: &Path) {
    if !output.exists() {
        return;
    }
    match fs::remove_file(output) {
        Ok(()) => debug!(path = %output.display(), "removed stale intermediate"),
        Err(error) => warn!(path = %output.display(), %error, "could not remove stale intermediate"),
    }
}
