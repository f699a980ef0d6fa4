use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::storage::{processed_filename, StorageLayout};

use super::cleanup::ArtifactCleaner;
use super::copy::copy_preserving_metadata;
use super::prepare::{ImagePreparer, WorkingInput};
use super::probe::probe_tool;
use super::runtime::{PipelineCommandRunner, StdPipelineCommandRunner};
use super::transform::{profile_note, ColorTransformInvoker, TransformProfile, FALLBACK_NOTE};
use super::verify::{verify_intermediate, VerificationPolicy};

/// Why the transform attempt was abandoned. Every variant is masked: the
/// pipeline logs it and falls back to the working input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageFailure {
    #[error("transform engine unavailable: {0}")]
    ToolUnavailable(String),
    #[error("transform could not be executed: {0}")]
    LaunchFailed(String),
    #[error("transform exited with status {status_code}")]
    CommandFailed { status_code: i32, stderr: String },
    #[error("transform did not finish within {timeout_ms} ms")]
    TimedOut { timeout_ms: u64 },
    #[error("transform wrote no output at {}", .0.display())]
    IntermediateMissing(PathBuf),
    #[error("transform output does not decode: {0}")]
    IntermediateUndecodable(String),
}

impl StageFailure {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ToolUnavailable(_) => "tool_unavailable",
            Self::LaunchFailed(_) => "launch_failed",
            Self::CommandFailed { .. } => "command_failed",
            Self::TimedOut { .. } => "timed_out",
            Self::IntermediateMissing(_) => "intermediate_missing",
            Self::IntermediateUndecodable(_) => "intermediate_undecodable",
        }
    }
}

/// The only failure reported to callers: the final copy could not be made.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to write output '{}' from '{}': {source}", .dest.display(), .source_path.display())]
    Copy {
        source_path: PathBuf,
        dest: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransformStatus {
    Applied,
    Fallback { reason: String, code: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineOutcome {
    pub output_path: PathBuf,
    pub output_filename: String,
    pub transform: TransformStatus,
    pub working_input_resized: bool,
    pub profile_applied: bool,
    pub note: String,
}

impl PipelineOutcome {
    pub fn hdr_applied(&self) -> bool {
        matches!(self.transform, TransformStatus::Applied)
    }
}

/// Seam between the request layer and a concrete pipeline.
pub trait ImagePipeline: Send + Sync + 'static {
    /// Runs the pipeline for an upload that already exists on disk.
    fn process(&self, filename: &str) -> Result<PipelineOutcome, PipelineError>;
}

pub type SharedImagePipeline = Arc<dyn ImagePipeline>;

/// Picks the file copied to the final output: the verified transform result
/// when there is one, the working input otherwise.
pub fn select_copy_source<'a>(
    attempt: &'a Result<PathBuf, StageFailure>,
    working_input: &'a Path,
) -> &'a Path {
    match attempt {
        Ok(intermediate) => intermediate.as_path(),
        Err(_) => working_input,
    }
}

type CopyFn = fn(&Path, &Path) -> std::io::Result<u64>;

pub struct HdrPipeline<R> {
    layout: StorageLayout,
    config: PipelineConfig,
    preparer: ImagePreparer,
    invoker: ColorTransformInvoker,
    runner: R,
    copy_output: CopyFn,
}

impl<R> HdrPipeline<R>
where
    R: PipelineCommandRunner,
{
    pub fn new(layout: StorageLayout, config: PipelineConfig, runner: R) -> Self {
        let preparer = ImagePreparer::new(config.max_working_dimension);
        let invoker = ColorTransformInvoker {
            program: config.tool_program.clone(),
            gain: config.gain,
            highlight_exponent: config.highlight_exponent,
            timeout: config.transform_timeout(),
        };
        Self {
            layout,
            config,
            preparer,
            invoker,
            runner,
            copy_output: copy_preserving_metadata,
        }
    }

    pub fn run(&self, filename: &str) -> Result<PipelineOutcome, PipelineError> {
        let input = self.layout.upload_path(filename);
        let intermediate = self.layout.intermediate_path(filename);
        let output = self.layout.processed_path(filename);
        let work_dir = self.layout.work_dir();
        if let Err(error) = fs::create_dir_all(work_dir.as_path()) {
            // Preparation and the transform then fail and fall back on their own.
            warn!(path = %work_dir.display(), %error, "could not create scratch directory");
        }

        // Dropped last, after the final copy, whichever branch returns.
        let mut cleaner = ArtifactCleaner::new();
        cleaner.track(intermediate.as_path());

        let working = self
            .preparer
            .prepare(input.as_path(), self.layout.working_path(filename).as_path());
        if working.resized && self.config.remove_working_artifact {
            cleaner.track(working.path.as_path());
        }

        let profile =
            TransformProfile::locate(self.layout.asset_path(self.config.profile_file_name.as_str()));
        info!(profile_found = profile.is_some(), "transform profile");

        let attempt = self.attempt_transform(&working, profile.as_ref(), intermediate.as_path());
        let source = select_copy_source(&attempt, working.path.as_path());

        let transform = match (self.copy_output)(source, output.as_path()) {
            Ok(_) => match &attempt {
                Ok(_) => TransformStatus::Applied,
                Err(failure) => fallback_status(failure),
            },
            Err(error) if attempt.is_ok() => {
                warn!(%error, "copying transform output failed; falling back to working input");
                (self.copy_output)(working.path.as_path(), output.as_path()).map_err(
                    |source| PipelineError::Copy {
                        source_path: working.path.clone(),
                        dest: output.clone(),
                        source,
                    },
                )?;
                TransformStatus::Fallback {
                    reason: format!("copying transform output failed: {error}"),
                    code: String::from("output_copy_failed"),
                }
            }
            Err(source_err) => {
                return Err(PipelineError::Copy {
                    source_path: working.path.clone(),
                    dest: output,
                    source: source_err,
                });
            }
        };

        let applied = matches!(transform, TransformStatus::Applied);
        let note = if applied {
            profile_note(profile.as_ref(), self.config.profile_file_name.as_str())
        } else {
            String::from(FALLBACK_NOTE)
        };
        let outcome = PipelineOutcome {
            output_filename: processed_filename(filename),
            output_path: output,
            transform,
            working_input_resized: working.resized,
            profile_applied: applied && profile.is_some(),
            note,
        };
        info!(
            output = %outcome.output_path.display(),
            hdr_applied = outcome.hdr_applied(),
            "pipeline finished"
        );
        Ok(outcome)
    }

    /// Probe, invoke, verify. The first failing stage ends the attempt.
    fn attempt_transform(
        &self,
        working: &WorkingInput,
        profile: Option<&TransformProfile>,
        intermediate: &Path,
    ) -> Result<PathBuf, StageFailure> {
        probe_tool(
            &self.runner,
            self.config.tool_program.as_str(),
            self.config.transform_timeout(),
        )?;
        self.invoker
            .invoke(&self.runner, working.path.as_path(), profile, intermediate)?;
        verify_intermediate(intermediate, self.verification())?;
        Ok(intermediate.to_path_buf())
    }

    fn verification(&self) -> VerificationPolicy {
        self.config.verification
    }
}

impl<R> ImagePipeline for HdrPipeline<R>
where
    R: PipelineCommandRunner,
{
    fn process(&self, filename: &str) -> Result<PipelineOutcome, PipelineError> {
        self.run(filename)
    }
}

fn fallback_status(failure: &StageFailure) -> TransformStatus {
    warn!(reason = %failure, "falling back to copying the working input without HDR effect");
    TransformStatus::Fallback {
        reason: failure.to_string(),
        code: failure.code().to_string(),
    }
}

pub fn default_hdr_pipeline(
    layout: StorageLayout,
    config: PipelineConfig,
) -> HdrPipeline<StdPipelineCommandRunner> {
    HdrPipeline::new(layout, config, StdPipelineCommandRunner)
}
