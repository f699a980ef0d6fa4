use thiserror::Error;
use tracing::warn;

use crate::storage::upload::validate_stored_filename;
use crate::storage::StorageLayout;

use super::hdr::{PipelineError, PipelineOutcome, SharedImagePipeline};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessImageInput {
    pub filename: Option<String>,
}

/// Rejects requests that never reach the pipeline: no filename, an
/// unsanitized one, or an upload that is not on disk.
#[derive(Clone)]
pub struct ProcessImageService {
    pipeline: SharedImagePipeline,
    layout: StorageLayout,
}

impl ProcessImageService {
    pub fn new(pipeline: SharedImagePipeline, layout: StorageLayout) -> Self {
        Self { pipeline, layout }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn process(&self, input: ProcessImageInput) -> Result<PipelineOutcome, ProcessRequestError> {
        let filename = validate_process_input(&self.layout, &input)?;
        self.pipeline
            .process(filename)
            .map_err(ProcessRequestError::Pipeline)
    }
}

pub fn validate_process_input<'a>(
    layout: &StorageLayout,
    input: &'a ProcessImageInput,
) -> Result<&'a str, ProcessRequestError> {
    let Some(raw) = input.filename.as_deref() else {
        return Err(ProcessRequestError::InvalidFilename);
    };
    let Some(filename) = validate_stored_filename(raw) else {
        warn!(filename = raw, "rejected unsanitized filename");
        return Err(ProcessRequestError::InvalidFilename);
    };
    if !layout.upload_path(filename).is_file() {
        warn!(filename, "upload not found");
        return Err(ProcessRequestError::InputNotFound(filename.to_string()));
    }
    Ok(filename)
}

#[derive(Debug, Error)]
pub enum ProcessRequestError {
    #[error("missing or invalid filename")]
    InvalidFilename,
    #[error("upload not found: {0}")]
    InputNotFound(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}
