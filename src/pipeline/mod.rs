//! The HDR-look pipeline: prepare, probe, invoke, verify, copy, clean.
//!
//! Every failure inside the transform attempt is converted into a fallback
//! copy of the working input. Only the final copy can fail a request.

pub mod cleanup;
pub mod copy;
pub mod hdr;
pub mod prepare;
pub mod probe;
pub mod runtime;
pub mod service;
pub mod transform;
pub mod verify;

pub use hdr::{
    default_hdr_pipeline, HdrPipeline, ImagePipeline, PipelineError, PipelineOutcome,
    SharedImagePipeline, StageFailure, TransformStatus,
};
pub use service::{ProcessImageInput, ProcessImageService, ProcessRequestError};
