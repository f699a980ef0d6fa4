use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

use crate::api::error::{ErrorKind, ErrorResponse};
use crate::pipeline::ProcessRequestError;
use crate::storage::upload::UploadError;

pub type ApiObject<T> = (StatusCode, Json<T>);

pub const FILE_NOT_FOUND: &str = "File not found";

pub fn error_response(
    status: StatusCode,
    kind: ErrorKind,
    code: impl Into<String>,
    message: impl Into<String>,
) -> ApiObject<Value> {
    (status, into_json(ErrorResponse::new(kind, code, message)))
}

pub fn bad_request(message: impl Into<String>) -> ApiObject<Value> {
    error_response(
        StatusCode::BAD_REQUEST,
        ErrorKind::Validation,
        "validation_error",
        message,
    )
}

pub fn not_found() -> ApiObject<Value> {
    error_response(
        StatusCode::NOT_FOUND,
        ErrorKind::Validation,
        "not_found",
        FILE_NOT_FOUND,
    )
}

pub fn internal_error(message: impl Into<String>) -> ApiObject<Value> {
    let detail = message.into();
    error!(detail = %detail, "internal api error");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Infra,
        "internal_error",
        "Internal server error",
    )
}

pub fn map_upload_error(error: UploadError) -> ApiObject<Value> {
    match error {
        UploadError::EmptyFilename | UploadError::DisallowedType => bad_request(error.to_string()),
        UploadError::Save(source) => {
            error!(%source, "upload save failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Infra,
                "save_failed",
                "Failed to save file",
            )
        }
    }
}

pub fn map_process_error(error: ProcessRequestError) -> ApiObject<Value> {
    match error {
        ProcessRequestError::InvalidFilename | ProcessRequestError::InputNotFound(_) => not_found(),
        ProcessRequestError::Pipeline(source) => {
            error!(%source, "image processing failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Infra,
                "processing_failed",
                "Failed to process image",
            )
        }
    }
}

pub fn into_json(payload: impl Serialize) -> Json<Value> {
    Json(serde_json::to_value(payload).unwrap_or_else(
        |e| json!({"ok": false, "error": format!("response serialization failed: {e}")}),
    ))
}
