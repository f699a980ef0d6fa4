use std::fs;

use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::handler_utils::{
    bad_request, internal_error, into_json, map_process_error, map_upload_error, not_found,
    ApiObject,
};
use crate::api::server::AppState;
use crate::pipeline::{ProcessImageInput, TransformStatus};
use crate::storage::mime_for_path;
use crate::storage::upload::{save_upload, validate_stored_filename, UploadError};

const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessRequestBody {
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct UploadResponse {
    ok: bool,
    filename: String,
}

#[derive(Debug, Clone, Serialize)]
struct ProcessResponse {
    ok: bool,
    processed_filename: String,
    hdr_applied: bool,
    profile_applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    fallback_reason: Option<String>,
    note: String,
}

pub async fn upload_handler(State(state): State<AppState>, mut multipart: Multipart) -> ApiObject<Value> {
    let mut upload = None::<(String, Vec<u8>)>;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some(UPLOAD_FIELD) {
                    continue;
                }
                let name = field.file_name().unwrap_or_default().to_string();
                match field.bytes().await {
                    Ok(bytes) => {
                        upload = Some((name, bytes.to_vec()));
                        break;
                    }
                    Err(error) => return bad_request(format!("Invalid upload body: {error}")),
                }
            }
            Ok(None) => break,
            Err(error) => return bad_request(format!("Invalid upload body: {error}")),
        }
    }

    let Some((raw_name, bytes)) = upload else {
        return bad_request("No file part");
    };
    if raw_name.trim().is_empty() {
        return map_upload_error(UploadError::EmptyFilename);
    }

    let layout = state.process_service.layout().clone();
    let result =
        tokio::task::spawn_blocking(move || save_upload(&layout, raw_name.as_str(), &bytes)).await;

    match result {
        Ok(Ok(filename)) => (
            StatusCode::OK,
            into_json(UploadResponse { ok: true, filename }),
        ),
        Ok(Err(error)) => map_upload_error(error),
        Err(join_error) => internal_error(format!("upload task failed: {join_error}")),
    }
}

pub async fn process_handler(
    State(state): State<AppState>,
    Json(payload): Json<ProcessRequestBody>,
) -> ApiObject<Value> {
    let service = state.process_service.clone();
    let result = tokio::task::spawn_blocking(move || {
        service.process(ProcessImageInput {
            filename: payload.filename,
        })
    })
    .await;

    match result {
        Ok(Ok(outcome)) => {
            let fallback_reason = match &outcome.transform {
                TransformStatus::Applied => None,
                TransformStatus::Fallback { reason, .. } => Some(reason.clone()),
            };
            (
                StatusCode::OK,
                into_json(ProcessResponse {
                    ok: true,
                    hdr_applied: outcome.hdr_applied(),
                    profile_applied: outcome.profile_applied,
                    processed_filename: outcome.output_filename,
                    fallback_reason,
                    note: outcome.note,
                }),
            )
        }
        Ok(Err(error)) => map_process_error(error),
        Err(join_error) => internal_error(format!("process task failed: {join_error}")),
    }
}

pub async fn download_handler(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Response {
    let Some(name) = validate_stored_filename(filename.as_str()).map(str::to_string) else {
        warn!(filename = %filename, "rejected download name");
        return not_found().into_response();
    };
    let path = state.process_service.layout().processed_dir().join(name.as_str());
    let read_path = path.clone();
    let result = tokio::task::spawn_blocking(move || fs::read(read_path)).await;

    match result {
        Ok(Ok(bytes)) => {
            info!(path = %path.display(), bytes = bytes.len(), "serving download");
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, mime_for_path(path.as_path()).to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{name}\""),
                    ),
                ],
                bytes,
            )
                .into_response()
        }
        Ok(Err(error)) => {
            warn!(path = %path.display(), %error, "download not found");
            not_found().into_response()
        }
        Err(join_error) => internal_error(format!("download task failed: {join_error}")).into_response(),
    }
}
