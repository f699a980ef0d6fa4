use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::AppConfig;
use crate::pipeline::{default_hdr_pipeline, ProcessImageService, SharedImagePipeline};
use crate::storage::StorageLayout;

#[derive(Clone)]
pub struct AppState {
    pub service_name: &'static str,
    pub service_version: &'static str,
    pub started_unix_ms: u128,
    pub process_service: ProcessImageService,
}

impl AppState {
    pub fn new(process_service: ProcessImageService) -> Self {
        Self {
            service_name: "hdr-look-backend",
            service_version: env!("CARGO_PKG_VERSION"),
            started_unix_ms: now_unix_ms(),
            process_service,
        }
    }
}

/// Router backed by the real external transform engine.
pub fn build_router(config: &AppConfig) -> Router {
    let layout = StorageLayout::from_config(config);
    let pipeline: SharedImagePipeline = Arc::new(default_hdr_pipeline(
        layout.clone(),
        config.pipeline.clone(),
    ));
    build_router_with_pipeline(
        pipeline,
        layout,
        config.max_upload_bytes,
    )
}

pub fn build_router_with_pipeline(
    pipeline: SharedImagePipeline,
    layout: StorageLayout,
    max_upload_bytes: usize,
) -> Router {
    let state = AppState::new(ProcessImageService::new(pipeline, layout));
    Router::new()
        .route("/health", get(health_handler))
        .route("/upload", post(crate::api::images::upload_handler))
        .route("/process", post(crate::api::images::process_handler))
        .route(
            "/download/{filename}",
            get(crate::api::images::download_handler),
        )
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, config: AppConfig) -> std::io::Result<()> {
    StorageLayout::from_config(&config).ensure_dirs()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = build_router(&config);
    info!(
        bind = %addr,
        uploads = %config.upload_dir.display(),
        processed = %config.processed_dir.display(),
        tool = %config.pipeline.tool_program,
        "starting hdr-look-backend HTTP surface"
    );
    axum::serve(listener, app).await
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "status": "ok",
            "service": state.service_name,
            "version": state.service_version,
            "started_unix_ms": state.started_unix_ms,
        })),
    )
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis())
}
