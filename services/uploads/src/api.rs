use crate::config::ApiConfig;
use crate::error::UploadError;
use crate::metadata_store::MetadataStore;
use crate::model::UploadResponse;
use crate::pipeline::UploadPipeline;
use crate::resolver::RetrievalResolver;
use crate::views;
use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument};

const FILE_FIELD: &str = "file";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<UploadPipeline>,
    pub resolver: Arc<RetrievalResolver>,
    pub metadata_store: Arc<dyn MetadataStore>,
    /// Cancelled on service shutdown; in-flight uploads observe a child token
    pub shutdown: CancellationToken,
    /// Name of the serving host, shown on HTML pages
    pub hostname: Arc<str>,
}

/// Best-effort name of this host
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // The pipeline enforces the content limit while streaming
        .route(
            "/api/uploads",
            post(create_upload).layer(DefaultBodyLimit::disable()),
        )
        .route("/u/:short_id", get(view_upload))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn index(State(state): State<AppState>) -> Html<String> {
    Html(views::render_index(&state.hostname))
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "upload-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.metadata_store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Accept a multipart upload and stream its `file` field into the pipeline
#[instrument(skip(state, multipart))]
async fn create_upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, UploadError> {
    let mut multipart = multipart.map_err(|e| {
        metrics::counter!("uploads.rejected", "reason" => "invalid_request").increment(1);
        UploadError::InvalidRequest(e.body_text())
    })?;

    loop {
        let field = multipart.next_field().await.map_err(|e| {
            metrics::counter!("uploads.rejected", "reason" => "invalid_request").increment(1);
            UploadError::InvalidRequest(e.body_text())
        })?;

        let Some(field) = field else {
            debug!("Multipart body has no file field");
            metrics::counter!("uploads.rejected", "reason" => "missing_file").increment(1);
            return Err(UploadError::MissingFile);
        };

        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let content_type = field.content_type().unwrap_or_default().to_string();
        let cancel = state.shutdown.child_token();

        let stored = state.pipeline.ingest(field, &content_type, &cancel).await?;
        return Ok(Json(UploadResponse::from(&stored)));
    }
}

#[instrument(skip(state))]
async fn view_upload(
    State(state): State<AppState>,
    Path(short_id): Path<String>,
) -> (StatusCode, Html<String>) {
    match state.resolver.resolve(&short_id).await {
        Ok(stored) => (
            StatusCode::OK,
            Html(views::render_upload(&stored, &state.hostname)),
        ),
        Err(UploadError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Html(views::render_not_found(&short_id, &state.hostname)),
        ),
        Err(e) => {
            error!(error = %e, "Failed to resolve upload");
            (
                e.status_code(),
                Html(views::render_error(&state.hostname)),
            )
        }
    }
}

/// Start the API server, draining connections once `state.shutdown` fires
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting upload API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("API server error")?;

    Ok(())
}
