use crate::core::error::{Error, Result};
use crate::core::library::{LibraryStats, PhotoLibrary};
use crate::indexing::indexer::ReindexOutcome;
use crate::search::access::content_type;
use crate::search::engine::{SearchQuery, SearchResult};
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Front-ends allowed to call the API from a browser
const ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:5173",
    "http://localhost:8501",
];

/// API error, mapped to a status code per failure kind
pub struct AppError(pub Error);

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
        Error::IndexMissing | Error::NoValidImages | Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::AccessDenied(_) => StatusCode::FORBIDDEN,
        Error::InvalidQuery(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

type ApiResult<T> = std::result::Result<T, AppError>;

/// Run a library operation on the blocking pool so model code never runs on async workers.
async fn run_blocking<T, F>(library: &Arc<PhotoLibrary>, op: F) -> ApiResult<T>
where
    F: FnOnce(&PhotoLibrary) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let library = library.clone();
    tokio::task::spawn_blocking(move || op(&library))
        .await
        .map_err(|e| Error::Unexpected(format!("Worker task failed: {}", e)))?
        .map_err(AppError)
}

async fn root_handler() -> Json<Value> {
    Json(json!({ "message": "Photo Search API", "status": "running" }))
}

async fn health_handler(State(library): State<Arc<PhotoLibrary>>) -> Json<Value> {
    Json(json!({ "status": "healthy", "ready": library.is_ready() }))
}

/// Search for images matching the query
pub async fn search_handler(
    State(library): State<Arc<PhotoLibrary>>,
    Json(query): Json<SearchQuery>,
) -> ApiResult<Json<Vec<SearchResult>>> {
    info!("Searching for {:?}", query.text);
    let results = run_blocking(&library, move |lib| lib.search(&query)).await?;
    Ok(Json(results))
}

/// Force reindex all images
pub async fn reindex_handler(State(library): State<Arc<PhotoLibrary>>) -> ApiResult<Json<Value>> {
    let (outcome, stats) = run_blocking(&library, |lib| {
        let outcome = lib.reindex()?;
        Ok((outcome, lib.stats()?))
    })
    .await?;
    let body = match outcome {
        ReindexOutcome::Rebuilt(report) => json!({
            "message": "Reindexing completed",
            "status": "success",
            "total_images": report.indexed,
            "skipped": report.skipped.len(),
        }),
        ReindexOutcome::Unchanged => json!({
            "message": "Index already up to date",
            "status": "success",
            "total_images": stats.total_images,
            "skipped": 0,
        }),
        ReindexOutcome::Aborted { skipped, .. } => json!({
            "message": "No valid embeddings generated; previous index kept",
            "status": "aborted",
            "total_images": stats.total_images,
            "skipped": skipped.len(),
        }),
    };
    Ok(Json(body))
}

/// Get indexing statistics
pub async fn stats_handler(State(library): State<Arc<PhotoLibrary>>) -> ApiResult<Json<LibraryStats>> {
    let stats = run_blocking(&library, |lib| lib.stats()).await?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub struct ImageParams {
    pub path: String,
}

/// Serve an image file from the photo library
pub async fn image_handler(
    State(library): State<Arc<PhotoLibrary>>,
    Query(params): Query<ImageParams>,
) -> ApiResult<Response> {
    let path = run_blocking(&library, move |lib| lib.resolve_image(&params.path)).await?;
    let bytes = tokio::fs::read(&path).await.map_err(Error::Io)?;
    Ok(([(header::CONTENT_TYPE, content_type(&path))], bytes).into_response())
}

/// Build the API router
pub fn create_app(library: Arc<PhotoLibrary>) -> Router {
    let origins: Vec<HeaderValue> = ALLOWED_ORIGINS
        .iter()
        .map(|o| HeaderValue::from_static(*o))
        .collect();

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/search", post(search_handler))
        .route("/reindex", post(reindex_handler))
        .route("/stats", get(stats_handler))
        .route("/image", get(image_handler))
        .with_state(library)
        .layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Bind, run the start-up rebuild in the background and serve until Ctrl+C.
///
/// Searches are answered with 503 until the start-up rebuild has finished.
pub async fn serve(library: Arc<PhotoLibrary>, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    let startup = library.clone();
    tokio::task::spawn_blocking(move || {
        if let Err(e) = startup.start() {
            error!("Start-up indexing failed: {}", e);
        }
    });

    axum::serve(listener, create_app(library))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;
    Ok(())
}
