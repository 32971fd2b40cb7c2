//! API routes for the docflow server

pub mod files;
pub mod search;
pub mod tasks;
pub mod upload;
pub mod ws;

use axum::{
    extract::{DefaultBodyLimit, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        // File records
        .route("/files", get(files::list_files))
        .route("/files/stats", get(files::file_stats))
        .route("/files/:id", get(files::get_file).delete(files::delete_file))
        .route("/files/:id/reset", post(files::reset_stage))
        // Task submission
        .route("/tasks/convert", post(tasks::submit_convert))
        .route("/tasks/batch", post(tasks::submit_batch))
        .route("/tasks/chain", post(tasks::submit_chain))
        .route("/tasks/vectorize", post(tasks::submit_vectorize))
        .route("/tasks/:id", get(tasks::get_task))
        // Upload - with larger body limit
        .route(
            "/convert-and-vectorize",
            post(upload::convert_and_vectorize).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        // Retrieval
        .route("/search", post(search::search))
        .route("/vector-stats", get(search::vector_stats))
        .route("/info", get(info))
}

/// API info endpoint
async fn info(State(state): State<AppState>) -> Json<Value> {
    let orchestrator = state.orchestrator();
    let options = orchestrator.options();

    Json(json!({
        "name": "docflow",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Document pipeline with per-file stage tracking and live notifications",
        "converter": orchestrator.converter_name(),
        "indexer": orchestrator.indexer_name(),
        "vector_type": orchestrator.vector_type(),
        "workers": {
            "conversion": options.conversion_workers,
            "indexing": options.indexing_workers,
        },
        "limits": {
            "max_batch_files": options.max_batch_files,
            "soft_time_limit_secs": options.soft_time_limit.as_secs(),
            "hard_time_limit_secs": options.hard_time_limit.as_secs(),
        },
        "tracked_tasks": orchestrator.tracked_tasks(),
        "websocket_connections": state.hub().connection_count(),
        "endpoints": {
            "GET /api/files": "List file records (?status=uploaded|processing|completed|error|all)",
            "GET /api/files/stats": "Record counts by status",
            "GET /api/files/:id": "Get a file record",
            "DELETE /api/files/:id": "Delete a file record and its files",
            "POST /api/files/:id/reset": "Reset a stage and its successors",
            "POST /api/tasks/convert": "Convert one file",
            "POST /api/tasks/batch": "Convert several files",
            "POST /api/tasks/chain": "Convert then index one file",
            "POST /api/tasks/vectorize": "Index a markdown file",
            "GET /api/tasks/:id": "Get task state",
            "POST /api/convert-and-vectorize": "Upload a file and run the chain",
            "POST /api/search": "Search indexed documents",
            "GET /api/vector-stats": "Indexer statistics",
            "GET /ws": "Live task and file updates"
        }
    }))
}
