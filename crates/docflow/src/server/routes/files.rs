//! File record status and management endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;

use crate::error::Result;
use crate::server::state::AppState;
use crate::storage::StoreStatistics;
use crate::types::{FileRecord, FileRecordSummary, OverallStatus};

/// Query parameters for listing files
#[derive(Debug, Deserialize)]
pub struct ListFilesQuery {
    /// Filter by overall status, or `all`
    #[serde(default)]
    pub status: Option<String>,
}

/// Response for file list
#[derive(Debug, Serialize)]
pub struct FileListResponse {
    pub files: Vec<FileRecordSummary>,
    pub total: usize,
}

/// Body of a stage reset
#[derive(Debug, Deserialize)]
pub struct ResetStageRequest {
    pub stage: String,
}

/// Response for a deleted file
#[derive(Debug, Serialize)]
pub struct DeleteFileResponse {
    pub file_id: String,
    pub message: String,
    /// Files removed from disk along with the record
    pub removed_files: Vec<PathBuf>,
}

/// GET /api/files - List file records, newest first
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<ListFilesQuery>,
) -> Result<Json<FileListResponse>> {
    let filter = match query.status.as_deref() {
        None | Some("all") | Some("") => None,
        Some(status) => Some(status.parse::<OverallStatus>()?),
    };

    let files: Vec<FileRecordSummary> = state
        .store()
        .list_records(filter)?
        .iter()
        .map(FileRecord::summary)
        .collect();

    Ok(Json(FileListResponse {
        total: files.len(),
        files,
    }))
}

/// GET /api/files/stats - Counts by status
pub async fn file_stats(State(state): State<AppState>) -> Result<Json<StoreStatistics>> {
    Ok(Json(state.store().statistics()?))
}

/// GET /api/files/:id - Full record with stage history
pub async fn get_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<FileRecord>> {
    Ok(Json(state.store().get_record(&file_id)?))
}

/// DELETE /api/files/:id - Remove the record, its upload and its markdown
pub async fn delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<DeleteFileResponse>> {
    let record = state.store().delete_record(&file_id)?;

    let mut removed_files = Vec::new();
    let candidates = [
        record.paths.upload_path.clone(),
        record.paths.markdown_path.clone(),
    ];
    for path in candidates.into_iter().flatten() {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed_files.push(path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
        }
    }

    state
        .hub()
        .publish_file_update(&file_id, json!({"file_id": file_id, "deleted": true}));

    Ok(Json(DeleteFileResponse {
        message: format!("Deleted file {}", record.original_filename),
        file_id,
        removed_files,
    }))
}

/// POST /api/files/:id/reset - Put a stage and its successors back to pending
pub async fn reset_stage(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Json(request): Json<ResetStageRequest>,
) -> Result<Json<FileRecord>> {
    let record = state.store().reset_stage(&file_id, &request.stage)?;

    if let Ok(data) = serde_json::to_value(&record) {
        state.hub().publish_file_update(&file_id, data);
    }

    Ok(Json(record))
}
