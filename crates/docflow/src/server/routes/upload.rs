//! Upload endpoint: store the file, create its record and start the chain

use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::Serialize;
use std::path::Path;

use crate::error::{Error, Result};
use crate::processing::{ChainMode, TaskId};
use crate::server::state::AppState;

/// Response for an accepted upload
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub file_id: String,
    pub task_id: TaskId,
    pub filename: String,
    pub vector_type: String,
    pub status: String,
    pub check_status_url: String,
    pub file_status_url: String,
}

/// POST /api/convert-and-vectorize - Upload one file and run convert then index
///
/// Multipart fields: `file` (required) and `mode` (`inline` or `queued`).
pub async fn convert_and_vectorize(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut mode = ChainMode::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::bad_request(format!("Failed to read multipart field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| Error::bad_request("file field has no filename"))?;
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| Error::bad_request(format!("Failed to read file: {}", e)))?;
                upload = Some((filename, data.to_vec()));
            }
            "mode" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| Error::bad_request(format!("Failed to read mode: {}", e)))?;
                mode = serde_json::from_value(serde_json::Value::String(text.trim().to_string()))
                    .map_err(|_| Error::bad_request(format!("Unknown chain mode: {}", text)))?;
            }
            other => tracing::debug!("Ignoring multipart field '{}'", other),
        }
    }

    let (filename, data) = upload.ok_or_else(|| Error::bad_request("No file provided"))?;

    let orchestrator = state.orchestrator();
    if !orchestrator.supports_file(Path::new(&filename)) {
        return Err(Error::bad_request(format!(
            "File type not supported by {}: {}",
            orchestrator.converter_name(),
            filename
        )));
    }

    let record = state.store().create_record(&filename, data.len() as u64)?;
    let upload_path = record
        .paths
        .upload_path
        .clone()
        .ok_or_else(|| Error::internal("new record has no upload path"))?;

    if let Err(e) = write_upload(&upload_path, &data).await {
        tracing::error!("Failed to store upload {}: {}", upload_path.display(), e);
        if let Err(cleanup) = state.store().delete_record(&record.file_id) {
            tracing::warn!("Failed to drop record {}: {}", record.file_id, cleanup);
        }
        return Err(e);
    }

    tracing::info!(
        "Stored upload {} ({} bytes) as {}",
        filename,
        data.len(),
        record.file_id
    );

    let handle = orchestrator
        .submit_chain(&upload_path, record.file_id.clone(), mode)
        .await?;

    Ok(Json(UploadResponse {
        message: "File uploaded, conversion and vectorization started".to_string(),
        check_status_url: format!("/api/tasks/{}", handle.id()),
        file_status_url: format!("/api/files/{}", record.file_id),
        file_id: record.file_id,
        task_id: handle.id(),
        filename,
        vector_type: orchestrator.vector_type().to_string(),
        status: "processing".to_string(),
    }))
}

async fn write_upload(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, data).await?;
    Ok(())
}
