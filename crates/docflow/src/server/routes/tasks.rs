//! Task submission and status endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;
use crate::processing::{ChainMode, TaskHandle, TaskId, TaskState};
use crate::server::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConvertTaskRequest {
    pub file_path: PathBuf,
    #[serde(default)]
    pub file_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchTaskRequest {
    pub file_paths: Vec<PathBuf>,
    #[serde(default)]
    pub file_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ChainTaskRequest {
    pub file_path: PathBuf,
    pub file_id: String,
    #[serde(default)]
    pub mode: ChainMode,
    /// Block until the terminal task finishes
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Deserialize)]
pub struct VectorizeTaskRequest {
    pub markdown_path: PathBuf,
    #[serde(default)]
    pub file_id: Option<String>,
}

/// Response for a submitted task
#[derive(Debug, Serialize)]
pub struct TaskSubmittedResponse {
    pub task_id: TaskId,
    pub message: String,
    pub check_status_url: String,
    /// Final state, present when the caller asked to wait
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TaskState>,
}

impl TaskSubmittedResponse {
    fn queued(handle: &TaskHandle, what: &str) -> Self {
        Self {
            task_id: handle.id(),
            message: format!("{} task queued", what),
            check_status_url: format!("/api/tasks/{}", handle.id()),
            state: None,
        }
    }
}

/// POST /api/tasks/convert - Convert one stored file
pub async fn submit_convert(
    State(state): State<AppState>,
    Json(request): Json<ConvertTaskRequest>,
) -> Result<Json<TaskSubmittedResponse>> {
    let handle = state
        .orchestrator()
        .submit_single(request.file_path, request.file_id)
        .await?;
    Ok(Json(TaskSubmittedResponse::queued(&handle, "Conversion")))
}

/// POST /api/tasks/batch - Convert several stored files
pub async fn submit_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchTaskRequest>,
) -> Result<Json<TaskSubmittedResponse>> {
    let count = request.file_paths.len();
    let handle = state
        .orchestrator()
        .submit_batch(request.file_paths, request.file_ids)
        .await?;
    Ok(Json(TaskSubmittedResponse::queued(
        &handle,
        &format!("Batch conversion of {} files", count),
    )))
}

/// POST /api/tasks/chain - Convert then index one file
pub async fn submit_chain(
    State(state): State<AppState>,
    Json(request): Json<ChainTaskRequest>,
) -> Result<Json<TaskSubmittedResponse>> {
    let handle = state
        .orchestrator()
        .submit_chain(request.file_path, request.file_id, request.mode)
        .await?;

    let mut response = TaskSubmittedResponse::queued(&handle, "Convert and vectorize");
    if request.wait {
        response.state = Some(handle.wait().await);
    }
    Ok(Json(response))
}

/// POST /api/tasks/vectorize - Index an existing markdown file
pub async fn submit_vectorize(
    State(state): State<AppState>,
    Json(request): Json<VectorizeTaskRequest>,
) -> Result<Json<TaskSubmittedResponse>> {
    let handle = state
        .orchestrator()
        .submit_vectorize(request.markdown_path, request.file_id)
        .await?;
    Ok(Json(TaskSubmittedResponse::queued(&handle, "Vectorization")))
}

/// GET /api/tasks/:id - Current task state
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> Result<Json<TaskState>> {
    Ok(Json(state.orchestrator().task_state(&task_id)?))
}
