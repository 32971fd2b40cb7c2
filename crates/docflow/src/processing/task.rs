//! Task requests, outputs and observable task state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::types::{ConvertOutput, IndexOutput};

/// Task identifier
pub type TaskId = Uuid;

/// Independently sized worker pool and queue
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Conversion,
    Indexing,
}

impl Lane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Conversion => "conversion",
            Lane::Indexing => "indexing",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task status as reported to callers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Progress,
    Success,
    Failure,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure)
    }
}

/// How a chain is executed
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChainMode {
    /// Both phases in one worker call on the conversion lane
    #[default]
    Inline,
    /// Conversion task whose success submits indexing on the indexing lane
    Queued,
}

/// Work to run on a lane
#[derive(Debug, Clone, PartialEq)]
pub enum TaskRequest {
    /// Convert one file to markdown
    Convert {
        file_path: PathBuf,
        file_id: Option<String>,
        output_dir: Option<PathBuf>,
    },
    /// Convert several files sequentially, isolating per-item failures
    Batch {
        file_paths: Vec<PathBuf>,
        file_ids: Option<Vec<String>>,
        output_dir: Option<PathBuf>,
    },
    /// Convert then index one file in a single worker call
    Chain {
        file_path: PathBuf,
        file_id: String,
        output_dir: Option<PathBuf>,
    },
    /// Index one markdown file
    Vectorize {
        markdown_path: PathBuf,
        file_id: Option<String>,
    },
    /// Indexing phase of a queued chain, carrying the conversion output
    ChainTail {
        file_id: String,
        conversion: ConvertOutput,
    },
}

impl TaskRequest {
    /// Lane the request runs on
    pub fn lane(&self) -> Lane {
        match self {
            TaskRequest::Convert { .. } | TaskRequest::Batch { .. } | TaskRequest::Chain { .. } => {
                Lane::Conversion
            }
            TaskRequest::Vectorize { .. } | TaskRequest::ChainTail { .. } => Lane::Indexing,
        }
    }

    /// Short name used in task state and logs
    pub fn kind(&self) -> &'static str {
        match self {
            TaskRequest::Convert { .. } => "convert",
            TaskRequest::Batch { .. } => "batch",
            TaskRequest::Chain { .. } | TaskRequest::ChainTail { .. } => "chain",
            TaskRequest::Vectorize { .. } => "vectorize",
        }
    }
}

/// Per-item outcome of a batch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchItem {
    pub file_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ConvertOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a batch conversion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchResult {
    pub total_files: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub results: Vec<BatchItem>,
    /// Record ids used, in input order
    pub file_ids: Vec<String>,
}

/// Merged result of both chain phases
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainResult {
    pub file_id: String,
    pub conversion: ConvertOutput,
    pub vectorization: IndexOutput,
}

/// Payload of a successful task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOutput {
    Convert(ConvertOutput),
    Batch(BatchResult),
    Chain(ChainResult),
    Vectorize(IndexOutput),
}

/// Advisory progress of a running task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskProgress {
    pub percent: u8,
    pub message: String,
}

/// Observable state of a task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskState {
    pub task_id: TaskId,
    pub lane: Lane,
    pub kind: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<TaskProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskState {
    pub fn pending(task_id: TaskId, lane: Lane, kind: &str) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            lane,
            kind: kind.to_string(),
            status: TaskStatus::Pending,
            progress: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lanes() {
        let convert = TaskRequest::Convert {
            file_path: PathBuf::from("a.txt"),
            file_id: None,
            output_dir: None,
        };
        assert_eq!(convert.lane(), Lane::Conversion);

        let tail = TaskRequest::ChainTail {
            file_id: "f".to_string(),
            conversion: ConvertOutput::for_output("a.md"),
        };
        assert_eq!(tail.lane(), Lane::Indexing);
        assert_eq!(tail.kind(), "chain");
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&TaskStatus::Progress).unwrap(), "\"PROGRESS\"");
        assert!(TaskStatus::Failure.is_finished());
        assert!(!TaskStatus::Pending.is_finished());
    }
}
