//! Typed results produced by the conversion and indexing stages

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::file_record::StageName;

/// Open metadata the orchestrator passes through without inspecting
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Output of converting one file to markdown
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConvertOutput {
    pub input_file: PathBuf,
    pub output_file: PathBuf,
    pub output_dir: PathBuf,
    /// Size of the written markdown in bytes
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl ConvertOutput {
    /// Minimal output pointing at an already written markdown file
    pub fn for_output(output_file: impl Into<PathBuf>) -> Self {
        let output_file = output_file.into();
        let output_dir = output_file
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default();
        Self {
            input_file: PathBuf::new(),
            output_file,
            output_dir,
            file_size: 0,
            file_id: None,
            metadata: Metadata::new(),
        }
    }
}

/// Output of indexing one markdown file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexOutput {
    pub file_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    pub document_count: usize,
    pub vector_type: String,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

/// Result payload stored on a stage row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageResult {
    Convert(ConvertOutput),
    Vectorize(IndexOutput),
}

impl StageResult {
    /// The stage this result belongs to
    pub fn stage(&self) -> StageName {
        match self {
            StageResult::Convert(_) => StageName::Convert,
            StageResult::Vectorize(_) => StageName::Vectorize,
        }
    }
}

impl From<ConvertOutput> for StageResult {
    fn from(output: ConvertOutput) -> Self {
        StageResult::Convert(output)
    }
}

impl From<IndexOutput> for StageResult {
    fn from(output: IndexOutput) -> Self {
        StageResult::Vectorize(output)
    }
}
