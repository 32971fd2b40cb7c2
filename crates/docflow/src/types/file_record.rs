//! File record types for tracking a file through the processing stages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::Error;

use super::stage_result::StageResult;

/// One named step of a file's lifecycle, in pipeline order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Upload,
    Convert,
    Vectorize,
}

impl StageName {
    /// All stages in pipeline order
    pub const ALL: [StageName; 3] = [StageName::Upload, StageName::Convert, StageName::Vectorize];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Upload => "upload",
            StageName::Convert => "convert",
            StageName::Vectorize => "vectorize",
        }
    }

    /// Position in the pipeline
    pub fn index(&self) -> usize {
        match self {
            StageName::Upload => 0,
            StageName::Convert => 1,
            StageName::Vectorize => 2,
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(StageName::Upload),
            "convert" => Ok(StageName::Convert),
            "vectorize" => Ok(StageName::Vectorize),
            other => Err(Error::InvalidStage(other.to_string())),
        }
    }
}

/// Status of a single stage
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl StageStatus {
    pub const ALL: [StageStatus; 4] = [
        StageStatus::Pending,
        StageStatus::Processing,
        StageStatus::Completed,
        StageStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Processing => "processing",
            StageStatus::Completed => "completed",
            StageStatus::Error => "error",
        }
    }

    /// Whether the state machine allows `self -> next`.
    ///
    /// processing -> processing is accepted so a handler may re-mark a stage it
    /// already owns.
    pub fn can_transition_to(&self, next: StageStatus) -> bool {
        matches!(
            (self, next),
            (StageStatus::Pending, StageStatus::Processing)
                | (StageStatus::Processing, StageStatus::Processing)
                | (StageStatus::Processing, StageStatus::Completed)
                | (StageStatus::Processing, StageStatus::Error)
        )
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StageStatus::Pending),
            "processing" => Ok(StageStatus::Processing),
            "completed" => Ok(StageStatus::Completed),
            "error" => Ok(StageStatus::Error),
            other => Err(Error::bad_request(format!("unknown stage status '{}'", other))),
        }
    }
}

/// Overall status of a file, derived from its stages
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Uploaded,
    Processing,
    Completed,
    Error,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Uploaded => "uploaded",
            OverallStatus::Processing => "processing",
            OverallStatus::Completed => "completed",
            OverallStatus::Error => "error",
        }
    }

    /// Derive the overall status from the three stage statuses.
    ///
    /// Upload is created completed, so only convert and vectorize count as
    /// progress.
    pub fn derive(upload: StageStatus, convert: StageStatus, vectorize: StageStatus) -> Self {
        let all = [upload, convert, vectorize];
        if all.iter().all(|s| *s == StageStatus::Completed) {
            OverallStatus::Completed
        } else if all.iter().any(|s| *s == StageStatus::Error) {
            OverallStatus::Error
        } else if [convert, vectorize]
            .iter()
            .any(|s| matches!(s, StageStatus::Processing | StageStatus::Completed))
        {
            OverallStatus::Processing
        } else {
            OverallStatus::Uploaded
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverallStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(OverallStatus::Uploaded),
            "processing" => Ok(OverallStatus::Processing),
            "completed" => Ok(OverallStatus::Completed),
            "error" => Ok(OverallStatus::Error),
            other => Err(Error::bad_request(format!("unknown file status '{}'", other))),
        }
    }
}

/// State of one stage of a file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageState {
    pub status: StageStatus,
    /// Time of the last transition (absent while untouched)
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<StageResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageState {
    pub fn pending() -> Self {
        Self {
            status: StageStatus::Pending,
            timestamp: None,
            result: None,
            error: None,
        }
    }

    pub fn completed_at(at: DateTime<Utc>) -> Self {
        Self {
            status: StageStatus::Completed,
            timestamp: Some(at),
            result: None,
            error: None,
        }
    }
}

/// The fixed, ordered stage map of a record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stages {
    pub upload: StageState,
    pub convert: StageState,
    pub vectorize: StageState,
}

impl Stages {
    /// Stages of a freshly uploaded file
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            upload: StageState::completed_at(now),
            convert: StageState::pending(),
            vectorize: StageState::pending(),
        }
    }

    pub fn get(&self, stage: StageName) -> &StageState {
        match stage {
            StageName::Upload => &self.upload,
            StageName::Convert => &self.convert,
            StageName::Vectorize => &self.vectorize,
        }
    }

    pub fn get_mut(&mut self, stage: StageName) -> &mut StageState {
        match stage {
            StageName::Upload => &mut self.upload,
            StageName::Convert => &mut self.convert,
            StageName::Vectorize => &mut self.vectorize,
        }
    }

    pub fn overall_status(&self) -> OverallStatus {
        OverallStatus::derive(self.upload.status, self.convert.status, self.vectorize.status)
    }

    pub fn iter(&self) -> impl Iterator<Item = (StageName, &StageState)> {
        StageName::ALL.into_iter().map(move |name| (name, self.get(name)))
    }
}

/// Path references of a file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FilePaths {
    pub upload_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub markdown_path: Option<PathBuf>,
}

/// An entry of the processing error log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingError {
    pub stage: StageName,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Indexing metadata copied onto the record when vectorization completes
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecordMetadata {
    pub document_count: usize,
    pub vector_type: Option<String>,
    pub processing_errors: Vec<ProcessingError>,
}

/// Durable record of one file and its stage history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    pub file_id: String,
    pub original_filename: String,
    /// Name of the stored upload (`{file_id}{ext}`)
    pub temp_filename: String,
    pub file_size: u64,
    pub status: OverallStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stages: Stages,
    pub paths: FilePaths,
    pub metadata: RecordMetadata,
}

impl FileRecord {
    /// Build the temp filename for an upload
    pub fn temp_filename_for(file_id: &str, original_filename: &str) -> String {
        let ext = std::path::Path::new(original_filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        format!("{}{}", file_id, ext)
    }

    /// Short status view returned by status queries
    pub fn summary(&self) -> FileRecordSummary {
        FileRecordSummary {
            file_id: self.file_id.clone(),
            original_filename: self.original_filename.clone(),
            file_size: self.file_size,
            status: self.status,
            stages: self.stages.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Summary of a record for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecordSummary {
    pub file_id: String,
    pub original_filename: String,
    pub file_size: u64,
    pub status: OverallStatus,
    pub stages: Stages,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(upload: StageStatus, convert: StageStatus, vectorize: StageStatus) -> OverallStatus {
        let all = [upload, convert, vectorize];
        if all.iter().all(|s| *s == StageStatus::Completed) {
            return OverallStatus::Completed;
        }
        if all.contains(&StageStatus::Error) {
            return OverallStatus::Error;
        }
        for s in [convert, vectorize] {
            if s == StageStatus::Processing || s == StageStatus::Completed {
                return OverallStatus::Processing;
            }
        }
        OverallStatus::Uploaded
    }

    #[test]
    fn test_overall_status_all_combinations() {
        let mut seen = 0;
        for u in StageStatus::ALL {
            for c in StageStatus::ALL {
                for v in StageStatus::ALL {
                    assert_eq!(OverallStatus::derive(u, c, v), reference(u, c, v), "{u} {c} {v}");
                    seen += 1;
                }
            }
        }
        assert_eq!(seen, 64);
    }

    #[test]
    fn test_overall_status_examples() {
        use StageStatus::*;
        assert_eq!(OverallStatus::derive(Completed, Pending, Pending), OverallStatus::Uploaded);
        assert_eq!(OverallStatus::derive(Completed, Completed, Pending), OverallStatus::Processing);
        assert_eq!(OverallStatus::derive(Completed, Completed, Error), OverallStatus::Error);
        assert_eq!(OverallStatus::derive(Completed, Completed, Completed), OverallStatus::Completed);
    }

    #[test]
    fn test_transitions() {
        use StageStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Error));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Error.can_transition_to(Completed));
        assert!(!Error.can_transition_to(Pending));
    }

    #[test]
    fn test_stage_parse() {
        assert_eq!("convert".parse::<StageName>().unwrap(), StageName::Convert);
        assert!(matches!("index".parse::<StageName>(), Err(Error::InvalidStage(s)) if s == "index"));
    }

    #[test]
    fn test_temp_filename() {
        assert_eq!(FileRecord::temp_filename_for("abc", "report.xlsx"), "abc.xlsx");
        assert_eq!(FileRecord::temp_filename_for("abc", "README"), "abc");
    }
}
