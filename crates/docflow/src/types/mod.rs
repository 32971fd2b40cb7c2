//! Core types for the document pipeline

pub mod file_record;
pub mod stage_result;

pub use file_record::{
    FilePaths, FileRecord, FileRecordSummary, OverallStatus, ProcessingError, RecordMetadata,
    StageName, StageState, StageStatus, Stages,
};
pub use stage_result::{ConvertOutput, IndexOutput, Metadata, StageResult};
