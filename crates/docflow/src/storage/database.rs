//! SQLite record store for per-file stage tracking
//!
//! One row per file in `file_records`, one row per (file, stage) in
//! `file_stages`. Every mutation runs as a single transaction while holding the
//! store's connection lock, so readers never see a half-applied stage update.

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{
    FilePaths, FileRecord, OverallStatus, ProcessingError, RecordMetadata, StageName, StageResult,
    StageState, StageStatus, Stages,
};

/// Durable store of file records and their stage rows
pub struct RecordStore {
    conn: Arc<Mutex<Connection>>,
    upload_dir: PathBuf,
}

/// Aggregate counts over all records
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoreStatistics {
    pub total_files: usize,
    pub total_size: u64,
    pub status_breakdown: BTreeMap<String, usize>,
}

impl RecordStore {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P, upload_dir: impl Into<PathBuf>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::Internal(format!("Failed to open database: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            upload_dir: upload_dir.into(),
        };

        store.migrate()?;
        Ok(store)
    }

    /// Create an in-memory store (tests and embedding)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Internal(format!("Failed to open in-memory database: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            upload_dir: PathBuf::from("uploads"),
        };

        store.migrate()?;
        Ok(store)
    }

    /// Create tables if missing
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
        "#,
        )
        .map_err(|e| Error::Internal(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS file_records (
                file_id TEXT PRIMARY KEY,
                original_filename TEXT NOT NULL,
                temp_filename TEXT NOT NULL,
                file_size INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'uploaded',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                upload_path TEXT,
                output_path TEXT,
                markdown_path TEXT,
                document_count INTEGER NOT NULL DEFAULT 0,
                vector_type TEXT,
                processing_errors TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS file_stages (
                file_id TEXT NOT NULL,
                stage_name TEXT NOT NULL,
                position INTEGER NOT NULL,
                status TEXT NOT NULL,
                timestamp TEXT,
                result TEXT,
                error TEXT,
                PRIMARY KEY (file_id, stage_name),
                FOREIGN KEY (file_id) REFERENCES file_records(file_id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_file_records_status ON file_records(status);
            CREATE INDEX IF NOT EXISTS idx_file_records_created_at ON file_records(created_at);
        "#,
        )
        .map_err(|e| Error::Internal(format!("Failed to run migrations: {}", e)))?;

        tracing::info!("Record store migrations complete");
        Ok(())
    }

    /// Directory uploads are stored under
    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    // ==================== Record Operations ====================

    /// Create a record whose upload lives at `{upload_dir}/{file_id}{ext}`
    pub fn create_record(&self, original_filename: &str, file_size: u64) -> Result<FileRecord> {
        self.insert_new(original_filename, file_size, None)
    }

    /// Create a record for an upload stored at an explicit path
    pub fn create_record_at(
        &self,
        original_filename: &str,
        file_size: u64,
        upload_path: impl Into<PathBuf>,
    ) -> Result<FileRecord> {
        self.insert_new(original_filename, file_size, Some(upload_path.into()))
    }

    fn insert_new(
        &self,
        original_filename: &str,
        file_size: u64,
        upload_path: Option<PathBuf>,
    ) -> Result<FileRecord> {
        let file_id = Uuid::new_v4().to_string();
        let temp_filename = FileRecord::temp_filename_for(&file_id, original_filename);
        let upload_path = upload_path.unwrap_or_else(|| self.upload_dir.join(&temp_filename));
        let now = now_micros();
        let stages = Stages::initial(now);

        let record = FileRecord {
            status: stages.overall_status(),
            file_id,
            original_filename: original_filename.to_string(),
            temp_filename,
            file_size,
            created_at: now,
            updated_at: now,
            stages,
            paths: FilePaths {
                upload_path: Some(upload_path),
                output_path: None,
                markdown_path: None,
            },
            metadata: RecordMetadata::default(),
        };

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO file_records (
                file_id, original_filename, temp_filename, file_size, status,
                created_at, updated_at, upload_path, processing_errors
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, '[]')
            "#,
            params![
                record.file_id,
                record.original_filename,
                record.temp_filename,
                record.file_size as i64,
                record.status.as_str(),
                format_ts(&record.created_at),
                format_ts(&record.updated_at),
                path_to_string(&record.paths.upload_path),
            ],
        )?;

        for (name, state) in record.stages.iter() {
            tx.execute(
                r#"
                INSERT INTO file_stages (file_id, stage_name, position, status, timestamp, result, error)
                VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL)
                "#,
                params![
                    record.file_id,
                    name.as_str(),
                    name.index() as i64,
                    state.status.as_str(),
                    state.timestamp.as_ref().map(format_ts),
                ],
            )?;
        }

        tx.commit()?;
        tracing::info!("Created file record: {} - {}", record.file_id, record.original_filename);

        Ok(record)
    }

    /// Apply a stage transition and recompute the overall status
    pub fn update_stage(
        &self,
        file_id: &str,
        stage: &str,
        status: StageStatus,
        result: Option<StageResult>,
        error: Option<String>,
    ) -> Result<FileRecord> {
        let stage: StageName = stage.parse()?;
        if let Some(result) = &result {
            if result.stage() != stage {
                return Err(Error::StageResultMismatch {
                    stage: stage.to_string(),
                    result: result.stage().to_string(),
                });
            }
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut record =
            load_record(&tx, file_id)?.ok_or_else(|| Error::NotFound(file_id.to_string()))?;

        let current = record.stages.get(stage).status;
        if !current.can_transition_to(status) {
            return Err(Error::InvalidTransition {
                stage: stage.to_string(),
                from: current.to_string(),
                to: status.to_string(),
            });
        }

        let now = now_micros();
        {
            let state = record.stages.get_mut(stage);
            state.status = status;
            state.timestamp = Some(now);
            state.result = result.clone();
            state.error = error.clone();
        }

        if let Some(message) = error {
            record.metadata.processing_errors.push(ProcessingError {
                stage,
                error: message,
                timestamp: now,
            });
        }

        if status == StageStatus::Completed {
            match &result {
                Some(StageResult::Convert(output)) => {
                    record.paths.markdown_path = Some(output.output_file.clone());
                    record.paths.output_path = Some(output.output_file.clone());
                }
                Some(StageResult::Vectorize(output)) => {
                    record.metadata.document_count = output.document_count;
                    record.metadata.vector_type = Some(output.vector_type.clone());
                }
                None => {}
            }
        }

        record.status = record.stages.overall_status();
        record.updated_at = now;

        persist_record(&tx, &record)?;
        tx.commit()?;

        tracing::info!(
            "Updated file status: {} - {}: {} (overall: {})",
            file_id,
            stage,
            status,
            record.status
        );

        Ok(record)
    }

    /// Put `stage` and every later stage back to pending for resubmission
    pub fn reset_stage(&self, file_id: &str, stage: &str) -> Result<FileRecord> {
        let stage: StageName = stage.parse()?;
        if stage == StageName::Upload {
            return Err(Error::bad_request("the upload stage cannot be reset"));
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut record =
            load_record(&tx, file_id)?.ok_or_else(|| Error::NotFound(file_id.to_string()))?;

        let affected: Vec<StageName> = StageName::ALL
            .into_iter()
            .filter(|s| s.index() >= stage.index())
            .collect();

        for name in &affected {
            let current = record.stages.get(*name).status;
            if current == StageStatus::Processing {
                return Err(Error::InvalidTransition {
                    stage: name.to_string(),
                    from: current.to_string(),
                    to: StageStatus::Pending.to_string(),
                });
            }
        }

        let now = now_micros();
        for name in &affected {
            let state = record.stages.get_mut(*name);
            *state = StageState::pending();
            state.timestamp = Some(now);

            match name {
                StageName::Convert => {
                    record.paths.output_path = None;
                    record.paths.markdown_path = None;
                }
                StageName::Vectorize => {
                    record.metadata.document_count = 0;
                    record.metadata.vector_type = None;
                }
                StageName::Upload => {}
            }
        }

        record.status = record.stages.overall_status();
        record.updated_at = now;

        persist_record(&tx, &record)?;
        tx.commit()?;

        tracing::info!("Reset file {} from stage {}", file_id, stage);
        Ok(record)
    }

    /// Get a record snapshot
    pub fn get_record(&self, file_id: &str) -> Result<FileRecord> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let record = load_record(&tx, file_id)?;
        tx.commit()?;
        record.ok_or_else(|| Error::NotFound(file_id.to_string()))
    }

    /// List records newest first, optionally filtered by overall status
    pub fn list_records(&self, status: Option<OverallStatus>) -> Result<Vec<FileRecord>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let ids: Vec<String> = {
            let mut stmt = tx.prepare(
                r#"
                SELECT file_id FROM file_records
                WHERE (?1 IS NULL OR status = ?1)
                ORDER BY created_at DESC, rowid DESC
                "#,
            )?;
            let rows = stmt.query_map(params![status.map(|s| s.as_str())], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()?
        };

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match load_record(&tx, &id)? {
                Some(record) => records.push(record),
                None => tracing::warn!("File record {} vanished during listing", id),
            }
        }

        tx.commit()?;
        Ok(records)
    }

    /// Atomically delete a record and its stage rows, returning the last snapshot
    pub fn delete_record(&self, file_id: &str) -> Result<FileRecord> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let record =
            load_record(&tx, file_id)?.ok_or_else(|| Error::NotFound(file_id.to_string()))?;

        let count = tx.execute("DELETE FROM file_records WHERE file_id = ?1", params![file_id])?;
        if count == 0 {
            return Err(Error::NotFound(file_id.to_string()));
        }

        tx.commit()?;
        tracing::info!("Deleted file record: {}", file_id);

        Ok(record)
    }

    /// Number of stage rows stored for a file
    pub fn stage_row_count(&self, file_id: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM file_stages WHERE file_id = ?1",
            params![file_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Counts by status plus total size
    pub fn statistics(&self) -> Result<StoreStatistics> {
        let conn = self.conn.lock();

        let (total, total_size): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(file_size), 0) FROM file_records",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM file_records GROUP BY status")?;
        let status_breakdown = stmt
            .query_map([], |row| {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((status, count as usize))
            })?
            .collect::<rusqlite::Result<BTreeMap<String, usize>>>()?;

        Ok(StoreStatistics {
            total_files: total as usize,
            total_size: total_size as u64,
            status_breakdown,
        })
    }
}

// ==================== Row Helpers ====================

fn load_record(tx: &Transaction<'_>, file_id: &str) -> Result<Option<FileRecord>> {
    let base = tx
        .query_row(
            r#"
            SELECT file_id, original_filename, temp_filename, file_size, status,
                   created_at, updated_at, upload_path, output_path, markdown_path,
                   document_count, vector_type, processing_errors
            FROM file_records WHERE file_id = ?1
            "#,
            params![file_id],
            row_to_record_base,
        )
        .optional()?;

    let Some(mut base) = base else {
        return Ok(None);
    };

    let mut stmt = tx.prepare(
        r#"
        SELECT stage_name, status, timestamp, result, error
        FROM file_stages WHERE file_id = ?1
        ORDER BY position
        "#,
    )?;

    let rows = stmt.query_map(params![file_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, Option<String>>(4)?,
        ))
    })?;

    for row in rows {
        let (stage_name, status, timestamp, result, error) = row?;
        let stage: StageName = stage_name.parse()?;
        let status: StageStatus = status
            .parse()
            .map_err(|_| Error::Internal(format!("Corrupt stage status '{}' for {}", status, file_id)))?;
        let result = match result {
            Some(json) => Some(serde_json::from_str::<StageResult>(&json)?),
            None => None,
        };

        *base.stages.get_mut(stage) = StageState {
            status,
            timestamp: timestamp.as_deref().map(parse_ts).transpose()?,
            result,
            error,
        };
    }

    Ok(Some(base))
}

fn persist_record(tx: &Transaction<'_>, record: &FileRecord) -> Result<()> {
    let errors_json = serde_json::to_string(&record.metadata.processing_errors)?;

    tx.execute(
        r#"
        UPDATE file_records SET
            status = ?2,
            updated_at = ?3,
            output_path = ?4,
            markdown_path = ?5,
            document_count = ?6,
            vector_type = ?7,
            processing_errors = ?8
        WHERE file_id = ?1
        "#,
        params![
            record.file_id,
            record.status.as_str(),
            format_ts(&record.updated_at),
            path_to_string(&record.paths.output_path),
            path_to_string(&record.paths.markdown_path),
            record.metadata.document_count as i64,
            record.metadata.vector_type,
            errors_json,
        ],
    )?;

    for (name, state) in record.stages.iter() {
        let result_json = match &state.result {
            Some(result) => Some(serde_json::to_string(result)?),
            None => None,
        };

        tx.execute(
            r#"
            UPDATE file_stages SET status = ?3, timestamp = ?4, result = ?5, error = ?6
            WHERE file_id = ?1 AND stage_name = ?2
            "#,
            params![
                record.file_id,
                name.as_str(),
                state.status.as_str(),
                state.timestamp.as_ref().map(format_ts),
                result_json,
                state.error,
            ],
        )?;
    }

    Ok(())
}

fn row_to_record_base(row: &rusqlite::Row) -> rusqlite::Result<FileRecord> {
    let file_id: String = row.get(0)?;
    let original_filename: String = row.get(1)?;
    let temp_filename: String = row.get(2)?;
    let file_size: i64 = row.get(3)?;
    let status_str: String = row.get(4)?;
    let created_at_str: String = row.get(5)?;
    let updated_at_str: String = row.get(6)?;
    let upload_path: Option<String> = row.get(7)?;
    let output_path: Option<String> = row.get(8)?;
    let markdown_path: Option<String> = row.get(9)?;
    let document_count: i64 = row.get(10)?;
    let vector_type: Option<String> = row.get(11)?;
    let errors_json: String = row.get(12)?;

    let created_at = parse_ts(&created_at_str).map_err(|e| corrupt_column(5, e))?;
    let updated_at = parse_ts(&updated_at_str).map_err(|e| corrupt_column(6, e))?;
    let status: OverallStatus = status_str.parse().map_err(|e| corrupt_column(4, e))?;
    let processing_errors =
        serde_json::from_str(&errors_json).map_err(|e| corrupt_column(12, e))?;

    Ok(FileRecord {
        file_id,
        original_filename,
        temp_filename,
        file_size: file_size as u64,
        status,
        created_at,
        updated_at,
        // Overwritten from file_stages by the caller
        stages: Stages::initial(created_at),
        paths: FilePaths {
            upload_path: upload_path.map(PathBuf::from),
            output_path: output_path.map(PathBuf::from),
            markdown_path: markdown_path.map(PathBuf::from),
        },
        metadata: RecordMetadata {
            document_count: document_count as usize,
            vector_type,
            processing_errors,
        },
    })
}

/// Current time at the precision stored on disk
fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    now.with_nanosecond(now.nanosecond() / 1_000 * 1_000).unwrap_or(now)
}

/// Fixed-width RFC 3339 so text ordering matches time ordering
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Corrupt timestamp '{}': {}", s, e)))
}

/// Surface an unreadable record column as a row conversion failure
fn corrupt_column<E>(index: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    tracing::warn!("Corrupt file_records column {}: {}", index, err);
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

fn path_to_string(path: &Option<PathBuf>) -> Option<String> {
    path.as_ref().map(|p| p.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConvertOutput, IndexOutput, Metadata};
    use std::thread;

    fn convert_result(output: &str) -> StageResult {
        StageResult::Convert(ConvertOutput::for_output(output))
    }

    fn index_result(count: usize) -> StageResult {
        StageResult::Vectorize(IndexOutput {
            file_path: PathBuf::from("report.md"),
            file_id: None,
            document_count: count,
            vector_type: "memory".to_string(),
            metadata: Metadata::new(),
        })
    }

    #[test]
    fn test_create_record_initial_stages() {
        let store = RecordStore::in_memory().unwrap();
        let record = store.create_record("report.xlsx", 1024).unwrap();

        assert_eq!(record.status, OverallStatus::Uploaded);
        assert_eq!(record.stages.upload.status, StageStatus::Completed);
        assert!(record.stages.upload.timestamp.is_some());
        assert_eq!(record.stages.convert.status, StageStatus::Pending);
        assert_eq!(record.stages.vectorize.status, StageStatus::Pending);
        assert_eq!(record.temp_filename, format!("{}.xlsx", record.file_id));
        assert_eq!(
            record.paths.upload_path,
            Some(PathBuf::from("uploads").join(&record.temp_filename))
        );
        assert_eq!(store.stage_row_count(&record.file_id).unwrap(), 3);

        let fetched = store.get_record(&record.file_id).unwrap();
        assert_eq!(fetched, record);
    }

    #[test]
    fn test_convert_completed_sets_markdown_path() {
        let store = RecordStore::in_memory().unwrap();
        let record = store.create_record("report.xlsx", 1024).unwrap();
        let id = record.file_id.as_str();

        store.update_stage(id, "convert", StageStatus::Processing, None, None).unwrap();
        let updated = store
            .update_stage(id, "convert", StageStatus::Completed, Some(convert_result("report.md")), None)
            .unwrap();

        assert_eq!(updated.status, OverallStatus::Processing);
        assert_eq!(updated.stages.vectorize.status, StageStatus::Pending);
        assert_eq!(updated.paths.markdown_path, Some(PathBuf::from("report.md")));
        assert_eq!(updated.paths.output_path, Some(PathBuf::from("report.md")));
        assert!(updated.updated_at >= record.updated_at);

        let fetched = store.get_record(id).unwrap();
        assert_eq!(fetched.stages.convert.result, Some(convert_result("report.md")));
    }

    #[test]
    fn test_full_lifecycle_completes() {
        let store = RecordStore::in_memory().unwrap();
        let id = store.create_record("a.docx", 10).unwrap().file_id;

        store.update_stage(&id, "convert", StageStatus::Processing, None, None).unwrap();
        store
            .update_stage(&id, "convert", StageStatus::Completed, Some(convert_result("a.md")), None)
            .unwrap();
        store.update_stage(&id, "vectorize", StageStatus::Processing, None, None).unwrap();
        let done = store
            .update_stage(&id, "vectorize", StageStatus::Completed, Some(index_result(4)), None)
            .unwrap();

        assert_eq!(done.status, OverallStatus::Completed);
        assert_eq!(done.metadata.document_count, 4);
        assert_eq!(done.metadata.vector_type.as_deref(), Some("memory"));
    }

    #[test]
    fn test_unknown_id_is_not_found_and_store_unchanged() {
        let store = RecordStore::in_memory().unwrap();
        let existing = store.create_record("a.pdf", 1).unwrap();
        let before = store.statistics().unwrap();

        let err = store
            .update_stage("missing", "convert", StageStatus::Processing, None, None)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(id) if id == "missing"));

        assert_eq!(store.statistics().unwrap(), before);
        assert_eq!(store.get_record(&existing.file_id).unwrap(), existing);
    }

    #[test]
    fn test_invalid_stage() {
        let store = RecordStore::in_memory().unwrap();
        let id = store.create_record("a.pdf", 1).unwrap().file_id;

        let err = store
            .update_stage(&id, "embed", StageStatus::Processing, None, None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStage(s) if s == "embed"));
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let store = RecordStore::in_memory().unwrap();
        let record = store.create_record("a.pdf", 1).unwrap();
        let id = record.file_id.as_str();

        let err = store
            .update_stage(id, "convert", StageStatus::Completed, None, None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(store.get_record(id).unwrap(), record);

        store.update_stage(id, "convert", StageStatus::Processing, None, None).unwrap();
        store
            .update_stage(id, "convert", StageStatus::Error, None, Some("boom".to_string()))
            .unwrap();
        let err = store
            .update_stage(id, "convert", StageStatus::Completed, None, None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn test_result_must_match_stage() {
        let store = RecordStore::in_memory().unwrap();
        let id = store.create_record("a.pdf", 1).unwrap().file_id;
        store.update_stage(&id, "convert", StageStatus::Processing, None, None).unwrap();

        let err = store
            .update_stage(&id, "convert", StageStatus::Completed, Some(index_result(1)), None)
            .unwrap_err();
        assert!(matches!(err, Error::StageResultMismatch { .. }));
    }

    #[test]
    fn test_error_is_logged() {
        let store = RecordStore::in_memory().unwrap();
        let id = store.create_record("a.pdf", 1).unwrap().file_id;

        store.update_stage(&id, "convert", StageStatus::Processing, None, None).unwrap();
        let failed = store
            .update_stage(&id, "convert", StageStatus::Error, None, Some("bad sheet".to_string()))
            .unwrap();

        assert_eq!(failed.status, OverallStatus::Error);
        assert_eq!(failed.stages.convert.error.as_deref(), Some("bad sheet"));
        assert_eq!(failed.metadata.processing_errors.len(), 1);
        assert_eq!(failed.metadata.processing_errors[0].stage, StageName::Convert);
        assert_eq!(failed.metadata.processing_errors[0].error, "bad sheet");
    }

    #[test]
    fn test_delete_cascades_stage_rows() {
        let store = RecordStore::in_memory().unwrap();
        let id = store.create_record("a.pdf", 1).unwrap().file_id;
        assert_eq!(store.stage_row_count(&id).unwrap(), 3);

        let deleted = store.delete_record(&id).unwrap();
        assert_eq!(deleted.file_id, id);
        assert_eq!(store.stage_row_count(&id).unwrap(), 0);
        assert!(matches!(store.get_record(&id), Err(Error::NotFound(_))));
        assert!(matches!(store.delete_record(&id), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_list_order_and_filter() {
        let store = RecordStore::in_memory().unwrap();
        let first = store.create_record("first.pdf", 1).unwrap().file_id;
        let second = store.create_record("second.pdf", 2).unwrap().file_id;
        let third = store.create_record("third.pdf", 3).unwrap().file_id;

        store.update_stage(&second, "convert", StageStatus::Processing, None, None).unwrap();

        let all: Vec<String> = store.list_records(None).unwrap().into_iter().map(|r| r.file_id).collect();
        assert_eq!(all, vec![third.clone(), second.clone(), first.clone()]);

        let processing = store.list_records(Some(OverallStatus::Processing)).unwrap();
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].file_id, second);

        let uploaded = store.list_records(Some(OverallStatus::Uploaded)).unwrap();
        assert_eq!(uploaded.len(), 2);
    }

    #[test]
    fn test_reset_stage_allows_resubmission() {
        let store = RecordStore::in_memory().unwrap();
        let id = store.create_record("a.pdf", 1).unwrap().file_id;

        store.update_stage(&id, "convert", StageStatus::Processing, None, None).unwrap();
        store
            .update_stage(&id, "convert", StageStatus::Error, None, Some("boom".to_string()))
            .unwrap();

        let reset = store.reset_stage(&id, "convert").unwrap();
        assert_eq!(reset.status, OverallStatus::Uploaded);
        assert_eq!(reset.stages.convert.status, StageStatus::Pending);
        assert_eq!(reset.stages.convert.error, None);
        assert_eq!(reset.metadata.processing_errors.len(), 1);

        store.update_stage(&id, "convert", StageStatus::Processing, None, None).unwrap();
        assert!(matches!(store.reset_stage(&id, "convert"), Err(Error::InvalidTransition { .. })));
        assert!(matches!(store.reset_stage(&id, "upload"), Err(Error::BadRequest(_))));
    }

    #[test]
    fn test_statistics() {
        let store = RecordStore::in_memory().unwrap();
        store.create_record("a.pdf", 100).unwrap();
        let b = store.create_record("b.pdf", 50).unwrap().file_id;
        store.update_stage(&b, "convert", StageStatus::Processing, None, None).unwrap();

        let stats = store.statistics().unwrap();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_size, 150);
        assert_eq!(stats.status_breakdown.get("uploaded"), Some(&1));
        assert_eq!(stats.status_breakdown.get("processing"), Some(&1));
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("records.db");

        let id = {
            let store = RecordStore::new(&db_path, dir.path().join("uploads")).unwrap();
            let id = store.create_record("kept.xlsx", 7).unwrap().file_id;
            store.update_stage(&id, "convert", StageStatus::Processing, None, None).unwrap();
            id
        };

        let reopened = RecordStore::new(&db_path, dir.path().join("uploads")).unwrap();
        let record = reopened.get_record(&id).unwrap();
        assert_eq!(record.original_filename, "kept.xlsx");
        assert_eq!(record.stages.convert.status, StageStatus::Processing);
        assert_eq!(record.status, OverallStatus::Processing);
    }

    #[test]
    fn test_concurrent_updates_stay_consistent() {
        let store = Arc::new(RecordStore::in_memory().unwrap());
        let ids: Vec<String> = (0..8)
            .map(|i| store.create_record(&format!("f{}.pdf", i), i).unwrap().file_id)
            .collect();

        let handles: Vec<_> = ids
            .iter()
            .cloned()
            .map(|id| {
                let store = store.clone();
                thread::spawn(move || {
                    store.update_stage(&id, "convert", StageStatus::Processing, None, None).unwrap();
                    store
                        .update_stage(&id, "convert", StageStatus::Completed, Some(convert_result("x.md")), None)
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for id in &ids {
            let record = store.get_record(id).unwrap();
            assert_eq!(record.stages.convert.status, StageStatus::Completed);
            assert_eq!(record.status, OverallStatus::Processing);
        }
    }

    #[test]
    fn test_racing_writers_only_one_wins_transition() {
        let store = Arc::new(RecordStore::in_memory().unwrap());
        let id = store.create_record("race.pdf", 1).unwrap().file_id;
        store.update_stage(&id, "convert", StageStatus::Processing, None, None).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                let id = id.clone();
                thread::spawn(move || {
                    if i % 2 == 0 {
                        store
                            .update_stage(&id, "convert", StageStatus::Completed, Some(convert_result("r.md")), None)
                            .is_ok()
                    } else {
                        store
                            .update_stage(&id, "convert", StageStatus::Error, None, Some("lost".to_string()))
                            .is_ok()
                    }
                })
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn test_corrupt_record_columns_are_errors() {
        let store = RecordStore::in_memory().unwrap();
        let bad_status = store.create_record("a.txt", 1).unwrap();
        let bad_errors = store.create_record("b.txt", 1).unwrap();
        let bad_time = store.create_record("c.txt", 1).unwrap();

        {
            let conn = store.conn.lock();
            conn.execute(
                "UPDATE file_records SET status = 'exploded' WHERE file_id = ?1",
                params![bad_status.file_id],
            )
            .unwrap();
            conn.execute(
                "UPDATE file_records SET processing_errors = '{not json' WHERE file_id = ?1",
                params![bad_errors.file_id],
            )
            .unwrap();
            conn.execute(
                "UPDATE file_records SET updated_at = 'yesterday' WHERE file_id = ?1",
                params![bad_time.file_id],
            )
            .unwrap();
        }

        for id in [&bad_status.file_id, &bad_errors.file_id, &bad_time.file_id] {
            assert!(matches!(store.get_record(id), Err(Error::Database(_))));
        }
    }

    #[test]
    fn test_corrupt_stage_timestamp_is_error() {
        let store = RecordStore::in_memory().unwrap();
        let record = store.create_record("a.txt", 1).unwrap();

        store
            .conn
            .lock()
            .execute(
                "UPDATE file_stages SET timestamp = 'soon' WHERE file_id = ?1 AND stage_name = 'upload'",
                params![record.file_id],
            )
            .unwrap();

        assert!(matches!(
            store.get_record(&record.file_id),
            Err(Error::Internal(_))
        ));
    }
}
