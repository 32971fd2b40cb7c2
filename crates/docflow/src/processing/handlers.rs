//! Stage handlers run by the lane workers
//!
//! Every failure inside a stage is written to the record as a stage error
//! before the handler returns it, so the worker only has to turn the `Err`
//! into a failed task.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::task::{BatchItem, BatchResult, ChainResult, ItemStatus, TaskOutput, TaskRequest};
use super::worker::TaskContext;
use crate::error::{Error, Result};
use crate::hub::NotificationHub;
use crate::providers::{
    DocumentConverter, DocumentIndexer, ExportFormat, IndexDocument, MarkdownSplitter,
};
use crate::storage::RecordStore;
use crate::types::{
    ConvertOutput, FileRecord, IndexOutput, Metadata, StageName, StageResult, StageStatus,
};

/// Conversion and indexing logic shared by both lanes
pub struct StageHandlers {
    store: Arc<RecordStore>,
    converter: Arc<dyn DocumentConverter>,
    indexer: Arc<dyn DocumentIndexer>,
    hub: Arc<NotificationHub>,
    output_dir: PathBuf,
    splitter: MarkdownSplitter,
}

impl StageHandlers {
    pub fn new(
        store: Arc<RecordStore>,
        converter: Arc<dyn DocumentConverter>,
        indexer: Arc<dyn DocumentIndexer>,
        hub: Arc<NotificationHub>,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            converter,
            indexer,
            hub,
            output_dir,
            splitter: MarkdownSplitter::default(),
        }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn converter(&self) -> &Arc<dyn DocumentConverter> {
        &self.converter
    }

    pub fn indexer(&self) -> &Arc<dyn DocumentIndexer> {
        &self.indexer
    }

    /// Run one request to completion
    pub async fn execute(&self, request: TaskRequest, ctx: Arc<TaskContext>) -> Result<TaskOutput> {
        match request {
            TaskRequest::Convert {
                file_path,
                file_id,
                output_dir,
            } => {
                ctx.progress(10, format!("Converting {}", file_path.display()));
                let output = self
                    .convert_file(&ctx, &file_path, file_id.as_deref(), output_dir.as_deref())
                    .await?;
                Ok(TaskOutput::Convert(output))
            }
            TaskRequest::Batch {
                file_paths,
                file_ids,
                output_dir,
            } => {
                let result = self
                    .convert_batch(&ctx, &file_paths, file_ids.as_deref(), output_dir.as_deref())
                    .await?;
                Ok(TaskOutput::Batch(result))
            }
            TaskRequest::Chain {
                file_path,
                file_id,
                output_dir,
            } => {
                let result = self
                    .chain(&ctx, &file_path, &file_id, output_dir.as_deref())
                    .await?;
                Ok(TaskOutput::Chain(result))
            }
            TaskRequest::Vectorize {
                markdown_path,
                file_id,
            } => {
                ctx.progress(10, format!("Indexing {}", markdown_path.display()));
                let output = self
                    .vectorize_file(&ctx, &markdown_path, file_id.as_deref())
                    .await?;
                Ok(TaskOutput::Vectorize(output))
            }
            TaskRequest::ChainTail {
                file_id,
                conversion,
            } => {
                ctx.progress(50, format!("Indexing {}", conversion.output_file.display()));
                let vectorization = self
                    .vectorize_file(&ctx, &conversion.output_file, Some(&file_id))
                    .await?;
                Ok(TaskOutput::Chain(ChainResult {
                    file_id,
                    conversion,
                    vectorization,
                }))
            }
        }
    }

    // ==================== Conversion ====================

    async fn convert_file(
        &self,
        ctx: &TaskContext,
        file_path: &Path,
        file_id: Option<&str>,
        output_dir: Option<&Path>,
    ) -> Result<ConvertOutput> {
        if let Some(id) = file_id {
            self.begin_stage(ctx, id, StageName::Convert)?;
        }

        match self.run_conversion(ctx, file_path, file_id, output_dir).await {
            Ok(output) => {
                if let Some(id) = file_id {
                    let written = self.write_stage(
                        id,
                        StageName::Convert,
                        StageStatus::Completed,
                        Some(StageResult::Convert(output.clone())),
                        None,
                    );
                    if let Err(e) = written {
                        self.record_failure(id, StageName::Convert, &e);
                        ctx.clear_in_flight();
                        return Err(e);
                    }
                    ctx.clear_in_flight();
                }
                tracing::info!(
                    "Converted {} -> {}",
                    file_path.display(),
                    output.output_file.display()
                );
                Ok(output)
            }
            Err(e) => {
                tracing::error!("Conversion of {} failed: {}", file_path.display(), e);
                if let Some(id) = file_id {
                    self.record_failure(id, StageName::Convert, &e);
                    ctx.clear_in_flight();
                }
                Err(e)
            }
        }
    }

    async fn run_conversion(
        &self,
        ctx: &TaskContext,
        file_path: &Path,
        file_id: Option<&str>,
        output_dir: Option<&Path>,
    ) -> Result<ConvertOutput> {
        ctx.check_deadline()?;
        let document = self.converter.convert(file_path).await?;
        ctx.check_deadline()?;

        let markdown = document.export(ExportFormat::Markdown);
        let output_dir = output_dir.unwrap_or(self.output_dir.as_path());
        tokio::fs::create_dir_all(output_dir).await?;

        let stem = file_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document");
        let output_file = output_dir.join(format!("{}.md", stem));
        tokio::fs::write(&output_file, &markdown).await?;

        let mut metadata = Metadata::new();
        metadata.insert("converter".to_string(), Value::from(self.converter.name()));
        metadata.insert("sections".to_string(), Value::from(document.sections.len()));
        if let Some(title) = &document.title {
            metadata.insert("title".to_string(), Value::from(title.as_str()));
        }

        Ok(ConvertOutput {
            input_file: file_path.to_path_buf(),
            output_file,
            output_dir: output_dir.to_path_buf(),
            file_size: markdown.len() as u64,
            file_id: file_id.map(str::to_string),
            metadata,
        })
    }

    async fn convert_batch(
        &self,
        ctx: &TaskContext,
        file_paths: &[PathBuf],
        file_ids: Option<&[String]>,
        output_dir: Option<&Path>,
    ) -> Result<BatchResult> {
        if let Some(ids) = file_ids {
            if ids.len() != file_paths.len() {
                return Err(Error::bad_request(format!(
                    "{} file ids supplied for {} files",
                    ids.len(),
                    file_paths.len()
                )));
            }
        }

        let total = file_paths.len();
        let mut results = Vec::with_capacity(total);
        let mut used_ids = Vec::with_capacity(total);

        ctx.progress(0, format!("Converting {} files", total));

        for (i, file_path) in file_paths.iter().enumerate() {
            ctx.check_deadline()?;

            let file_id = match file_ids {
                Some(ids) => Ok(ids[i].clone()),
                None => self.create_record_for(file_path).await,
            };

            let item = match file_id {
                Ok(id) => {
                    used_ids.push(id.clone());
                    match self.convert_file(ctx, file_path, Some(&id), output_dir).await {
                        Ok(output) => BatchItem {
                            file_path: file_path.clone(),
                            file_id: Some(id),
                            status: ItemStatus::Success,
                            result: Some(output),
                            error: None,
                        },
                        Err(e) => BatchItem {
                            file_path: file_path.clone(),
                            file_id: Some(id),
                            status: ItemStatus::Error,
                            result: None,
                            error: Some(e.to_string()),
                        },
                    }
                }
                Err(e) => {
                    tracing::error!("Could not create record for {}: {}", file_path.display(), e);
                    BatchItem {
                        file_path: file_path.clone(),
                        file_id: None,
                        status: ItemStatus::Error,
                        result: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(item);

            let done = i + 1;
            ctx.progress(
                (done * 100 / total) as u8,
                format!("Processed {}/{} files", done, total),
            );
        }

        let success_count = results
            .iter()
            .filter(|r| r.status == ItemStatus::Success)
            .count();

        tracing::info!(
            "Batch finished: {} succeeded, {} failed",
            success_count,
            total - success_count
        );

        Ok(BatchResult {
            total_files: total,
            success_count,
            error_count: total - success_count,
            results,
            file_ids: used_ids,
        })
    }

    async fn create_record_for(&self, file_path: &Path) -> Result<String> {
        let name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file_path.display().to_string());
        let size = tokio::fs::metadata(file_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        let record = self.store.create_record_at(&name, size, file_path)?;
        self.publish_record(&record);
        Ok(record.file_id)
    }

    // ==================== Indexing ====================

    async fn vectorize_file(
        &self,
        ctx: &TaskContext,
        markdown_path: &Path,
        file_id: Option<&str>,
    ) -> Result<IndexOutput> {
        if let Some(id) = file_id {
            self.begin_stage(ctx, id, StageName::Vectorize)?;
        }

        match self.run_indexing(ctx, markdown_path, file_id).await {
            Ok(output) => {
                if let Some(id) = file_id {
                    let written = self.write_stage(
                        id,
                        StageName::Vectorize,
                        StageStatus::Completed,
                        Some(StageResult::Vectorize(output.clone())),
                        None,
                    );
                    if let Err(e) = written {
                        self.record_failure(id, StageName::Vectorize, &e);
                        ctx.clear_in_flight();
                        return Err(e);
                    }
                    ctx.clear_in_flight();
                }
                tracing::info!(
                    "Indexed {} ({} documents)",
                    markdown_path.display(),
                    output.document_count
                );
                Ok(output)
            }
            Err(e) => {
                tracing::error!("Indexing of {} failed: {}", markdown_path.display(), e);
                if let Some(id) = file_id {
                    self.record_failure(id, StageName::Vectorize, &e);
                    ctx.clear_in_flight();
                }
                Err(e)
            }
        }
    }

    async fn run_indexing(
        &self,
        ctx: &TaskContext,
        markdown_path: &Path,
        file_id: Option<&str>,
    ) -> Result<IndexOutput> {
        ctx.check_deadline()?;
        let content = tokio::fs::read_to_string(markdown_path).await.map_err(|e| {
            Error::index(format!("failed to read {}: {}", markdown_path.display(), e))
        })?;

        let source = markdown_path.to_string_lossy().to_string();
        let documents: Vec<IndexDocument> = self
            .splitter
            .split(&content)
            .into_iter()
            .enumerate()
            .map(|(i, content)| {
                let mut metadata = Metadata::new();
                metadata.insert("source".to_string(), Value::from(source.as_str()));
                metadata.insert("chunk_index".to_string(), Value::from(i));
                if let Some(id) = file_id {
                    metadata.insert("file_id".to_string(), Value::from(id));
                }
                IndexDocument { content, metadata }
            })
            .collect();

        ctx.check_deadline()?;
        let document_count = self.indexer.add_documents(&documents).await?;

        let mut metadata = Metadata::new();
        metadata.insert("indexer".to_string(), Value::from(self.indexer.name()));
        metadata.insert("chunks".to_string(), Value::from(documents.len()));

        Ok(IndexOutput {
            file_path: markdown_path.to_path_buf(),
            file_id: file_id.map(str::to_string),
            document_count,
            vector_type: self.indexer.vector_type().to_string(),
            metadata,
        })
    }

    // ==================== Chains ====================

    async fn chain(
        &self,
        ctx: &TaskContext,
        file_path: &Path,
        file_id: &str,
        output_dir: Option<&Path>,
    ) -> Result<ChainResult> {
        ctx.progress(10, format!("Converting {}", file_path.display()));
        let conversion = self
            .convert_file(ctx, file_path, Some(file_id), output_dir)
            .await?;

        // The soft deadline is checked inside indexing once the stage is marked
        ctx.progress(50, format!("Indexing {}", conversion.output_file.display()));
        let vectorization = self
            .vectorize_file(ctx, &conversion.output_file, Some(file_id))
            .await?;

        Ok(ChainResult {
            file_id: file_id.to_string(),
            conversion,
            vectorization,
        })
    }

    // ==================== Record Writes ====================

    fn begin_stage(&self, ctx: &TaskContext, file_id: &str, stage: StageName) -> Result<()> {
        self.write_stage(file_id, stage, StageStatus::Processing, None, None)?;
        ctx.set_in_flight(file_id, stage);
        Ok(())
    }

    fn write_stage(
        &self,
        file_id: &str,
        stage: StageName,
        status: StageStatus,
        result: Option<StageResult>,
        error: Option<String>,
    ) -> Result<FileRecord> {
        let record = self
            .store
            .update_stage(file_id, stage.as_str(), status, result, error)?;
        self.publish_record(&record);
        Ok(record)
    }

    /// Best-effort stage error write; a failing write is logged, not returned
    pub(crate) fn record_failure(&self, file_id: &str, stage: StageName, err: &Error) {
        if let Err(e) = self.write_stage(
            file_id,
            stage,
            StageStatus::Error,
            None,
            Some(err.to_string()),
        ) {
            let failure =
                Error::StoreWriteFailure(format!("{} stage of {}: {}", stage, file_id, e));
            tracing::error!("{}", failure);
        }
    }

    fn publish_record(&self, record: &FileRecord) {
        match serde_json::to_value(record) {
            Ok(data) => {
                self.hub.publish_file_update(&record.file_id, data);
            }
            Err(e) => tracing::error!("Failed to serialize record {}: {}", record.file_id, e),
        }
    }
}
