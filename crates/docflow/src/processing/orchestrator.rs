//! Task orchestrator: submission entry point for single, batch, chained and
//! indexing-only jobs

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::handlers::StageHandlers;
use super::task::{ChainMode, Lane, TaskId, TaskOutput, TaskRequest, TaskState};
use super::task_queue::{TaskHandle, TaskQueue};
use super::worker::{LaneWorker, TimeBudgets};
use crate::config::DocflowConfig;
use crate::error::{Error, Result};
use crate::hub::NotificationHub;
use crate::providers::{DocumentConverter, DocumentIndexer, SearchHit};
use crate::storage::RecordStore;
use crate::types::Metadata;

/// Sizing and budgets for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub conversion_workers: usize,
    pub indexing_workers: usize,
    pub queue_capacity: usize,
    pub soft_time_limit: Duration,
    pub hard_time_limit: Duration,
    pub result_expires: Duration,
    pub max_batch_files: usize,
    pub output_dir: PathBuf,
    pub default_top_k: usize,
    pub similarity_threshold: f32,
}

impl OrchestratorOptions {
    pub fn from_config(config: &DocflowConfig) -> Self {
        let p = &config.processing;
        Self {
            conversion_workers: p.conversion_worker_count(),
            indexing_workers: p.indexing_worker_count(),
            queue_capacity: p.queue_capacity,
            soft_time_limit: p.soft_time_limit(),
            hard_time_limit: p.hard_time_limit(),
            result_expires: p.result_expires(),
            max_batch_files: p.max_batch_files,
            output_dir: config.storage.output_dir.clone(),
            default_top_k: config.retrieval.default_top_k,
            similarity_threshold: config.retrieval.similarity_threshold,
        }
    }
}

/// Schedules jobs on the conversion and indexing lanes
pub struct TaskOrchestrator {
    queue: Arc<TaskQueue>,
    handlers: Arc<StageHandlers>,
    options: OrchestratorOptions,
    background: Vec<JoinHandle<()>>,
}

impl TaskOrchestrator {
    /// Spawn both lane workers and the expiry sweep on the current runtime
    pub fn start(
        options: OrchestratorOptions,
        store: Arc<RecordStore>,
        converter: Arc<dyn DocumentConverter>,
        indexer: Arc<dyn DocumentIndexer>,
        hub: Arc<NotificationHub>,
    ) -> Self {
        let (queue, receivers) =
            TaskQueue::new(options.queue_capacity, options.result_expires, hub.clone());
        let queue = Arc::new(queue);

        let handlers = Arc::new(StageHandlers::new(
            store,
            converter,
            indexer,
            hub,
            options.output_dir.clone(),
        ));

        let budgets = TimeBudgets {
            soft: options.soft_time_limit,
            hard: options.hard_time_limit,
        };

        let conversion = LaneWorker::new(
            Lane::Conversion,
            queue.clone(),
            handlers.clone(),
            options.conversion_workers,
            budgets,
        )
        .spawn(receivers.conversion);

        let indexing = LaneWorker::new(
            Lane::Indexing,
            queue.clone(),
            handlers.clone(),
            options.indexing_workers,
            budgets,
        )
        .spawn(receivers.indexing);

        let sweep = {
            let queue = queue.clone();
            let period = options
                .result_expires
                .min(Duration::from_secs(60))
                .max(Duration::from_millis(100));
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    interval.tick().await;
                    queue.purge_expired();
                }
            })
        };

        tracing::info!(
            "Task orchestrator started: {} conversion workers, {} indexing workers",
            options.conversion_workers,
            options.indexing_workers
        );

        Self {
            queue,
            handlers,
            options,
            background: vec![conversion, indexing, sweep],
        }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        self.handlers.store()
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Validate and enqueue any request
    pub async fn submit(&self, request: TaskRequest) -> Result<TaskHandle> {
        if let TaskRequest::Batch {
            file_paths,
            file_ids,
            ..
        } = &request
        {
            if file_paths.is_empty() {
                return Err(Error::bad_request("batch contains no files"));
            }
            if file_paths.len() > self.options.max_batch_files {
                return Err(Error::bad_request(format!(
                    "batch of {} files exceeds the limit of {}",
                    file_paths.len(),
                    self.options.max_batch_files
                )));
            }
            if let Some(ids) = file_ids {
                if ids.len() != file_paths.len() {
                    return Err(Error::bad_request(format!(
                        "{} file ids supplied for {} files",
                        ids.len(),
                        file_paths.len()
                    )));
                }
            }
        }

        let kind = request.kind();
        let handle = self.queue.enqueue(request).await?;
        tracing::info!("Submitted {} task {}", kind, handle.id());
        Ok(handle)
    }

    /// Convert one file
    pub async fn submit_single(
        &self,
        file_path: impl Into<PathBuf>,
        file_id: Option<String>,
    ) -> Result<TaskHandle> {
        self.submit(TaskRequest::Convert {
            file_path: file_path.into(),
            file_id,
            output_dir: None,
        })
        .await
    }

    /// Convert several files in one task
    pub async fn submit_batch(
        &self,
        file_paths: Vec<PathBuf>,
        file_ids: Option<Vec<String>>,
    ) -> Result<TaskHandle> {
        self.submit(TaskRequest::Batch {
            file_paths,
            file_ids,
            output_dir: None,
        })
        .await
    }

    /// Convert then index one file; the handle refers to the terminal task
    pub async fn submit_chain(
        &self,
        file_path: impl Into<PathBuf>,
        file_id: impl Into<String>,
        mode: ChainMode,
    ) -> Result<TaskHandle> {
        let file_path = file_path.into();
        let file_id = file_id.into();

        match mode {
            ChainMode::Inline => {
                self.submit(TaskRequest::Chain {
                    file_path,
                    file_id,
                    output_dir: None,
                })
                .await
            }
            ChainMode::Queued => {
                let first = TaskRequest::Convert {
                    file_path,
                    file_id: Some(file_id.clone()),
                    output_dir: None,
                };
                self.queue
                    .enqueue_then(first, Lane::Indexing, "chain", move |output| match output {
                        TaskOutput::Convert(conversion) => {
                            Ok(TaskRequest::ChainTail { file_id, conversion })
                        }
                        other => Err(Error::internal(format!(
                            "conversion produced unexpected output: {:?}",
                            other
                        ))),
                    })
                    .await
            }
        }
    }

    /// Index an existing markdown file
    pub async fn submit_vectorize(
        &self,
        markdown_path: impl Into<PathBuf>,
        file_id: Option<String>,
    ) -> Result<TaskHandle> {
        self.submit(TaskRequest::Vectorize {
            markdown_path: markdown_path.into(),
            file_id,
        })
        .await
    }

    /// State of a known task
    pub fn task_state(&self, id: &TaskId) -> Result<TaskState> {
        self.queue
            .state(id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }

    /// Handle of a known task
    pub fn task_handle(&self, id: &TaskId) -> Result<TaskHandle> {
        self.queue
            .handle(id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }

    /// Search indexed documents, falling back to configured defaults
    pub async fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
        threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        let top_k = top_k.unwrap_or(self.options.default_top_k);
        let threshold = threshold.unwrap_or(self.options.similarity_threshold);
        self.handlers.indexer().search(query, top_k, threshold).await
    }

    /// Indexer statistics
    pub async fn index_stats(&self) -> Result<Metadata> {
        self.handlers.indexer().stats().await
    }

    /// Whether the configured converter accepts this file
    pub fn supports_file(&self, path: &Path) -> bool {
        self.handlers.converter().supports(path)
    }

    pub fn converter_name(&self) -> &str {
        self.handlers.converter().name()
    }

    pub fn indexer_name(&self) -> &str {
        self.handlers.indexer().name()
    }

    pub fn vector_type(&self) -> &str {
        self.handlers.indexer().vector_type()
    }

    /// Number of tasks still tracked by the queue
    pub fn tracked_tasks(&self) -> usize {
        self.queue.len()
    }
}

impl Drop for TaskOrchestrator {
    fn drop(&mut self) {
        for task in &self.background {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{ServerMessage, SubscriptionKey};
    use crate::processing::{BatchResult, ItemStatus, TaskStatus};
    use crate::providers::{ConvertedDocument, MemoryIndexer, Section, TextFileConverter};
    use crate::types::{OverallStatus, StageStatus};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct SlowConverter {
        delay: Duration,
    }

    #[async_trait]
    impl DocumentConverter for SlowConverter {
        async fn convert(&self, path: &Path) -> Result<ConvertedDocument> {
            tokio::time::sleep(self.delay).await;
            TextFileConverter::new().convert(path).await
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    /// Returns many sections at once so export and indexing take real time
    struct WideConverter {
        sections: usize,
    }

    #[async_trait]
    impl DocumentConverter for WideConverter {
        async fn convert(&self, path: &Path) -> Result<ConvertedDocument> {
            Ok(ConvertedDocument {
                source: path.to_path_buf(),
                title: Some("Ledger".to_string()),
                sections: (0..self.sections)
                    .map(|i| Section {
                        heading: Some(format!("Entry {}", i)),
                        body: "reconciled balance\n".to_string(),
                    })
                    .collect(),
            })
        }

        fn name(&self) -> &str {
            "wide"
        }
    }

    struct Fixture {
        dir: TempDir,
        store: Arc<RecordStore>,
        hub: Arc<NotificationHub>,
        orchestrator: TaskOrchestrator,
    }

    impl Fixture {
        fn write(&self, name: &str, content: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, content).unwrap();
            path
        }
    }

    fn options(dir: &TempDir) -> OrchestratorOptions {
        OrchestratorOptions {
            conversion_workers: 2,
            indexing_workers: 1,
            queue_capacity: 16,
            soft_time_limit: Duration::from_secs(30),
            hard_time_limit: Duration::from_secs(60),
            result_expires: Duration::from_secs(3600),
            max_batch_files: 10,
            output_dir: dir.path().join("output"),
            default_top_k: 5,
            similarity_threshold: 0.0,
        }
    }

    fn fixture_with(converter: Arc<dyn DocumentConverter>, tune: impl FnOnce(&mut OrchestratorOptions)) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordStore::in_memory().unwrap());
        let hub = Arc::new(NotificationHub::new(256));
        let mut opts = options(&dir);
        tune(&mut opts);

        let orchestrator = TaskOrchestrator::start(
            opts,
            store.clone(),
            converter,
            Arc::new(MemoryIndexer::new()),
            hub.clone(),
        );

        Fixture {
            dir,
            store,
            hub,
            orchestrator,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(TextFileConverter::new()), |_| {})
    }

    #[tokio::test]
    async fn test_single_conversion_updates_record() {
        let fx = fixture();
        let path = fx.write("report.txt", "Quarterly revenue grew.");
        let record = fx.store.create_record_at("report.txt", 23, &path).unwrap();

        let handle = fx
            .orchestrator
            .submit_single(&path, Some(record.file_id.clone()))
            .await
            .unwrap();
        let state = handle.wait().await;

        assert_eq!(state.status, TaskStatus::Success);
        let Some(TaskOutput::Convert(output)) = state.result else {
            panic!("expected conversion output");
        };
        assert_eq!(output.output_file, fx.dir.path().join("output").join("report.md"));
        assert!(output.output_file.exists());

        let record = fx.store.get_record(&record.file_id).unwrap();
        assert_eq!(record.stages.convert.status, StageStatus::Completed);
        assert_eq!(record.status, OverallStatus::Processing);
        assert_eq!(record.paths.markdown_path, Some(output.output_file));
    }

    #[tokio::test]
    async fn test_conversion_failure_marks_stage_error() {
        let fx = fixture();
        let path = fx.write("sheet.xlsx", "binary");
        let record = fx.store.create_record_at("sheet.xlsx", 6, &path).unwrap();

        let state = fx
            .orchestrator
            .submit_single(&path, Some(record.file_id.clone()))
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(state.status, TaskStatus::Failure);
        assert!(state.error.unwrap().contains("unsupported"));

        let record = fx.store.get_record(&record.file_id).unwrap();
        assert_eq!(record.stages.convert.status, StageStatus::Error);
        assert_eq!(record.status, OverallStatus::Error);
        assert_eq!(record.metadata.processing_errors.len(), 1);
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let fx = fixture();
        let paths = vec![
            fx.write("a.txt", "alpha"),
            fx.write("b.xlsx", "not text"),
            fx.write("c.md", "# Gamma\n\nbody"),
        ];

        let state = fx
            .orchestrator
            .submit_batch(paths.clone(), None)
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(state.status, TaskStatus::Success);
        let Some(TaskOutput::Batch(BatchResult {
            total_files,
            success_count,
            error_count,
            results,
            file_ids,
        })) = state.result
        else {
            panic!("expected batch output");
        };

        assert_eq!(total_files, 3);
        assert_eq!(success_count, 2);
        assert_eq!(error_count, 1);
        assert_eq!(success_count + error_count, total_files);
        assert_eq!(results.len(), 3);
        assert_eq!(results[1].status, ItemStatus::Error);
        assert_eq!(results[1].file_path, paths[1]);
        assert_eq!(file_ids.len(), 3);

        let failed = fx.store.get_record(&file_ids[1]).unwrap();
        assert_eq!(failed.status, OverallStatus::Error);
        let ok = fx.store.get_record(&file_ids[0]).unwrap();
        assert_eq!(ok.stages.convert.status, StageStatus::Completed);
    }

    #[tokio::test]
    async fn test_batch_limits() {
        let fx = fixture();
        let too_many: Vec<PathBuf> = (0..11).map(|i| PathBuf::from(format!("{}.txt", i))).collect();

        assert!(matches!(
            fx.orchestrator.submit_batch(too_many, None).await,
            Err(Error::BadRequest(_))
        ));
        assert!(matches!(
            fx.orchestrator.submit_batch(Vec::new(), None).await,
            Err(Error::BadRequest(_))
        ));
        assert!(matches!(
            fx.orchestrator
                .submit_batch(vec![PathBuf::from("a.txt")], Some(vec![]))
                .await,
            Err(Error::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_inline_chain_completes_record() {
        let fx = fixture();
        let path = fx.write("notes.md", "# Notes\n\nBudget review.\n\n## Actions\n\nHire two.");
        let record = fx.store.create_record_at("notes.md", 40, &path).unwrap();

        let (conn, mut rx) = fx.hub.connect();
        fx.hub.subscribe(SubscriptionKey::File(record.file_id.clone()), conn);

        let state = fx
            .orchestrator
            .submit_chain(&path, record.file_id.clone(), ChainMode::Inline)
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(state.status, TaskStatus::Success);
        let Some(TaskOutput::Chain(chain)) = state.result else {
            panic!("expected chain output");
        };
        assert_eq!(chain.file_id, record.file_id);
        assert_eq!(chain.vectorization.document_count, 2);
        assert_eq!(chain.vectorization.vector_type, "memory");

        let record = fx.store.get_record(&record.file_id).unwrap();
        assert_eq!(record.status, OverallStatus::Completed);
        assert_eq!(record.metadata.document_count, 2);

        let mut transitions = Vec::new();
        while let Ok(ServerMessage::FileUpdate { data, .. }) = rx.try_recv() {
            transitions.push((
                data["stages"]["convert"]["status"].as_str().unwrap().to_string(),
                data["stages"]["vectorize"]["status"].as_str().unwrap().to_string(),
            ));
        }
        let expected: Vec<(String, String)> = [
            ("processing", "pending"),
            ("completed", "pending"),
            ("completed", "processing"),
            ("completed", "completed"),
        ]
        .iter()
        .map(|(c, v)| (c.to_string(), v.to_string()))
        .collect();
        assert_eq!(transitions, expected);

        let hits = fx.orchestrator.search("budget", None, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata["file_id"], record.file_id.as_str());
    }

    #[tokio::test]
    async fn test_queued_chain_runs_on_both_lanes() {
        let fx = fixture();
        let path = fx.write("memo.txt", "Ship the release.");
        let record = fx.store.create_record_at("memo.txt", 17, &path).unwrap();

        let handle = fx
            .orchestrator
            .submit_chain(&path, record.file_id.clone(), ChainMode::Queued)
            .await
            .unwrap();
        assert_eq!(handle.state().lane, Lane::Indexing);

        let state = handle.wait().await;
        assert_eq!(state.status, TaskStatus::Success);
        assert!(matches!(state.result, Some(TaskOutput::Chain(_))));

        let record = fx.store.get_record(&record.file_id).unwrap();
        assert_eq!(record.status, OverallStatus::Completed);

        let stats = fx.orchestrator.index_stats().await.unwrap();
        assert_eq!(stats["document_count"], 1);
    }

    #[tokio::test]
    async fn test_queued_chain_fails_with_conversion() {
        let fx = fixture();
        let path = fx.write("deck.pptx", "binary");
        let record = fx.store.create_record_at("deck.pptx", 6, &path).unwrap();

        let state = fx
            .orchestrator
            .submit_chain(&path, record.file_id.clone(), ChainMode::Queued)
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(state.status, TaskStatus::Failure);
        assert!(state.error.unwrap().contains("unsupported"));

        let record = fx.store.get_record(&record.file_id).unwrap();
        assert_eq!(record.stages.convert.status, StageStatus::Error);
        assert_eq!(record.stages.vectorize.status, StageStatus::Pending);
    }

    #[tokio::test]
    async fn test_hard_timeout_frees_worker_and_marks_stage() {
        let fx = fixture_with(
            Arc::new(SlowConverter {
                delay: Duration::from_secs(30),
            }),
            |opts| {
                opts.conversion_workers = 1;
                opts.soft_time_limit = Duration::from_millis(100);
                opts.hard_time_limit = Duration::from_millis(200);
            },
        );
        let path = fx.write("slow.txt", "zzz");
        let record = fx.store.create_record_at("slow.txt", 3, &path).unwrap();

        let state = fx
            .orchestrator
            .submit_single(&path, Some(record.file_id.clone()))
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(state.status, TaskStatus::Failure);
        assert!(state.error.unwrap().contains("hard limit"));

        let record = fx.store.get_record(&record.file_id).unwrap();
        assert_eq!(record.stages.convert.status, StageStatus::Error);

        // The single worker slot was released
        let second = fx.write("slow2.txt", "zzz");
        let state = fx
            .orchestrator
            .submit_single(&second, None)
            .await
            .unwrap()
            .wait()
            .await;
        assert_eq!(state.status, TaskStatus::Failure);
    }

    #[tokio::test]
    async fn test_soft_timeout_stops_batch_between_items() {
        let fx = fixture_with(
            Arc::new(SlowConverter {
                delay: Duration::from_millis(300),
            }),
            |opts| {
                opts.soft_time_limit = Duration::from_millis(100);
                opts.hard_time_limit = Duration::from_secs(30);
            },
        );
        let paths = vec![fx.write("one.txt", "1"), fx.write("two.txt", "2")];

        let state = fx
            .orchestrator
            .submit_batch(paths, None)
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(state.status, TaskStatus::Failure);
        assert!(state.error.unwrap().contains("soft limit"));

        let records = fx.store.list_records(None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].stages.convert.status, StageStatus::Error);
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let fx = fixture();
        assert!(matches!(
            fx.orchestrator.task_state(&uuid::Uuid::new_v4()),
            Err(Error::TaskNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_soft_timeout_in_chain_leaves_record_in_error() {
        let fx = fixture_with(Arc::new(WideConverter { sections: 200_000 }), |opts| {
            opts.soft_time_limit = Duration::from_millis(1);
            opts.hard_time_limit = Duration::from_secs(60);
        });
        let path = fx.write("ledger.txt", "placeholder");
        let record = fx.store.create_record_at("ledger.txt", 11, &path).unwrap();

        let state = fx
            .orchestrator
            .submit_chain(&path, record.file_id.clone(), ChainMode::Inline)
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(state.status, TaskStatus::Failure);
        assert!(state.error.unwrap().contains("soft limit"));

        let record = fx.store.get_record(&record.file_id).unwrap();
        assert_eq!(record.status, OverallStatus::Error);
        assert_eq!(record.metadata.processing_errors.len(), 1);
        assert!(record
            .stages
            .iter()
            .all(|(_, stage)| stage.status != StageStatus::Processing));
    }

    #[tokio::test]
    async fn test_record_deleted_mid_conversion_fails_task() {
        let fx = fixture_with(
            Arc::new(SlowConverter {
                delay: Duration::from_millis(300),
            }),
            |opts| opts.conversion_workers = 1,
        );
        let path = fx.write("draft.txt", "Draft minutes.");
        let record = fx.store.create_record_at("draft.txt", 14, &path).unwrap();

        let handle = fx
            .orchestrator
            .submit_single(&path, Some(record.file_id.clone()))
            .await
            .unwrap();

        let started = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let current = fx.store.get_record(&record.file_id).unwrap();
                if current.stages.convert.status == StageStatus::Processing {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(started.is_ok());
        fx.store.delete_record(&record.file_id).unwrap();

        // Both the completed write and the best-effort error write hit a missing record
        let state = handle.wait().await;
        assert_eq!(state.status, TaskStatus::Failure);
        let error = state.error.unwrap();
        assert!(error.contains("not found"));
        assert!(error.contains(&record.file_id));
        assert!(matches!(
            fx.store.get_record(&record.file_id),
            Err(Error::NotFound(_))
        ));

        // The single worker slot was released
        let next = fx.write("next.txt", "Next agenda.");
        let state = fx
            .orchestrator
            .submit_single(&next, None)
            .await
            .unwrap()
            .wait()
            .await;
        assert_eq!(state.status, TaskStatus::Success);
    }
}
