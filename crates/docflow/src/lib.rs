//! docflow: Document ingestion pipeline with per-file stage tracking
//!
//! Uploaded files move through `upload -> convert -> vectorize`. Each stage is
//! recorded durably in SQLite, work runs on bounded conversion and indexing
//! lanes with soft and hard time budgets, and every state change is pushed to
//! WebSocket subscribers of the task or file.

pub mod config;
pub mod error;
pub mod hub;
pub mod processing;
pub mod providers;
pub mod server;
pub mod storage;
pub mod types;

pub use config::DocflowConfig;
pub use error::{Error, Result};
pub use hub::{NotificationHub, ServerMessage, SubscriptionKey};
pub use processing::{
    ChainMode, OrchestratorOptions, TaskHandle, TaskOrchestrator, TaskState, TaskStatus,
};
pub use storage::RecordStore;
pub use types::{FileRecord, OverallStatus, StageName, StageStatus};
