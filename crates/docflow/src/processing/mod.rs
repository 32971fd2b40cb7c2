//! Background processing: lanes, workers and the task orchestrator

mod handlers;
mod orchestrator;
mod task;
mod task_queue;
mod worker;

pub use handlers::StageHandlers;
pub use orchestrator::{OrchestratorOptions, TaskOrchestrator};
pub use task::{
    BatchItem, BatchResult, ChainMode, ChainResult, ItemStatus, Lane, TaskId, TaskOutput,
    TaskProgress, TaskRequest, TaskState, TaskStatus,
};
pub use task_queue::{LaneReceivers, QueuedTask, TaskHandle, TaskQueue};
pub use worker::{LaneWorker, TaskContext, TimeBudgets};
