//! Lane workers that drain a queue channel under time budgets

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;

use super::handlers::StageHandlers;
use super::task::{Lane, TaskId};
use super::task_queue::{QueuedTask, TaskQueue};
use crate::error::{Error, Result, TimeBudget};
use crate::types::StageName;

/// Soft and hard limits for one task
#[derive(Debug, Clone, Copy)]
pub struct TimeBudgets {
    pub soft: Duration,
    pub hard: Duration,
}

/// Per-task context handed to stage handlers
pub struct TaskContext {
    id: TaskId,
    queue: Arc<TaskQueue>,
    started: Instant,
    soft_expired: AtomicBool,
    /// Stage a handler currently holds in `processing`
    in_flight: Mutex<Option<(String, StageName)>>,
}

impl TaskContext {
    pub fn new(id: TaskId, queue: Arc<TaskQueue>) -> Self {
        Self {
            id,
            queue,
            started: Instant::now(),
            soft_expired: AtomicBool::new(false),
            in_flight: Mutex::new(None),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.id
    }

    /// Report advisory progress
    pub fn progress(&self, percent: u8, message: impl Into<String>) {
        self.queue.set_progress(self.id, percent, message);
    }

    /// Fail with a soft timeout once the soft budget has passed
    pub fn check_deadline(&self) -> Result<()> {
        if self.soft_expired.load(Ordering::SeqCst) {
            return Err(Error::TaskTimeout {
                budget: TimeBudget::Soft,
                elapsed_secs: self.started.elapsed().as_secs(),
            });
        }
        Ok(())
    }

    fn expire_soft(&self) {
        self.soft_expired.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_in_flight(&self, file_id: &str, stage: StageName) {
        *self.in_flight.lock() = Some((file_id.to_string(), stage));
    }

    pub(crate) fn clear_in_flight(&self) {
        *self.in_flight.lock() = None;
    }

    fn take_in_flight(&self) -> Option<(String, StageName)> {
        self.in_flight.lock().take()
    }
}

/// Worker pool for one lane
pub struct LaneWorker {
    lane: Lane,
    queue: Arc<TaskQueue>,
    handlers: Arc<StageHandlers>,
    permits: Arc<Semaphore>,
    workers: usize,
    budgets: TimeBudgets,
}

impl LaneWorker {
    pub fn new(
        lane: Lane,
        queue: Arc<TaskQueue>,
        handlers: Arc<StageHandlers>,
        workers: usize,
        budgets: TimeBudgets,
    ) -> Self {
        let workers = workers.max(1);
        Self {
            lane,
            queue,
            handlers,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            budgets,
        }
    }

    /// Start draining `receiver` on the runtime
    pub fn spawn(self, receiver: mpsc::Receiver<QueuedTask>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(receiver))
    }

    /// Run tasks from the lane until the channel closes
    pub async fn run(self, mut receiver: mpsc::Receiver<QueuedTask>) {
        tracing::info!(
            "{} worker started: {} workers, soft {}s, hard {}s",
            self.lane,
            self.workers,
            self.budgets.soft.as_secs(),
            self.budgets.hard.as_secs()
        );

        while let Some(task) = receiver.recv().await {
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                tracing::error!("{} worker semaphore closed", self.lane);
                break;
            };

            let queue = self.queue.clone();
            let handlers = self.handlers.clone();
            let budgets = self.budgets;
            let lane = self.lane;

            tokio::spawn(async move {
                let _permit = permit;
                Self::run_task(lane, queue, handlers, budgets, task).await;
            });
        }

        tracing::info!("{} worker stopped", self.lane);
    }

    async fn run_task(
        lane: Lane,
        queue: Arc<TaskQueue>,
        handlers: Arc<StageHandlers>,
        budgets: TimeBudgets,
        task: QueuedTask,
    ) {
        let QueuedTask { id, request } = task;
        let kind = request.kind();
        tracing::info!("Task {} ({}) started on {} lane", id, kind, lane);

        queue.mark_started(id);
        let ctx = Arc::new(TaskContext::new(id, queue.clone()));

        let soft_timer = {
            let ctx = ctx.clone();
            let soft = budgets.soft;
            tokio::spawn(async move {
                tokio::time::sleep(soft).await;
                tracing::warn!("Task {} exceeded soft limit of {}s", ctx.task_id(), soft.as_secs());
                ctx.expire_soft();
            })
        };

        let outcome = match timeout(budgets.hard, handlers.execute(request, ctx.clone())).await {
            Ok(Ok(output)) => {
                tracing::info!("Task {} ({}) succeeded", id, kind);
                Ok(output)
            }
            Ok(Err(e)) => {
                tracing::error!("Task {} ({}) failed: {}", id, kind, e);
                Err(e.to_string())
            }
            Err(_) => {
                let err = Error::TaskTimeout {
                    budget: TimeBudget::Hard,
                    elapsed_secs: budgets.hard.as_secs(),
                };
                tracing::error!(
                    "TIMEOUT: task {} ({}) killed after {:.1}s (limit: {}s)",
                    id,
                    kind,
                    ctx.started.elapsed().as_secs_f64(),
                    budgets.hard.as_secs()
                );
                if let Some((file_id, stage)) = ctx.take_in_flight() {
                    handlers.record_failure(&file_id, stage, &err);
                }
                Err(err.to_string())
            }
        };

        soft_timer.abort();
        queue.finish(id, outcome).await;
    }
}
