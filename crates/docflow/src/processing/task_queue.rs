//! In-process task queue with observable task state
//!
//! Each lane is a bounded mpsc channel drained by its `LaneWorker`. Task state
//! lives in a `DashMap` of watch channels so callers can poll or await a task,
//! and every state change is pushed to the hub as a `task_update`.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::task::{Lane, TaskId, TaskOutput, TaskProgress, TaskRequest, TaskState, TaskStatus};
use crate::error::{Error, Result};
use crate::hub::NotificationHub;

/// A task travelling through a lane channel
#[derive(Debug)]
pub struct QueuedTask {
    pub id: TaskId,
    pub request: TaskRequest,
}

type BuildNext = Box<dyn FnOnce(TaskOutput) -> Result<TaskRequest> + Send + Sync>;

/// Follow-up submitted when a task succeeds
struct Continuation {
    next_id: TaskId,
    build: BuildNext,
}

/// Receiving ends of the lane channels, handed to the workers
pub struct LaneReceivers {
    pub conversion: mpsc::Receiver<QueuedTask>,
    pub indexing: mpsc::Receiver<QueuedTask>,
}

/// Caller's view of a submitted task
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    rx: watch::Receiver<TaskState>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Current state snapshot
    pub fn state(&self) -> TaskState {
        self.rx.borrow().clone()
    }

    /// Wait until the task succeeds or fails
    pub async fn wait(&self) -> TaskState {
        let mut rx = self.rx.clone();
        loop {
            {
                let state = rx.borrow_and_update();
                if state.status.is_finished() {
                    return state.clone();
                }
            }
            if rx.changed().await.is_err() {
                // State was purged; report the last value seen
                return rx.borrow().clone();
            }
        }
    }
}

/// Queue of tasks across both lanes
pub struct TaskQueue {
    states: DashMap<TaskId, watch::Sender<TaskState>>,
    continuations: DashMap<TaskId, Continuation>,
    conversion: mpsc::Sender<QueuedTask>,
    indexing: mpsc::Sender<QueuedTask>,
    hub: Arc<NotificationHub>,
    result_expires: Duration,
}

impl TaskQueue {
    /// Create a queue whose lanes each buffer `capacity` tasks
    pub fn new(
        capacity: usize,
        result_expires: Duration,
        hub: Arc<NotificationHub>,
    ) -> (Self, LaneReceivers) {
        let (conversion, conversion_rx) = mpsc::channel(capacity.max(1));
        let (indexing, indexing_rx) = mpsc::channel(capacity.max(1));

        let queue = Self {
            states: DashMap::new(),
            continuations: DashMap::new(),
            conversion,
            indexing,
            hub,
            result_expires,
        };

        (
            queue,
            LaneReceivers {
                conversion: conversion_rx,
                indexing: indexing_rx,
            },
        )
    }

    /// Submit a task on its lane
    pub async fn enqueue(&self, request: TaskRequest) -> Result<TaskHandle> {
        let id = Uuid::new_v4();
        let handle = self.register(id, request.lane(), request.kind());
        self.dispatch(id, request).await?;
        Ok(handle)
    }

    /// Submit `request` and, once it succeeds, the task built from its output.
    ///
    /// The returned handle refers to the follow-up task, which fails with the
    /// first task's error if the first task fails.
    pub async fn enqueue_then<F>(
        &self,
        request: TaskRequest,
        next_lane: Lane,
        next_kind: &str,
        build: F,
    ) -> Result<TaskHandle>
    where
        F: FnOnce(TaskOutput) -> Result<TaskRequest> + Send + Sync + 'static,
    {
        let first_id = Uuid::new_v4();
        let next_id = Uuid::new_v4();

        let next = self.register(next_id, next_lane, next_kind);
        self.register(first_id, request.lane(), request.kind());
        self.continuations.insert(
            first_id,
            Continuation {
                next_id,
                build: Box::new(build),
            },
        );

        if let Err(e) = self.dispatch(first_id, request).await {
            self.continuations.remove(&first_id);
            self.update(next_id, |s| fail_state(s, e.to_string()));
            return Err(e);
        }

        tracing::info!("Queued chain: task {} continues as {}", first_id, next_id);
        Ok(next)
    }

    fn register(&self, id: TaskId, lane: Lane, kind: &str) -> TaskHandle {
        let (tx, rx) = watch::channel(TaskState::pending(id, lane, kind));
        self.states.insert(id, tx);
        TaskHandle { id, rx }
    }

    async fn dispatch(&self, id: TaskId, request: TaskRequest) -> Result<()> {
        let lane = request.lane();
        let sender = match lane {
            Lane::Conversion => &self.conversion,
            Lane::Indexing => &self.indexing,
        };

        if let Err(e) = sender.send(QueuedTask { id, request }).await {
            let message = format!("{} lane is not accepting tasks: {}", lane, e);
            tracing::error!("Failed to submit task {}: {}", id, message);
            self.update(id, |s| fail_state(s, message.clone()));
            return Err(Error::Internal(message));
        }

        tracing::debug!("Task {} queued on {} lane", id, lane);
        Ok(())
    }

    /// Handle for an existing task
    pub fn handle(&self, id: &TaskId) -> Option<TaskHandle> {
        self.states.get(id).map(|tx| TaskHandle {
            id: *id,
            rx: tx.subscribe(),
        })
    }

    /// State snapshot for an existing task
    pub fn state(&self, id: &TaskId) -> Option<TaskState> {
        self.states.get(id).map(|tx| tx.borrow().clone())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Mark a task as picked up by a worker
    pub fn mark_started(&self, id: TaskId) {
        self.update(id, |s| {
            s.status = TaskStatus::Progress;
            s.progress = Some(TaskProgress {
                percent: 0,
                message: "Started".to_string(),
            });
        });
    }

    /// Record advisory progress
    pub fn set_progress(&self, id: TaskId, percent: u8, message: impl Into<String>) {
        let message = message.into();
        self.update(id, |s| {
            if s.status.is_finished() {
                return;
            }
            s.status = TaskStatus::Progress;
            s.progress = Some(TaskProgress {
                percent: percent.min(100),
                message,
            });
        });
    }

    /// Record a task's outcome and fire its continuation, if any
    pub async fn finish(&self, id: TaskId, outcome: std::result::Result<TaskOutput, String>) {
        match &outcome {
            Ok(output) => {
                let output = output.clone();
                self.update(id, |s| {
                    s.status = TaskStatus::Success;
                    s.progress = Some(TaskProgress {
                        percent: 100,
                        message: "Completed".to_string(),
                    });
                    s.result = Some(output);
                    s.finished_at = Some(Utc::now());
                });
            }
            Err(message) => {
                self.update(id, |s| fail_state(s, message.clone()));
            }
        }

        let Some((_, continuation)) = self.continuations.remove(&id) else {
            return;
        };
        let next_id = continuation.next_id;

        match outcome {
            Ok(output) => match (continuation.build)(output) {
                Ok(next) => {
                    // dispatch marks the follow-up failed if the lane is closed
                    let _ = self.dispatch(next_id, next).await;
                }
                Err(e) => self.update(next_id, |s| fail_state(s, e.to_string())),
            },
            Err(message) => {
                tracing::warn!("Task {} failed, failing follow-up {}", id, next_id);
                self.update(next_id, |s| fail_state(s, message));
            }
        }
    }

    /// Drop finished task states older than the expiry window
    pub fn purge_expired(&self) -> usize {
        let expires = chrono::Duration::from_std(self.result_expires)
            .unwrap_or_else(|_| chrono::Duration::seconds(3600));
        let cutoff = Utc::now() - expires;
        let before = self.states.len();

        self.states.retain(|_, tx| {
            let state = tx.borrow();
            !matches!(state.finished_at, Some(at) if at <= cutoff)
        });

        let purged = before.saturating_sub(self.states.len());
        if purged > 0 {
            tracing::info!("Purged {} expired task results", purged);
        }
        purged
    }

    fn update(&self, id: TaskId, f: impl FnOnce(&mut TaskState)) {
        let snapshot = {
            let Some(tx) = self.states.get(&id) else {
                tracing::warn!("Update for unknown task {}", id);
                return;
            };
            tx.send_modify(|state| {
                f(state);
                state.updated_at = Utc::now();
            });
            let snapshot = tx.borrow().clone();
            snapshot
        };

        match serde_json::to_value(&snapshot) {
            Ok(data) => {
                self.hub.publish_task_update(&id.to_string(), data);
            }
            Err(e) => tracing::error!("Failed to serialize task {} state: {}", id, e),
        }
    }
}

fn fail_state(state: &mut TaskState, message: String) {
    state.status = TaskStatus::Failure;
    state.error = Some(message);
    state.finished_at = Some(Utc::now());
}
