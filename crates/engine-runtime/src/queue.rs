//! Background work queue.
//!
//! Long operations are queued as [`Task`]s and drained one at a time by a
//! single worker. Tasks that need a staging table which is not built yet go
//! back to the tail of the queue. Once the queue is empty, a join requested
//! with [`Task::ExecuteJoinWhenIdle`] runs.

use crate::error::TaskError;
use async_trait::async_trait;
use model::core::identifiers::Alias;
use std::{collections::VecDeque, fmt, sync::Arc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    ConvertToStaging { alias: Alias },
    BuildIndex { alias: Alias, field: String },
    RefreshSample,
    AutoAdjustFieldLengths,
    /// Run the configured join once everything queued before it is done.
    ExecuteJoinWhenIdle,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::ConvertToStaging { alias } => write!(f, "convert '{alias}' to staging"),
            Task::BuildIndex { alias, field } => write!(f, "build index on {alias}.{field}"),
            Task::RefreshSample => f.write_str("refresh sample"),
            Task::AutoAdjustFieldLengths => f.write_str("adjust field lengths"),
            Task::ExecuteJoinWhenIdle => f.write_str("execute join when idle"),
        }
    }
}

/// Executes queued tasks.
#[async_trait]
pub trait TaskRunner: Send {
    async fn run_task(&mut self, task: &Task, cancel: &CancellationToken) -> Result<(), TaskError>;

    async fn execute_join(&mut self, cancel: &CancellationToken) -> Result<(), TaskError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    #[default]
    Idle,
    Draining,
}

#[derive(Debug, Default)]
struct QueueState {
    tasks: VecDeque<Task>,
    worker: WorkerState,
    run_when_idle: bool,
}

/// What one drain did.
#[derive(Debug, Default)]
pub struct DrainReport {
    pub completed: usize,
    pub requeued: usize,
    pub failed: Vec<(Task, String)>,
    /// Tasks left queued because none of them could make progress.
    pub stalled: Vec<Task>,
    pub join_executed: bool,
    /// Another drain was running; nothing was done.
    pub already_draining: bool,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BackgroundTaskQueue {
    state: Arc<Mutex<QueueState>>,
}

impl BackgroundTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enqueue(&self, task: Task) {
        debug!(task = %task, "Task queued");
        self.state.lock().await.tasks.push_back(task);
    }

    pub async fn enqueue_all(&self, tasks: impl IntoIterator<Item = Task> + Send) {
        let mut state = self.state.lock().await;
        for task in tasks {
            debug!(task = %task, "Task queued");
            state.tasks.push_back(task);
        }
    }

    /// Runs the join after the next drain empties the queue.
    pub async fn set_run_when_idle(&self, run: bool) {
        self.state.lock().await.run_when_idle = run;
    }

    pub async fn run_when_idle(&self) -> bool {
        self.state.lock().await.run_when_idle
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.tasks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.tasks.is_empty()
    }

    pub async fn pending(&self) -> Vec<Task> {
        self.state.lock().await.tasks.iter().cloned().collect()
    }

    pub async fn worker_state(&self) -> WorkerState {
        self.state.lock().await.worker
    }

    /// Drains the queue through `runner`.
    ///
    /// Only one drain runs at a time; a second call while one is in progress
    /// returns at once and leaves its tasks to the running drain. Failed
    /// tasks are reported and skipped. The drain stops early when `cancel`
    /// fires or when every remaining task is waiting on staging that nothing
    /// left in the queue will produce.
    pub async fn drain<R>(&self, runner: &mut R, cancel: &CancellationToken) -> DrainReport
    where
        R: TaskRunner + ?Sized,
    {
        let mut report = DrainReport::default();
        {
            let mut state = self.state.lock().await;
            if state.worker == WorkerState::Draining {
                debug!(pending = state.tasks.len(), "Queue already draining");
                report.already_draining = true;
                return report;
            }
            state.worker = WorkerState::Draining;
        }

        // consecutive requeues without any task completing
        let mut waiting = 0usize;

        loop {
            if cancel.is_cancelled() {
                warn!("Queue drain cancelled");
                report.cancelled = true;
                break;
            }

            let task = {
                let mut state = self.state.lock().await;
                if waiting > 0 && waiting >= state.tasks.len() {
                    report.stalled = state.tasks.iter().cloned().collect();
                    warn!(stalled = report.stalled.len(), "Queued tasks cannot make progress");
                    break;
                }
                match state.tasks.pop_front() {
                    Some(Task::ExecuteJoinWhenIdle) => {
                        state.run_when_idle = true;
                        report.completed += 1;
                        waiting = 0;
                        continue;
                    }
                    Some(task) => task,
                    None => break,
                }
            };

            debug!(task = %task, "Task started");
            match runner.run_task(&task, cancel).await {
                Ok(()) => {
                    report.completed += 1;
                    waiting = 0;
                }
                Err(TaskError::NotReady(reason)) => {
                    debug!(task = %task, reason = %reason, "Task requeued");
                    report.requeued += 1;
                    waiting += 1;
                    self.state.lock().await.tasks.push_back(task);
                }
                Err(TaskError::FileClosed(reason)) => {
                    warn!(task = %task, reason = %reason, "Task stopped: input closed");
                    report.failed.push((task, reason));
                    waiting = 0;
                }
                Err(e) => {
                    error!(task = %task, error = %e, "Task failed");
                    report.failed.push((task, e.to_string()));
                    waiting = 0;
                }
            }
        }

        let run_join = {
            let mut state = self.state.lock().await;
            let run = state.run_when_idle && state.tasks.is_empty() && !report.cancelled;
            if run {
                state.run_when_idle = false;
            }
            run
        };
        if run_join {
            info!("Queue idle, executing join");
            match runner.execute_join(cancel).await {
                Ok(()) => report.join_executed = true,
                Err(e) => {
                    error!(error = %e, "Join execution failed");
                    report.failed.push((Task::ExecuteJoinWhenIdle, e.to_string()));
                }
            }
        }

        self.state.lock().await.worker = WorkerState::Idle;
        report
    }
}
