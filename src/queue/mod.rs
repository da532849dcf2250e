//! Review Queue - deduplicating, concurrency-bounded job queue
//!
//! This module provides:
//! - `ReviewQueue`: admission, FIFO dispatch and per-job bookkeeping
//! - `JobRunner`: the caller-supplied unit of work run for each job
//! - `JobRecord`: status, timestamps and error of one job

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::AbortHandle;

use crate::config::QueueConfig;
use crate::domain::Job;
use crate::events::{Event, EventBus};

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

/// Why a job was not accepted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Job already active: {0}")]
    Duplicate(String),

    #[error("Queue is full ({0} jobs waiting)")]
    Full(usize),

    #[error("Queue is shut down")]
    ShutDown,
}

/// Unit of work executed for each admitted job
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, job: Job) -> anyhow::Result<()>;
}

/// Bookkeeping for one job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job: Job,
    pub status: JobStatus,
    pub error: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    fn queued(job: Job) -> Self {
        Self {
            job,
            status: JobStatus::Queued,
            error: None,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// Counts of jobs by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

struct ActiveJob {
    record: JobRecord,
    /// Distinguishes this admission from earlier ones under the same id
    generation: u64,
    handle: Option<AbortHandle>,
}

#[derive(Default)]
struct QueueState {
    /// Ids waiting for a slot, in arrival order
    pending: VecDeque<String>,
    /// Queued and running jobs by id
    active: HashMap<String, ActiveJob>,
    /// Finished jobs, oldest first
    recent: VecDeque<JobRecord>,
    running: usize,
    next_generation: u64,
    shut_down: bool,
}

struct QueueInner {
    config: QueueConfig,
    runner: Arc<dyn JobRunner>,
    event_bus: EventBus,
    state: Mutex<QueueState>,
    idle: Notify,
}

/// Deduplicating job queue with a fixed number of concurrent slots.
///
/// Must be used from within a tokio runtime; admitted jobs run on spawned tasks.
#[derive(Clone)]
pub struct ReviewQueue {
    inner: Arc<QueueInner>,
}

impl ReviewQueue {
    pub fn new(config: QueueConfig, runner: Arc<dyn JobRunner>, event_bus: EventBus) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config,
                runner,
                event_bus,
                state: Mutex::new(QueueState::default()),
                idle: Notify::new(),
            }),
        }
    }

    /// Accept a job, returning `false` when it was rejected
    pub fn enqueue(&self, job: Job) -> bool {
        let job_id = job.id.clone();
        match self.try_enqueue(job) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Rejected job {}: {}", job_id, e);
                false
            }
        }
    }

    /// Accept a job, reporting why it was rejected
    pub fn try_enqueue(&self, job: Job) -> Result<(), QueueError> {
        let job_id = job.id.clone();
        {
            let mut state = self.inner.lock();

            if state.shut_down {
                return Err(QueueError::ShutDown);
            }
            if state.active.contains_key(&job_id) {
                return Err(QueueError::Duplicate(job_id));
            }
            if state.pending.len() >= self.inner.config.max_queued {
                return Err(QueueError::Full(state.pending.len()));
            }

            state.next_generation += 1;
            let generation = state.next_generation;
            state.active.insert(
                job_id.clone(),
                ActiveJob {
                    record: JobRecord::queued(job),
                    generation,
                    handle: None,
                },
            );
            state.pending.push_back(job_id.clone());
        }

        tracing::info!("Queued job {}", job_id);
        self.inner.event_bus.publish(Event::JobQueued {
            job_id,
            timestamp: Utc::now(),
        });

        QueueInner::dispatch(&self.inner);
        Ok(())
    }

    /// True iff the job is queued or running
    pub fn has_active_job(&self, job_id: &str) -> bool {
        self.inner.lock().active.contains_key(job_id)
    }

    pub fn get_job_status(&self, job_id: &str) -> Option<JobStatus> {
        self.get_job(job_id).map(|r| r.status)
    }

    /// Active record first, then the most recent finished one
    pub fn get_job(&self, job_id: &str) -> Option<JobRecord> {
        let state = self.inner.lock();
        if let Some(active) = state.active.get(job_id) {
            return Some(active.record.clone());
        }
        state
            .recent
            .iter()
            .rev()
            .find(|r| r.job.id == job_id)
            .cloned()
    }

    /// Drop a queued or running job from active bookkeeping.
    ///
    /// A running job's task is aborted, which drops its work unit future.
    /// Returns `false` for unknown or already finished jobs.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        {
            let mut state = self.inner.lock();
            let Some(active) = state.active.remove(job_id) else {
                return false;
            };

            match active.record.status {
                JobStatus::Queued => state.pending.retain(|id| id != job_id),
                JobStatus::Running => {
                    state.running = state.running.saturating_sub(1);
                    if let Some(handle) = active.handle {
                        handle.abort();
                    }
                }
                JobStatus::Completed | JobStatus::Failed => {}
            }
        }

        tracing::info!("Cancelled job {}", job_id);
        self.inner.event_bus.publish(Event::JobCancelled {
            job_id: job_id.to_string(),
            timestamp: Utc::now(),
        });

        QueueInner::dispatch(&self.inner);
        self.inner.notify_if_idle();
        true
    }

    /// Queued and running jobs, in no particular order
    pub fn list_active(&self) -> Vec<JobRecord> {
        self.inner
            .lock()
            .active
            .values()
            .map(|a| a.record.clone())
            .collect()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.lock();
        let mut stats = QueueStats {
            queued: state.pending.len(),
            running: state.running,
            ..Default::default()
        };
        for record in &state.recent {
            match record.status {
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Queued | JobStatus::Running => {}
            }
        }
        stats
    }

    /// Stop accepting jobs and abort everything active
    pub fn shutdown(&self) {
        let mut state = self.inner.lock();
        state.shut_down = true;
        state.pending.clear();
        for (_, active) in state.active.drain() {
            if let Some(handle) = active.handle {
                handle.abort();
            }
        }
        state.running = 0;
        drop(state);

        tracing::info!("Review queue shut down");
        self.inner.idle.notify_waiters();
    }

    /// Wait until no job is queued or running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.lock().active.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A poisoned lock only means a panic elsewhere; the bookkeeping stays consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start pending jobs in arrival order while slots are free
    fn dispatch(inner: &Arc<QueueInner>) {
        let mut started = Vec::new();
        {
            let mut state = inner.lock();
            while state.running < inner.config.max_concurrent {
                let Some(job_id) = state.pending.pop_front() else {
                    break;
                };
                let Some(active) = state.active.get_mut(&job_id) else {
                    continue;
                };

                active.record.status = JobStatus::Running;
                active.record.started_at = Some(Utc::now());
                let job = active.record.job.clone();
                let generation = active.generation;

                let task_inner = Arc::clone(inner);
                let handle = tokio::spawn(async move {
                    let id = job.id.clone();
                    let outcome = AssertUnwindSafe(task_inner.runner.run(job))
                        .catch_unwind()
                        .await;
                    let result = match outcome {
                        Ok(result) => result.map_err(|e| format!("{:#}", e)),
                        Err(_) => Err("work unit panicked".to_string()),
                    };
                    QueueInner::finish(&task_inner, &id, generation, result);
                });

                active.handle = Some(handle.abort_handle());
                state.running += 1;
                started.push(job_id);
            }
        }

        for job_id in started {
            tracing::info!("Started job {}", job_id);
            inner.event_bus.publish(Event::JobStarted {
                job_id,
                timestamp: Utc::now(),
            });
        }
    }

    /// Record a work unit's outcome and free its slot.
    ///
    /// Ignored unless `generation` is the admission the task was started for.
    fn finish(inner: &Arc<QueueInner>, job_id: &str, generation: u64, result: Result<(), String>) {
        {
            let mut state = inner.lock();
            let still_running = state.active.get(job_id).is_some_and(|a| {
                a.generation == generation && a.record.status == JobStatus::Running
            });
            if !still_running {
                // cancelled while the work unit was finishing, possibly re-admitted since
                tracing::debug!("Dropping stale outcome for job {}", job_id);
                return;
            }

            let Some(active) = state.active.remove(job_id) else {
                return;
            };
            let mut record = active.record;
            record.finished_at = Some(Utc::now());
            match &result {
                Ok(()) => record.status = JobStatus::Completed,
                Err(e) => {
                    record.status = JobStatus::Failed;
                    record.error = Some(e.clone());
                }
            }

            state.running = state.running.saturating_sub(1);
            state.recent.push_back(record);
            while state.recent.len() > inner.config.recent_history {
                state.recent.pop_front();
            }
        }

        let event = match result {
            Ok(()) => {
                tracing::info!("Job {} completed", job_id);
                Event::JobCompleted {
                    job_id: job_id.to_string(),
                    timestamp: Utc::now(),
                }
            }
            Err(error) => {
                tracing::error!("Job {} failed: {}", job_id, error);
                Event::JobFailed {
                    job_id: job_id.to_string(),
                    error,
                    timestamp: Utc::now(),
                }
            }
        };
        inner.event_bus.publish(event);

        QueueInner::dispatch(inner);
        inner.notify_if_idle();
    }

    fn notify_if_idle(&self) {
        if self.lock().active.is_empty() {
            self.idle.notify_waiters();
        }
    }
}
