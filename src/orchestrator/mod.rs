//! Review orchestrator
//!
//! Wires job submission to the queue, the job context registry and the
//! review context store, and folds finished reviews into tracked merge
//! request lifecycles.

mod runner;

pub use runner::{AgentProcessRunner, JOB_ID_ENV, MR_ID_ENV};

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::{AgentPlansConfig, QueueConfig};
use crate::context::{ContextError, JobContextEntry, JobContextRegistry, RegistryError, ReviewContextStore};
use crate::domain::{Job, MrState, ReviewContext, ReviewContextThread};
use crate::events::{Event, EventBus};
use crate::lifecycle::{TrackedMr, TransitionError};
use crate::queue::{JobRunner, QueueError, ReviewQueue};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Job rejected by queue: {0}")]
    Rejected(#[from] QueueError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Review context {0} has no result")]
    NoResult(String),

    #[error("Review context {0} never reached the completed phase")]
    NotCompleted(String),

    #[error("Tracked merge request not found: {0}")]
    UnknownMr(String),
}

/// Discussion threads of a merge request, fetched from the hosting platform
#[async_trait]
pub trait ThreadSource: Send + Sync {
    async fn fetch_threads(&self, job: &Job) -> anyhow::Result<Vec<ReviewContextThread>>;
}

/// Thread source for platforms without discussion support
pub struct NoThreads;

#[async_trait]
impl ThreadSource for NoThreads {
    async fn fetch_threads(&self, _job: &Job) -> anyhow::Result<Vec<ReviewContextThread>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// A job with the same id is already queued or running
    AlreadyActive,
}

struct Shared {
    contexts: Arc<dyn ReviewContextStore>,
    registry: Arc<JobContextRegistry>,
    agent_plans: AgentPlansConfig,
    tracked: RwLock<HashMap<String, TrackedMr>>,
    event_bus: EventBus,
}

impl Shared {
    async fn finish(&self, job: &Job) -> Result<TrackedMr, OrchestratorError> {
        let local_path = Path::new(&job.local_path);
        let merge_request_id = job.merge_request_id();

        let context = self
            .contexts
            .read(local_path, &merge_request_id)
            .await?
            .ok_or_else(|| ContextError::not_found(&merge_request_id))?;
        let result = context
            .result
            .clone()
            .ok_or_else(|| OrchestratorError::NoResult(merge_request_id.clone()))?;
        if !context.is_completed() {
            return Err(OrchestratorError::NotCompleted(merge_request_id));
        }

        let open_threads = context.open_thread_count() as u32;
        let total_threads = context.threads.len() as u32;

        let updated = {
            let mut tracked = self.tracked.write().await;
            let current = tracked
                .entry(job.tracked_mr_id())
                .or_insert_with(|| TrackedMr::new(job.platform, &job.project_path, job.mr_number));
            let next = current.apply_review(&result, open_threads, total_threads)?;
            let from = current.current_state();
            *current = next.clone();
            (next, from)
        };
        let (next, from) = updated;
        self.publish_state_change(&next.id, from, next.current_state());

        tracing::info!(
            "Review of {} finished: score {}, {} blocking, now {}",
            next.id,
            result.score,
            result.blocking,
            next.current_state()
        );

        self.release(job).await;
        Ok(next)
    }

    /// Drop the job's registry entry and review context
    async fn release(&self, job: &Job) {
        self.unregister(job).await;
        if let Err(e) = self
            .contexts
            .delete(Path::new(&job.local_path), &job.merge_request_id())
            .await
        {
            tracing::warn!("Failed to delete review context for {}: {}", job.id, e);
        }
    }

    async fn unregister(&self, job: &Job) {
        if let Err(e) = self.registry.remove(&job.id).await {
            tracing::warn!("Failed to remove job context for {}: {}", job.id, e);
        }
    }

    fn publish_state_change(&self, mr_id: &str, from: MrState, to: MrState) {
        if from == to {
            return;
        }
        self.event_bus.publish(Event::MrStateChanged {
            mr_id: mr_id.to_string(),
            from_state: from,
            to_state: to,
            timestamp: Utc::now(),
        });
    }
}

/// Runs the agent, then folds the outcome into the tracked merge request
struct ReviewJobRunner {
    agent: Arc<dyn JobRunner>,
    shared: Arc<Shared>,
}

#[async_trait]
impl JobRunner for ReviewJobRunner {
    async fn run(&self, job: Job) -> anyhow::Result<()> {
        // On failure the document stays behind for inspection; the next submit replaces it
        if let Err(e) = self.agent.run(job.clone()).await {
            self.shared.unregister(&job).await;
            return Err(e);
        }

        if let Err(e) = self.shared.finish(&job).await {
            self.shared.unregister(&job).await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// Claim on a job id for the duration of one `submit`
struct Admission<'a> {
    submitting: &'a Mutex<HashSet<String>>,
    job_id: String,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        self.submitting
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.job_id);
    }
}

pub struct ReviewOrchestrator {
    queue: ReviewQueue,
    shared: Arc<Shared>,
    threads: Arc<dyn ThreadSource>,
    /// Job ids between the dedup check and the enqueue
    submitting: Mutex<HashSet<String>>,
}

impl ReviewOrchestrator {
    pub fn new(
        queue_config: QueueConfig,
        agent_plans: AgentPlansConfig,
        agent: Arc<dyn JobRunner>,
        contexts: Arc<dyn ReviewContextStore>,
        registry: Arc<JobContextRegistry>,
        event_bus: EventBus,
    ) -> Self {
        let shared = Arc::new(Shared {
            contexts,
            registry,
            agent_plans,
            tracked: RwLock::new(HashMap::new()),
            event_bus: event_bus.clone(),
        });
        let runner = Arc::new(ReviewJobRunner {
            agent,
            shared: shared.clone(),
        });

        Self {
            queue: ReviewQueue::new(queue_config, runner, event_bus),
            shared,
            threads: Arc::new(NoThreads),
            submitting: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_thread_source(mut self, threads: Arc<dyn ThreadSource>) -> Self {
        self.threads = threads;
        self
    }

    pub fn queue(&self) -> &ReviewQueue {
        &self.queue
    }

    /// Claim the job id unless it is queued, running or being submitted
    fn admit(&self, job_id: &str) -> Option<Admission<'_>> {
        let mut submitting = self.submitting.lock().unwrap_or_else(|e| e.into_inner());
        if self.queue.has_active_job(job_id) || !submitting.insert(job_id.to_string()) {
            return None;
        }
        Some(Admission {
            submitting: &self.submitting,
            job_id: job_id.to_string(),
        })
    }

    /// Prepare the job's review context and queue it
    pub async fn submit(&self, job: Job) -> Result<SubmitOutcome, OrchestratorError> {
        let Some(_admission) = self.admit(&job.id) else {
            tracing::info!("Job {} is already active, not submitting again", job.id);
            return Ok(SubmitOutcome::AlreadyActive);
        };

        let threads = match self.threads.fetch_threads(&job).await {
            Ok(threads) => threads,
            Err(e) => {
                tracing::warn!("Could not fetch threads for {}: {}", job.id, e);
                Vec::new()
            }
        };

        let merge_request_id = job.merge_request_id();
        let context = ReviewContext::new(
            merge_request_id.clone(),
            job.platform,
            job.project_path.clone(),
            job.mr_number,
        )
        .with_job_type(job.job_type)
        .with_agents(self.shared.agent_plans.for_job_type(job.job_type).to_vec())
        .with_threads(threads);

        let local_path = Path::new(&job.local_path);
        self.shared.contexts.create(local_path, context).await?;
        self.shared
            .registry
            .register(&job.id, JobContextEntry::new(local_path, merge_request_id))
            .await?;
        self.reopen_for_review(&job).await;

        let job_id = job.id.clone();
        match self.queue.try_enqueue(job.clone()) {
            Ok(()) => {}
            // the live job owns the document and registry entry
            Err(QueueError::Duplicate(_)) => return Ok(SubmitOutcome::AlreadyActive),
            Err(e) => {
                tracing::warn!("Job {} rejected: {}", job_id, e);
                self.shared.release(&job).await;
                return Err(e.into());
            }
        }

        tracing::info!("Submitted job {}", job_id);
        Ok(SubmitOutcome::Queued)
    }

    /// Fold a completed review context into its tracked merge request
    pub async fn finish(&self, job: &Job) -> Result<TrackedMr, OrchestratorError> {
        self.shared.finish(job).await
    }

    /// Cancel a queued or running job and drop its bookkeeping
    pub async fn cancel(&self, job: &Job) -> bool {
        if !self.queue.cancel_job(&job.id) {
            return false;
        }
        self.shared.release(job).await;
        true
    }

    pub async fn tracked_mr(&self, mr_id: &str) -> Option<TrackedMr> {
        self.shared.tracked.read().await.get(mr_id).cloned()
    }

    pub async fn tracked_mrs(&self) -> Vec<TrackedMr> {
        self.shared.tracked.read().await.values().cloned().collect()
    }

    /// Record a lifecycle change that happened outside a review, such as a
    /// merge or an approval on the hosting platform
    pub async fn transition(&self, mr_id: &str, target: MrState) -> Result<TrackedMr, OrchestratorError> {
        let (next, from) = {
            let mut tracked = self.shared.tracked.write().await;
            let current = tracked
                .get_mut(mr_id)
                .ok_or_else(|| OrchestratorError::UnknownMr(mr_id.to_string()))?;
            let next = current.transition_to(target)?;
            let from = current.current_state();
            *current = next.clone();
            (next, from)
        };

        self.shared.publish_state_change(mr_id, from, target);
        Ok(next)
    }

    /// A new review cycle on a request waiting for fixes puts it back under review
    async fn reopen_for_review(&self, job: &Job) {
        let mr_id = job.tracked_mr_id();
        let from = {
            let mut tracked = self.shared.tracked.write().await;
            let current = tracked
                .entry(mr_id.clone())
                .or_insert_with(|| TrackedMr::new(job.platform, &job.project_path, job.mr_number));
            if current.current_state() != MrState::PendingFix {
                return;
            }
            match current.transition_to(MrState::PendingReview) {
                Ok(next) => {
                    *current = next;
                    MrState::PendingFix
                }
                Err(e) => {
                    tracing::warn!("{}", e);
                    return;
                }
            }
        };
        self.shared
            .publish_state_change(&mr_id, from, MrState::PendingReview);
    }

    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}
