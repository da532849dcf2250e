//! Progress Store - per-job agent progress and review phase
//!
//! Every mutation recomputes overall progress and notifies the registered
//! `ProgressObserver`s in registration order, after the store lock is released.

mod snapshot;

pub use snapshot::to_review_progress;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::{AgentDefinition, AgentStatus, ReviewPhase, ReviewProgress};

/// Receives every progress change made through the store
#[async_trait]
pub trait ProgressObserver: Send + Sync {
    async fn on_progress_change(&self, job_id: &str, progress: &ReviewProgress);
}

/// Terminal outcome reported by an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentOutcome {
    Success,
    Failed,
}

impl AgentOutcome {
    fn status(&self) -> AgentStatus {
        match self {
            AgentOutcome::Success => AgentStatus::Completed,
            AgentOutcome::Failed => AgentStatus::Failed,
        }
    }
}

#[derive(Clone, Default)]
pub struct ProgressStore {
    progress: Arc<RwLock<HashMap<String, ReviewProgress>>>,
    observers: Arc<RwLock<Vec<Arc<dyn ProgressObserver>>>>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, observer: Arc<dyn ProgressObserver>) {
        self.observers.write().await.push(observer);
    }

    /// Initialise progress for a job. An existing entry is reset.
    pub async fn create_progress(&self, job_id: &str, agents: &[AgentDefinition]) -> ReviewProgress {
        let progress = ReviewProgress::new(agents);
        let previous = self
            .progress
            .write()
            .await
            .insert(job_id.to_string(), progress.clone());

        if previous.is_some() {
            tracing::warn!("Progress for job {} already existed and was reset", job_id);
        }

        self.notify(job_id, &progress).await;
        progress
    }

    /// Mark an agent as running. `None` if the job or agent is unknown.
    ///
    /// Starting an agent that is already running or completed changes nothing.
    pub async fn start_agent(&self, job_id: &str, agent_name: &str) -> Option<ReviewProgress> {
        let (progress, changed) = {
            let mut all = self.progress.write().await;
            let progress = all.get_mut(job_id)?;
            let agent = progress.agent_mut(agent_name)?;

            let changed = matches!(agent.status, AgentStatus::Pending | AgentStatus::Failed);
            if changed {
                agent.status = AgentStatus::Running;
                agent.started_at = Some(Utc::now());
                agent.completed_at = None;
                agent.error = None;
                progress.touch();
            }
            (progress.clone(), changed)
        };

        if changed {
            tracing::debug!("Agent {} started for job {}", agent_name, job_id);
            self.notify(job_id, &progress).await;
        }
        Some(progress)
    }

    /// Mark an agent as completed or failed. `None` if the job or agent is unknown.
    pub async fn complete_agent(
        &self,
        job_id: &str,
        agent_name: &str,
        outcome: AgentOutcome,
        error: Option<String>,
    ) -> Option<ReviewProgress> {
        let progress = {
            let mut all = self.progress.write().await;
            let progress = all.get_mut(job_id)?;
            let agent = progress.agent_mut(agent_name)?;

            agent.status = outcome.status();
            agent.completed_at = Some(Utc::now());
            agent.error = error;
            progress.touch();
            progress.clone()
        };

        tracing::debug!(
            "Agent {} finished for job {} ({:?})",
            agent_name,
            job_id,
            outcome
        );
        self.notify(job_id, &progress).await;
        Some(progress)
    }

    /// Set the review phase. Independent of agent statuses.
    pub async fn set_phase(&self, job_id: &str, phase: ReviewPhase) -> Option<ReviewProgress> {
        let progress = {
            let mut all = self.progress.write().await;
            let progress = all.get_mut(job_id)?;
            progress.current_phase = phase;
            progress.touch();
            progress.clone()
        };

        tracing::debug!("Job {} entered phase {}", job_id, phase);
        self.notify(job_id, &progress).await;
        Some(progress)
    }

    pub async fn get_progress(&self, job_id: &str) -> Option<ReviewProgress> {
        self.progress.read().await.get(job_id).cloned()
    }

    /// Drop a job's progress once its bookkeeping is gone
    pub async fn remove_progress(&self, job_id: &str) -> Option<ReviewProgress> {
        self.progress.write().await.remove(job_id)
    }

    async fn notify(&self, job_id: &str, progress: &ReviewProgress) {
        let observers = self.observers.read().await.clone();
        for observer in observers {
            observer.on_progress_change(job_id, progress).await;
        }
    }
}
