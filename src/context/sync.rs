//! Mirrors in-memory progress into the review context document

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use super::{JobContextRegistry, ReviewContextStore};
use crate::domain::{ContextProgress, ReviewProgress};
use crate::events::{Event, EventBus};
use crate::progress::ProgressObserver;

pub struct ContextSyncBridge {
    store: Arc<dyn ReviewContextStore>,
    registry: Arc<JobContextRegistry>,
    event_bus: Option<EventBus>,
}

impl ContextSyncBridge {
    pub fn new(store: Arc<dyn ReviewContextStore>, registry: Arc<JobContextRegistry>) -> Self {
        Self {
            store,
            registry,
            event_bus: None,
        }
    }

    /// Also publish `ProgressUpdated` after each successful write
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }
}

/// The document's view of a job's progress
pub fn context_progress(progress: &ReviewProgress) -> ContextProgress {
    ContextProgress {
        phase: progress.current_phase,
        current_step: progress.running_agent().map(|a| a.name.clone()),
        steps_completed: progress.finished_agents(),
        updated_at: Utc::now(),
    }
}

#[async_trait]
impl ProgressObserver for ContextSyncBridge {
    async fn on_progress_change(&self, job_id: &str, progress: &ReviewProgress) {
        let Some(entry) = self.registry.get(job_id).await else {
            tracing::debug!("No job context for {}, progress not mirrored", job_id);
            return;
        };

        let snapshot = context_progress(progress);
        match self
            .store
            .update_progress(&entry.local_path, &entry.merge_request_id, snapshot.clone())
            .await
        {
            Ok(()) => {
                if let Some(bus) = &self.event_bus {
                    bus.publish(Event::ProgressUpdated {
                        merge_request_id: entry.merge_request_id,
                        progress: snapshot,
                        timestamp: Utc::now(),
                    });
                }
            }
            Err(e) => {
                tracing::warn!("Failed to mirror progress for job {}: {}", job_id, e);
            }
        }
    }
}
