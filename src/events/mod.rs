//! Event bus for pub/sub communication between components

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::{ContextProgress, MrState};

/// Event types that can be published
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Job accepted into the queue
    JobQueued {
        job_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Job got a concurrency slot
    JobStarted {
        job_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Work unit finished successfully
    JobCompleted {
        job_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Work unit returned an error
    JobFailed {
        job_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Job removed from active bookkeeping by a caller
    JobCancelled {
        job_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Review context progress changed
    ProgressUpdated {
        merge_request_id: String,
        progress: ContextProgress,
        timestamp: DateTime<Utc>,
    },

    /// Tracked merge request moved to a new lifecycle state
    MrStateChanged {
        mr_id: String,
        from_state: MrState,
        to_state: MrState,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// Get the job ID associated with this event
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Event::JobQueued { job_id, .. }
            | Event::JobStarted { job_id, .. }
            | Event::JobCompleted { job_id, .. }
            | Event::JobFailed { job_id, .. }
            | Event::JobCancelled { job_id, .. } => Some(job_id),
            Event::ProgressUpdated { .. } | Event::MrStateChanged { .. } => None,
        }
    }
}

/// Event bus for pub/sub communication
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }

    /// Publish an event
    pub fn publish(&self, event: Event) {
        // Ignore errors if there are no receivers
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
