//! Context watcher
//!
//! Polls review context documents and reports progress changes. The agent
//! writes from another process, so polling is the baseline; in-process
//! writers also wake the watcher early through the store's change channel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;

use crate::context::{ContextChanged, ReviewContextStore};
use crate::domain::{ContextProgress, ReviewPhase};

/// Invoked with each newly observed progress value
pub type ProgressCallback = Arc<dyn Fn(ContextProgress) + Send + Sync>;

struct Watch {
    generation: u64,
    task: AbortHandle,
}

type Watches = Arc<Mutex<HashMap<String, Watch>>>;

pub struct ContextWatcher {
    store: Arc<dyn ReviewContextStore>,
    poll_interval: Duration,
    watches: Watches,
    next_generation: AtomicU64,
}

impl ContextWatcher {
    pub fn new(store: Arc<dyn ReviewContextStore>, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
            watches: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Watch one document. Replaces any existing watch on the same id.
    pub fn start(&self, local_path: &Path, merge_request_id: &str, callback: ProgressCallback) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let poller = Poller {
            store: self.store.clone(),
            local_path: local_path.to_path_buf(),
            merge_request_id: merge_request_id.to_string(),
            poll_interval: self.poll_interval,
            callback,
        };
        let watches = self.watches.clone();

        let mut guard = lock(&self.watches);
        if let Some(previous) = guard.remove(merge_request_id) {
            tracing::debug!("Replacing watcher for {}", merge_request_id);
            previous.task.abort();
        }

        let id = merge_request_id.to_string();
        let handle = tokio::spawn(async move {
            poller.run().await;
            let mut guard = lock(&watches);
            if guard.get(&id).is_some_and(|w| w.generation == generation) {
                guard.remove(&id);
            }
        });

        guard.insert(
            merge_request_id.to_string(),
            Watch {
                generation,
                task: handle.abort_handle(),
            },
        );
        tracing::debug!("Watching review context {}", merge_request_id);
    }

    /// `false` if the id was not being watched
    pub fn stop(&self, merge_request_id: &str) -> bool {
        match lock(&self.watches).remove(merge_request_id) {
            Some(watch) => {
                watch.task.abort();
                tracing::debug!("Stopped watching {}", merge_request_id);
                true
            }
            None => false,
        }
    }

    pub fn is_watching(&self, merge_request_id: &str) -> bool {
        lock(&self.watches).contains_key(merge_request_id)
    }

    pub fn stop_all(&self) {
        let mut guard = lock(&self.watches);
        for (_, watch) in guard.drain() {
            watch.task.abort();
        }
    }
}

impl Drop for ContextWatcher {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn lock(watches: &Watches) -> MutexGuard<'_, HashMap<String, Watch>> {
    watches.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Poller {
    store: Arc<dyn ReviewContextStore>,
    local_path: PathBuf,
    merge_request_id: String,
    poll_interval: Duration,
    callback: ProgressCallback,
}

impl Poller {
    async fn run(self) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut changes = Some(self.store.subscribe_changes());
        let mut last_seen: Option<String> = None;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                change = next_change(&mut changes), if changes.is_some() => {
                    match change {
                        Some(c) if self.concerns(&c) => {}
                        Some(_) => continue,
                        None => {}
                    }
                }
            }

            if self.poll(&mut last_seen).await {
                tracing::info!("Review {} completed, watcher stopped", self.merge_request_id);
                return;
            }
        }
    }

    fn concerns(&self, change: &ContextChanged) -> bool {
        change.merge_request_id == self.merge_request_id && change.local_path == self.local_path
    }

    /// Returns true once the document reports the completed phase
    async fn poll(&self, last_seen: &mut Option<String>) -> bool {
        let context = match self
            .store
            .read(&self.local_path, &self.merge_request_id)
            .await
        {
            Ok(Some(context)) => context,
            Ok(None) => {
                tracing::debug!("Review context {} not present yet", self.merge_request_id);
                return false;
            }
            Err(e) => {
                tracing::debug!("Skipping poll of {}: {}", self.merge_request_id, e);
                return false;
            }
        };

        let serialized = match serde_json::to_string(&context.progress) {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!("Cannot serialize progress of {}: {}", self.merge_request_id, e);
                return false;
            }
        };

        if last_seen.as_deref() != Some(serialized.as_str()) {
            *last_seen = Some(serialized);
            (self.callback)(context.progress.clone());
        }

        context.progress.phase == ReviewPhase::Completed
    }
}

/// Next change notification. A lagged receiver reads as a wake-up with no
/// detail; a closed channel disables notifications for this watch.
async fn next_change(
    changes: &mut Option<broadcast::Receiver<ContextChanged>>,
) -> Option<ContextChanged> {
    let receiver = changes.as_mut()?;
    match receiver.recv().await {
        Ok(change) => Some(change),
        Err(broadcast::error::RecvError::Lagged(_)) => None,
        Err(broadcast::error::RecvError::Closed) => {
            *changes = None;
            None
        }
    }
}
