//! JSON file per review context, under the project's local checkout

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};

use super::{change_channel, publish_change, ContextChanged, ContextError, ReviewContextStore};
use crate::domain::{ActionKind, ContextProgress, ReviewContext, ReviewContextAction, ReviewResult};

pub struct FileContextStore {
    context_dir_name: PathBuf,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    changes: broadcast::Sender<ContextChanged>,
}

impl FileContextStore {
    /// `context_dir_name` is relative to each local path
    pub fn new(context_dir_name: impl Into<PathBuf>) -> Self {
        Self {
            context_dir_name: context_dir_name.into(),
            locks: Mutex::new(HashMap::new()),
            changes: change_channel(),
        }
    }

    pub fn context_path(&self, local_path: &Path, merge_request_id: &str) -> PathBuf {
        local_path
            .join(&self.context_dir_name)
            .join(file_name_for(merge_request_id))
    }

    async fn key_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(path.to_path_buf())
            .or_default()
            .clone()
    }

    /// Read-modify-write one document while holding its key lock
    async fn mutate<T, F>(
        &self,
        local_path: &Path,
        merge_request_id: &str,
        apply: F,
    ) -> Result<T, ContextError>
    where
        F: FnOnce(&mut ReviewContext) -> T + Send,
        T: Send,
    {
        let path = self.context_path(local_path, merge_request_id);
        let lock = self.key_lock(&path).await;
        let guard = lock.lock().await;

        let mut context = load(&path)
            .await?
            .ok_or_else(|| ContextError::not_found(merge_request_id))?;
        let output = apply(&mut context);
        write_atomic(&path, &context).await?;

        drop(guard);
        publish_change(&self.changes, local_path, merge_request_id);
        Ok(output)
    }
}

#[async_trait]
impl ReviewContextStore for FileContextStore {
    async fn create(&self, local_path: &Path, context: ReviewContext) -> Result<(), ContextError> {
        let merge_request_id = context.merge_request_id.clone();
        let path = self.context_path(local_path, &merge_request_id);
        let lock = self.key_lock(&path).await;
        let guard = lock.lock().await;

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::warn!(
                "Overwriting stale review context {} at {}",
                merge_request_id,
                path.display()
            );
        }
        write_atomic(&path, &context).await?;

        drop(guard);
        tracing::debug!("Created review context {} at {}", merge_request_id, path.display());
        publish_change(&self.changes, local_path, &merge_request_id);
        Ok(())
    }

    async fn read(
        &self,
        local_path: &Path,
        merge_request_id: &str,
    ) -> Result<Option<ReviewContext>, ContextError> {
        load(&self.context_path(local_path, merge_request_id)).await
    }

    async fn exists(&self, local_path: &Path, merge_request_id: &str) -> bool {
        tokio::fs::try_exists(self.context_path(local_path, merge_request_id))
            .await
            .unwrap_or(false)
    }

    async fn delete(&self, local_path: &Path, merge_request_id: &str) -> Result<bool, ContextError> {
        let path = self.context_path(local_path, merge_request_id);
        let lock = self.key_lock(&path).await;
        let guard = lock.lock().await;

        let removed = match tokio::fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        drop(guard);
        let mut locks = self.locks.lock().await;
        // the map and this call are the only holders
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&path);
        }
        drop(locks);
        if removed {
            publish_change(&self.changes, local_path, merge_request_id);
        }
        Ok(removed)
    }

    async fn append_action(
        &self,
        local_path: &Path,
        merge_request_id: &str,
        kind: ActionKind,
    ) -> Result<ReviewContextAction, ContextError> {
        self.mutate(local_path, merge_request_id, move |context| {
            let action = ReviewContextAction::new(kind);
            context.actions.push(action.clone());
            action
        })
        .await
    }

    async fn update_progress(
        &self,
        local_path: &Path,
        merge_request_id: &str,
        progress: ContextProgress,
    ) -> Result<(), ContextError> {
        self.mutate(local_path, merge_request_id, move |context| {
            context.progress = progress;
        })
        .await
    }

    async fn set_result(
        &self,
        local_path: &Path,
        merge_request_id: &str,
        result: ReviewResult,
    ) -> Result<(), ContextError> {
        self.mutate(local_path, merge_request_id, move |context| {
            context.result = Some(result);
        })
        .await
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<ContextChanged> {
        self.changes.subscribe()
    }
}

/// Merge request ids contain `/` from the project path. Percent-encoding
/// keeps distinct ids on distinct files.
fn file_name_for(merge_request_id: &str) -> String {
    format!("{}.json", urlencoding::encode(merge_request_id))
}

async fn load(path: &Path) -> Result<Option<ReviewContext>, ContextError> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Readers in other processes never observe a half-written document
async fn write_atomic(path: &Path, context: &ReviewContext) -> Result<(), ContextError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let bytes = serde_json::to_vec_pretty(context)?;
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}
