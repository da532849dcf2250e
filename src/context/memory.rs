use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use super::{change_channel, publish_change, ContextChanged, ContextError, ReviewContextStore};
use crate::domain::{ActionKind, ContextProgress, ReviewContext, ReviewContextAction, ReviewResult};

type Key = (PathBuf, String);

/// In-process review context store
pub struct MemoryContextStore {
    documents: RwLock<HashMap<Key, ReviewContext>>,
    changes: broadcast::Sender<ContextChanged>,
}

impl Default for MemoryContextStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryContextStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            changes: change_channel(),
        }
    }

    fn key(local_path: &Path, merge_request_id: &str) -> Key {
        (local_path.to_path_buf(), merge_request_id.to_string())
    }

    async fn mutate<T>(
        &self,
        local_path: &Path,
        merge_request_id: &str,
        apply: impl FnOnce(&mut ReviewContext) -> T + Send,
    ) -> Result<T, ContextError> {
        let output = {
            let mut documents = self.documents.write().await;
            let context = documents
                .get_mut(&Self::key(local_path, merge_request_id))
                .ok_or_else(|| ContextError::not_found(merge_request_id))?;
            apply(context)
        };

        publish_change(&self.changes, local_path, merge_request_id);
        Ok(output)
    }
}

#[async_trait]
impl ReviewContextStore for MemoryContextStore {
    async fn create(&self, local_path: &Path, context: ReviewContext) -> Result<(), ContextError> {
        let merge_request_id = context.merge_request_id.clone();
        let previous = self
            .documents
            .write()
            .await
            .insert(Self::key(local_path, &merge_request_id), context);

        if previous.is_some() {
            tracing::warn!("Overwriting stale review context {}", merge_request_id);
        }
        publish_change(&self.changes, local_path, &merge_request_id);
        Ok(())
    }

    async fn read(
        &self,
        local_path: &Path,
        merge_request_id: &str,
    ) -> Result<Option<ReviewContext>, ContextError> {
        Ok(self
            .documents
            .read()
            .await
            .get(&Self::key(local_path, merge_request_id))
            .cloned())
    }

    async fn exists(&self, local_path: &Path, merge_request_id: &str) -> bool {
        self.documents
            .read()
            .await
            .contains_key(&Self::key(local_path, merge_request_id))
    }

    async fn delete(&self, local_path: &Path, merge_request_id: &str) -> Result<bool, ContextError> {
        let removed = self
            .documents
            .write()
            .await
            .remove(&Self::key(local_path, merge_request_id))
            .is_some();

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Platform, ReviewPhase};

    #[tokio::test]
    async fn test_documents_are_keyed_by_path_and_id() {
        let store = MemoryContextStore::new();
        let ctx = ReviewContext::new("github-o/r-1", Platform::Github, "o/r", 1);

        store.create(Path::new("/work/a"), ctx.clone()).await.unwrap();
        assert!(store.exists(Path::new("/work/a"), "github-o/r-1").await);
        assert!(!store.exists(Path::new("/work/b"), "github-o/r-1").await);
    }

    #[tokio::test]
    async fn test_update_progress_and_missing_document() {
        let store = MemoryContextStore::new();
        let root = Path::new("/work");
        store
            .create(root, ReviewContext::new("gitlab-g/p-2", Platform::Gitlab, "g/p", 2))
            .await
            .unwrap();

        let mut progress = ContextProgress::initial();
        progress.phase = ReviewPhase::Publishing;
        store.update_progress(root, "gitlab-g/p-2", progress).await.unwrap();
        let read = store.read(root, "gitlab-g/p-2").await.unwrap().unwrap();
        assert_eq!(read.progress.phase, ReviewPhase::Publishing);

        let err = store
            .set_result(
                root,
                "gitlab-g/p-3",
                ReviewResult {
                    blocking: 1,
                    warnings: 0,
                    suggestions: 0,
                    score: 3.0,
                    verdict: "changes requested".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_notifies_only_when_removed() {
        let store = MemoryContextStore::new();
        let root = Path::new("/work");
        let mut changes = store.subscribe_changes();

        assert!(!store.delete(root, "nothing").await.unwrap());
        assert!(changes.try_recv().is_err());

        store
            .create(root, ReviewContext::new("x", Platform::Gitlab, "g/p", 1))
            .await
            .unwrap();
        assert!(store.delete(root, "x").await.unwrap());
        assert_eq!(changes.try_recv().unwrap().merge_request_id, "x");
        assert_eq!(changes.try_recv().unwrap().merge_request_id, "x");
    }
}
