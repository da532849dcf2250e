//! Review context storage
//!
//! The review context is the document an out-of-process agent and the
//! orchestrator communicate through. Stores expose narrow single-field
//! mutations and serialise read-modify-write per document internally.

mod file;
mod memory;
mod registry;
mod sync;

pub use file::FileContextStore;
pub use memory::MemoryContextStore;
pub use registry::{JobContextEntry, JobContextRegistry, RegistryError};
pub use sync::{context_progress, ContextSyncBridge};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::domain::{ActionKind, ContextProgress, ReviewContext, ReviewContextAction, ReviewResult};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Review context not found: {merge_request_id}")]
    NotFound { merge_request_id: String },

    #[error("Review context I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Review context serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ContextError {
    pub fn not_found(merge_request_id: &str) -> Self {
        ContextError::NotFound {
            merge_request_id: merge_request_id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ContextError::NotFound { .. })
    }
}

/// Published after every successful mutation of a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextChanged {
    pub local_path: PathBuf,
    pub merge_request_id: String,
}

/// Storage for review context documents, keyed by (local path, merge request id)
#[async_trait]
pub trait ReviewContextStore: Send + Sync {
    /// Establish a document. The only operation allowed to create one.
    async fn create(&self, local_path: &Path, context: ReviewContext) -> Result<(), ContextError>;

    /// `Ok(None)` when no document exists
    async fn read(
        &self,
        local_path: &Path,
        merge_request_id: &str,
    ) -> Result<Option<ReviewContext>, ContextError>;

    async fn exists(&self, local_path: &Path, merge_request_id: &str) -> bool;

    /// `Ok(false)` when there was nothing to delete
    async fn delete(&self, local_path: &Path, merge_request_id: &str) -> Result<bool, ContextError>;

    async fn append_action(
        &self,
        local_path: &Path,
        merge_request_id: &str,
        kind: ActionKind,
    ) -> Result<ReviewContextAction, ContextError>;

    async fn update_progress(
        &self,
        local_path: &Path,
        merge_request_id: &str,
        progress: ContextProgress,
    ) -> Result<(), ContextError>;

    async fn set_result(
        &self,
        local_path: &Path,
        merge_request_id: &str,
        result: ReviewResult,
    ) -> Result<(), ContextError>;

    /// In-process change notifications. Writers in other processes are not seen.
    fn subscribe_changes(&self) -> broadcast::Receiver<ContextChanged>;
}

pub(crate) fn change_channel() -> broadcast::Sender<ContextChanged> {
    broadcast::channel(CHANGE_CHANNEL_CAPACITY).0
}

pub(crate) fn publish_change(
    sender: &broadcast::Sender<ContextChanged>,
    local_path: &Path,
    merge_request_id: &str,
) {
    // No receivers is fine
    let _ = sender.send(ContextChanged {
        local_path: local_path.to_path_buf(),
        merge_request_id: merge_request_id.to_string(),
    });
}
