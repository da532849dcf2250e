//! Job id to review context lookup
//!
//! The orchestrator registers a job before its agent starts. The tool server
//! runs in the agent's process tree, so a durable registry is re-read from
//! disk whenever a lookup misses.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to access job context registry {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse job context registry {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to serialize job context registry: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Where a job's review context lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobContextEntry {
    pub local_path: PathBuf,
    pub merge_request_id: String,
}

impl JobContextEntry {
    pub fn new(local_path: impl Into<PathBuf>, merge_request_id: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            merge_request_id: merge_request_id.into(),
        }
    }
}

pub struct JobContextRegistry {
    entries: RwLock<HashMap<String, JobContextEntry>>,
    path: Option<PathBuf>,
}

impl JobContextRegistry {
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            path: None,
        }
    }

    /// Registry backed by a JSON file. A missing file starts empty.
    pub async fn durable(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let entries = read_file(&path).await?;
        tracing::debug!(
            "Loaded {} job context entries from {}",
            entries.len(),
            path.display()
        );

        Ok(Self {
            entries: RwLock::new(entries),
            path: Some(path),
        })
    }

    pub async fn register(&self, job_id: &str, entry: JobContextEntry) -> Result<(), RegistryError> {
        let mut entries = self.entries.write().await;
        entries.insert(job_id.to_string(), entry);
        self.persist(&entries).await
    }

    pub async fn get(&self, job_id: &str) -> Option<JobContextEntry> {
        if let Some(entry) = self.entries.read().await.get(job_id) {
            return Some(entry.clone());
        }

        let path = self.path.as_ref()?;
        match read_file(path).await {
            Ok(fresh) => {
                let mut entries = self.entries.write().await;
                *entries = fresh;
                entries.get(job_id).cloned()
            }
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        }
    }

    pub async fn remove(&self, job_id: &str) -> Result<Option<JobContextEntry>, RegistryError> {
        let mut entries = self.entries.write().await;
        let removed = entries.remove(job_id);
        if removed.is_some() {
            self.persist(&entries).await?;
        }
        Ok(removed)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn persist(&self, entries: &HashMap<String, JobContextEntry>) -> Result<(), RegistryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let io_err = |source: std::io::Error| RegistryError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let bytes = serde_json::to_vec_pretty(entries)?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp_path, path).await.map_err(io_err)?;
        Ok(())
    }
}

async fn read_file(path: &Path) -> Result<HashMap<String, JobContextEntry>, RegistryError> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(source) => {
            return Err(RegistryError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&contents).map_err(|source| RegistryError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
