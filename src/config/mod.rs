//! Configuration module for Reviewmaster

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::domain::{AgentDefinition, JobType};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to write config file: {0}")]
    Write(#[from] std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Review queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Context watcher configuration
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Default agent plans per job type
    #[serde(default)]
    pub agents: AgentPlansConfig,

    /// External agent process configuration
    #[serde(default)]
    pub agent: AgentCommandConfig,

    /// Storage locations
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Review queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum jobs running at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Maximum jobs waiting for a slot
    #[serde(default = "default_max_queued")]
    pub max_queued: usize,

    /// Finished jobs kept for status queries
    #[serde(default = "default_recent_history")]
    pub recent_history: usize,
}

fn default_max_concurrent() -> usize {
    2
}

fn default_max_queued() -> usize {
    50
}

fn default_recent_history() -> usize {
    100
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_queued: default_max_queued(),
            recent_history: default_recent_history(),
        }
    }
}

/// Context watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Agent execution plans used when a job does not bring its own
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPlansConfig {
    #[serde(default = "default_review_agents")]
    pub review: Vec<AgentDefinition>,

    #[serde(default = "default_followup_agents")]
    pub followup: Vec<AgentDefinition>,
}

impl Default for AgentPlansConfig {
    fn default() -> Self {
        Self {
            review: default_review_agents(),
            followup: default_followup_agents(),
        }
    }
}

impl AgentPlansConfig {
    pub fn for_job_type(&self, job_type: JobType) -> &[AgentDefinition] {
        match job_type {
            JobType::Review => &self.review,
            JobType::Followup => &self.followup,
        }
    }
}

pub fn default_review_agents() -> Vec<AgentDefinition> {
    vec![
        AgentDefinition::new("clean-architecture", "Clean Architecture"),
        AgentDefinition::new("ddd", "Domain-Driven Design"),
        AgentDefinition::new("react", "React"),
        AgentDefinition::new("solid", "SOLID"),
        AgentDefinition::new("testing", "Testing"),
        AgentDefinition::new("code-quality", "Code Quality"),
        AgentDefinition::new("threads", "Threads"),
        AgentDefinition::new("report", "Report"),
    ]
}

pub fn default_followup_agents() -> Vec<AgentDefinition> {
    vec![
        AgentDefinition::new("context", "Context"),
        AgentDefinition::new("verify", "Verify"),
        AgentDefinition::new("scan", "Scan"),
        AgentDefinition::new("threads", "Threads"),
        AgentDefinition::new("report", "Report"),
    ]
}

/// External agent process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCommandConfig {
    /// Binary to run (looked up on PATH)
    #[serde(default = "default_agent_command")]
    pub command: String,

    /// Arguments passed before the prompt
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,

    /// Kill the agent after this many seconds
    #[serde(default = "default_agent_timeout")]
    pub timeout_seconds: u64,
}

fn default_agent_command() -> String {
    "claude".to_string()
}

fn default_agent_args() -> Vec<String> {
    vec!["-p".to_string()]
}

fn default_agent_timeout() -> u64 {
    3600
}

impl AgentCommandConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for AgentCommandConfig {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            args: default_agent_args(),
            timeout_seconds: default_agent_timeout(),
        }
    }
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Where the job context registry lives (defaults to the platform data dir)
    pub data_dir: Option<String>,

    /// Review context directory, relative to each project's local path
    #[serde(default = "default_context_dir_name")]
    pub context_dir_name: String,
}

fn default_context_dir_name() -> String {
    ".reviewmaster/contexts".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            context_dir_name: default_context_dir_name(),
        }
    }
}

impl StorageConfig {
    pub fn get_data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(path) => PathBuf::from(path),
            None => get_data_dir(),
        }
    }

    pub fn registry_path(&self) -> PathBuf {
        self.get_data_dir().join("job-contexts.json")
    }
}

/// Get the data directory for Reviewmaster
pub fn get_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("reviewmaster"))
        .or_else(|| dirs::home_dir().map(|h| h.join(".reviewmaster")))
        .unwrap_or_else(|| PathBuf::from(".reviewmaster"))
}

/// Get the config directory for Reviewmaster
pub fn get_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("reviewmaster"))
        .unwrap_or_else(get_data_dir)
}

pub fn default_config_path() -> PathBuf {
    get_config_dir().join("config.toml")
}

/// Load configuration from a specific file
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load configuration from file or defaults
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        return Config::default();
    }

    match load_config_from(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("{}; falling back to defaults", e);
            Config::default()
        }
    }
}

/// Save configuration to file
pub fn save_config(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.queue.max_concurrent, 2);
        assert_eq!(config.watcher.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.agents.followup.len(), 5);
        assert_eq!(config.storage.context_dir_name, ".reviewmaster/contexts");
    }

    #[test]
    fn test_followup_plan_order() {
        let names: Vec<_> = default_followup_agents().into_iter().map(|a| a.name).collect();
        assert_eq!(names, ["context", "verify", "scan", "threads", "report"]);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [queue]
            max_concurrent = 4

            [watcher]
            poll_interval_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.max_concurrent, 4);
        assert_eq!(config.queue.max_queued, 50);
        assert_eq!(config.watcher.poll_interval_ms, 250);
        assert_eq!(config.agent.command, "claude");
        assert_eq!(config.agents.review.len(), 8);
    }

    #[test]
    fn test_custom_agent_plan() {
        let config: Config = toml::from_str(
            r#"
            [[agents.followup]]
            name = "verify"
            displayName = "Verify"
            "#,
        )
        .unwrap();

        assert_eq!(config.agents.for_job_type(JobType::Followup).len(), 1);
        assert_eq!(config.agents.for_job_type(JobType::Review).len(), 8);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.queue.max_concurrent = 7;
        save_config(&config, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.queue.max_concurrent, 7);
    }

    #[test]
    fn test_malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "queue = [not toml").unwrap();

        assert!(matches!(load_config_from(&path), Err(ConfigError::Parse { .. })));
        assert_eq!(load_config(Some(&path)).queue.max_concurrent, 2);
    }
}
