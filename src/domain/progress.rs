//! Agent and review progress model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of one named review agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Pending => "pending",
            AgentStatus::Running => "running",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
        }
    }

    /// Completed or failed: the agent will not run again
    pub fn is_finished(&self) -> bool {
        matches!(self, AgentStatus::Completed | AgentStatus::Failed)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse review lifecycle stage, independent of individual agents.
///
/// Variants are declared in lifecycle order so `Ord` follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewPhase {
    Initializing,
    AgentsRunning,
    Synthesizing,
    Publishing,
    Completed,
}

impl ReviewPhase {
    pub const ALL: [ReviewPhase; 5] = [
        ReviewPhase::Initializing,
        ReviewPhase::AgentsRunning,
        ReviewPhase::Synthesizing,
        ReviewPhase::Publishing,
        ReviewPhase::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewPhase::Initializing => "initializing",
            ReviewPhase::AgentsRunning => "agents-running",
            ReviewPhase::Synthesizing => "synthesizing",
            ReviewPhase::Publishing => "publishing",
            ReviewPhase::Completed => "completed",
        }
    }

    /// Fixed additive bonus this phase contributes to overall progress
    pub fn progress_bonus(&self) -> f64 {
        match self {
            ReviewPhase::Initializing => 0.0,
            ReviewPhase::AgentsRunning => 5.0,
            ReviewPhase::Synthesizing => 10.0,
            ReviewPhase::Publishing => 15.0,
            ReviewPhase::Completed => 20.0,
        }
    }
}

impl fmt::Display for ReviewPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ReviewPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(ReviewPhase::Initializing),
            "agents-running" => Ok(ReviewPhase::AgentsRunning),
            "synthesizing" => Ok(ReviewPhase::Synthesizing),
            "publishing" => Ok(ReviewPhase::Publishing),
            "completed" => Ok(ReviewPhase::Completed),
            _ => Err(format!("Unknown review phase: {}", s)),
        }
    }
}

/// An entry in an agent execution plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    pub name: String,
    pub display_name: String,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
        }
    }
}

/// Progress of one agent within a review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProgress {
    pub name: String,
    pub display_name: String,
    pub status: AgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentProgress {
    pub fn pending(definition: &AgentDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            display_name: definition.display_name.clone(),
            status: AgentStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// Progress of a whole review job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewProgress {
    pub agents: Vec<AgentProgress>,
    pub current_phase: ReviewPhase,
    pub overall_progress: u8,
    pub last_update: DateTime<Utc>,
}

impl ReviewProgress {
    pub fn new(agents: &[AgentDefinition]) -> Self {
        Self {
            agents: agents.iter().map(AgentProgress::pending).collect(),
            current_phase: ReviewPhase::Initializing,
            overall_progress: 0,
            last_update: Utc::now(),
        }
    }

    pub fn agent(&self, name: &str) -> Option<&AgentProgress> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn agent_mut(&mut self, name: &str) -> Option<&mut AgentProgress> {
        self.agents.iter_mut().find(|a| a.name == name)
    }

    /// First agent currently running, in plan order
    pub fn running_agent(&self) -> Option<&AgentProgress> {
        self.agents.iter().find(|a| a.status == AgentStatus::Running)
    }

    /// Names of agents that are completed or failed, in plan order
    pub fn finished_agents(&self) -> Vec<String> {
        self.agents
            .iter()
            .filter(|a| a.status.is_finished())
            .map(|a| a.name.clone())
            .collect()
    }

    /// Recompute the derived fields after a mutation
    pub fn touch(&mut self) {
        self.overall_progress = calculate_overall_progress(&self.agents, self.current_phase);
        self.last_update = Utc::now();
    }
}

/// Overall 0-100 progress of a review.
///
/// Agents contribute up to 80 points (running counts half), the phase adds a
/// fixed bonus of up to 20. No agents means 0 regardless of phase.
pub fn calculate_overall_progress(agents: &[AgentProgress], phase: ReviewPhase) -> u8 {
    if agents.is_empty() {
        return 0;
    }

    let total = agents.len() as f64;
    let finished = agents.iter().filter(|a| a.status.is_finished()).count() as f64;
    let running = agents
        .iter()
        .filter(|a| a.status == AgentStatus::Running)
        .count() as f64;

    let agent_share = ((finished + running * 0.5) / total) * 80.0;
    let overall = (agent_share + phase.progress_bonus()).round();

    overall.clamp(0.0, 100.0) as u8
}
