//! Runs the external review agent for a job

use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::process::Command;

use crate::config::AgentCommandConfig;
use crate::domain::{Job, JobType};
use crate::queue::JobRunner;

pub const JOB_ID_ENV: &str = "REVIEWMASTER_JOB_ID";
pub const MR_ID_ENV: &str = "REVIEWMASTER_MR_ID";

/// Stderr lines kept in the failure message
const STDERR_TAIL_LINES: usize = 20;

pub struct AgentProcessRunner {
    config: AgentCommandConfig,
    timeout: Duration,
}

impl AgentProcessRunner {
    pub fn new(config: AgentCommandConfig) -> Self {
        let timeout = config.timeout();
        Self { config, timeout }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn prompt(job: &Job) -> String {
        let kind = match job.job_type {
            JobType::Review => "Review",
            JobType::Followup => "Follow up on the review of",
        };
        format!(
            "{} merge request {} in {}. Your job id is {}. \
             Start by calling the get_workflow tool with this jobId and follow its instructions.",
            kind,
            job.mr_number,
            job.project_path,
            job.id
        )
    }

    fn build_command(&self, job: &Job) -> anyhow::Result<Command> {
        let binary = which::which(&self.config.command)
            .with_context(|| format!("Agent command not found: {}", self.config.command))?;

        let mut cmd = Command::new(binary);
        cmd.current_dir(&job.local_path);
        cmd.env(JOB_ID_ENV, &job.id);
        cmd.env(MR_ID_ENV, job.merge_request_id());
        cmd.args(&self.config.args);
        cmd.arg(Self::prompt(job));

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());
        // Cancelling the job drops the run future, which must take the agent with it
        cmd.kill_on_drop(true);

        Ok(cmd)
    }
}

#[async_trait]
impl JobRunner for AgentProcessRunner {
    async fn run(&self, job: Job) -> anyhow::Result<()> {
        let mut cmd = self.build_command(&job)?;
        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn agent for job {}", job.id))?;
        tracing::info!(
            "Agent started for job {} (pid {:?})",
            job.id,
            child.id()
        );

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.context("Failed to wait for agent")?,
            Err(_) => bail!("Agent timed out after {}s", self.timeout.as_secs()),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            bail!("Agent exited with {}: {}", output.status, tail.trim());
        }

        tracing::info!("Agent finished for job {}", job.id);
        Ok(())
    }
}
