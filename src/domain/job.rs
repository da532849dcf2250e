//! Review job model and job identity

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Code hosting platform a merge/pull request lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Gitlab,
    Github,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Gitlab => "gitlab",
            Platform::Github => "github",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gitlab" => Ok(Platform::Gitlab),
            "github" => Ok(Platform::Github),
            _ => Err(format!("Unknown platform: {}", s)),
        }
    }
}

/// Whether a job is a first review or a followup on an earlier one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Review,
    Followup,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Review => "review",
            JobType::Followup => "followup",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "review" => Ok(JobType::Review),
            "followup" => Ok(JobType::Followup),
            _ => Err(format!("Unknown job type: {}", s)),
        }
    }
}

/// Kind prefix used when deriving a job id. A review and its followup get
/// different prefixes so they never dedupe against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobKind {
    pub platform: Platform,
    pub job_type: JobType,
}

impl JobKind {
    pub fn new(platform: Platform, job_type: JobType) -> Self {
        Self { platform, job_type }
    }

    pub fn prefix(&self) -> &'static str {
        match (self.platform, self.job_type) {
            (Platform::Gitlab, JobType::Review) => "gitlab",
            (Platform::Github, JobType::Review) => "github",
            (Platform::Gitlab, JobType::Followup) => "gitlab-followup",
            (Platform::Github, JobType::Followup) => "github-followup",
        }
    }
}

/// Derive the dedup key for a job. Pure and deterministic.
pub fn create_job_id(kind_prefix: &str, project_path: &str, number: u64) -> String {
    format!("{}:{}:{}", kind_prefix, project_path, number)
}

/// Who asked for the review, when the job came from an assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedBy {
    pub username: String,
    pub display_name: Option<String>,
}

/// One unit of review or followup work tied to a merge/pull request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub platform: Platform,
    pub project_path: String,
    pub local_path: String,
    pub mr_number: u64,
    pub source_branch: String,
    pub target_branch: String,
    pub job_type: JobType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_by: Option<AssignedBy>,
}

impl Job {
    pub fn new(
        platform: Platform,
        job_type: JobType,
        project_path: impl Into<String>,
        local_path: impl Into<String>,
        mr_number: u64,
    ) -> Self {
        let project_path = project_path.into();
        let id = create_job_id(
            JobKind::new(platform, job_type).prefix(),
            &project_path,
            mr_number,
        );

        Self {
            id,
            platform,
            project_path,
            local_path: local_path.into(),
            mr_number,
            source_branch: String::new(),
            target_branch: String::new(),
            job_type,
            assigned_by: None,
        }
    }

    pub fn with_branches(
        mut self,
        source_branch: impl Into<String>,
        target_branch: impl Into<String>,
    ) -> Self {
        self.source_branch = source_branch.into();
        self.target_branch = target_branch.into();
        self
    }

    pub fn with_assigned_by(mut self, assigned_by: AssignedBy) -> Self {
        self.assigned_by = Some(assigned_by);
        self
    }

    /// Natural key of the job's review context document
    pub fn merge_request_id(&self) -> String {
        format!("{}-{}-{}", self.platform, self.project_path, self.mr_number)
    }

    /// Id of the lifecycle record this job belongs to
    pub fn tracked_mr_id(&self) -> String {
        format!("{}:{}:{}", self.platform, self.project_path, self.mr_number)
    }
}
