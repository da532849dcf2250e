//! Lifecycle record of a merge/pull request

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{MrState, Platform, ReviewResult};

use super::machine::{LifecycleState, TransitionError};

/// A score recorded after one review cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEntry {
    pub score: f64,
    pub blocking: u32,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedMr {
    pub id: String,
    pub platform: Platform,
    pub project_path: String,
    pub mr_number: u64,
    pub state: LifecycleState,
    pub open_threads: u32,
    pub total_threads: u32,
    pub score_history: Vec<ScoreEntry>,
    pub last_review_at: Option<DateTime<Utc>>,
}

impl TrackedMr {
    pub fn new(platform: Platform, project_path: impl Into<String>, mr_number: u64) -> Self {
        let project_path = project_path.into();
        Self {
            id: format!("{}:{}:{}", platform, project_path, mr_number),
            platform,
            project_path,
            mr_number,
            state: LifecycleState::default(),
            open_threads: 0,
            total_threads: 0,
            score_history: Vec::new(),
            last_review_at: None,
        }
    }

    pub fn current_state(&self) -> MrState {
        self.state.state()
    }

    pub fn transition_to(&self, target: MrState) -> Result<TrackedMr, TransitionError> {
        let state = self.state.transition_to(target)?;
        Ok(TrackedMr {
            state,
            ..self.clone()
        })
    }

    /// Fold a finished review into the record.
    ///
    /// Blocking issues send the request back to `pending-fix`, anything else
    /// moves it to `pending-approval`. Already being in the target state is
    /// not an error.
    pub fn apply_review(
        &self,
        result: &ReviewResult,
        open_threads: u32,
        total_threads: u32,
    ) -> Result<TrackedMr, TransitionError> {
        let target = if result.has_blocking() {
            MrState::PendingFix
        } else {
            MrState::PendingApproval
        };

        let mut next = if self.current_state() == target {
            self.clone()
        } else {
            self.transition_to(target)?
        };

        let now = Utc::now();
        next.score_history.push(ScoreEntry {
            score: result.score,
            blocking: result.blocking,
            recorded_at: now,
        });
        next.open_threads = open_threads;
        next.total_threads = total_threads;
        next.last_review_at = Some(now);

        Ok(next)
    }

    pub fn latest_score(&self) -> Option<f64> {
        self.score_history.last().map(|s| s.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(blocking: u32, score: f64) -> ReviewResult {
        ReviewResult {
            blocking,
            warnings: 1,
            suggestions: 2,
            score,
            verdict: if blocking > 0 { "changes-requested" } else { "approve" }.to_string(),
        }
    }

    #[test]
    fn test_new_tracked_mr_is_pending_review() {
        let mr = TrackedMr::new(Platform::Gitlab, "g/p", 9);
        assert_eq!(mr.id, "gitlab:g/p:9");
        assert_eq!(mr.current_state(), MrState::PendingReview);
    }

    #[test]
    fn test_blocking_review_goes_to_pending_fix() {
        let mr = TrackedMr::new(Platform::Gitlab, "g/p", 9);
        let next = mr.apply_review(&result(2, 4.5), 3, 5).unwrap();

        assert_eq!(next.current_state(), MrState::PendingFix);
        assert_eq!(next.open_threads, 3);
        assert_eq!(next.total_threads, 5);
        assert_eq!(next.latest_score(), Some(4.5));
        assert!(next.last_review_at.is_some());
        // transitions never mutate in place
        assert_eq!(mr.current_state(), MrState::PendingReview);
        assert!(mr.score_history.is_empty());
    }

    #[test]
    fn test_clean_followup_goes_to_pending_approval() {
        let mr = TrackedMr::new(Platform::Github, "o/r", 1)
            .apply_review(&result(1, 5.0), 1, 1)
            .unwrap()
            .apply_review(&result(0, 8.5), 0, 1)
            .unwrap();

        assert_eq!(mr.current_state(), MrState::PendingApproval);
        assert_eq!(mr.score_history.len(), 2);
        assert_eq!(mr.latest_score(), Some(8.5));
    }

    #[test]
    fn test_repeated_review_in_same_state_is_allowed() {
        let mr = TrackedMr::new(Platform::Github, "o/r", 1)
            .apply_review(&result(1, 5.0), 1, 1)
            .unwrap()
            .apply_review(&result(3, 3.0), 2, 2)
            .unwrap();
        assert_eq!(mr.current_state(), MrState::PendingFix);
    }

    #[test]
    fn test_review_on_merged_mr_is_rejected() {
        let mr = TrackedMr::new(Platform::Github, "o/r", 1)
            .transition_to(MrState::PendingApproval)
            .and_then(|m| m.transition_to(MrState::Approved))
            .and_then(|m| m.transition_to(MrState::Merged))
            .unwrap();

        let err = mr.apply_review(&result(0, 9.0), 0, 0).unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { from: MrState::Merged, .. }));
    }
}
