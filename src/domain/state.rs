//! Merge request lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The lifecycle states a tracked merge/pull request can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MrState {
    PendingReview,
    PendingFix,
    PendingApproval,
    Approved,
    // Terminal States
    Merged,
    Closed,
}

impl MrState {
    pub const ALL: [MrState; 6] = [
        MrState::PendingReview,
        MrState::PendingFix,
        MrState::PendingApproval,
        MrState::Approved,
        MrState::Merged,
        MrState::Closed,
    ];

    /// Returns whether this state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, MrState::Merged | MrState::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MrState::PendingReview => "pending-review",
            MrState::PendingFix => "pending-fix",
            MrState::PendingApproval => "pending-approval",
            MrState::Approved => "approved",
            MrState::Merged => "merged",
            MrState::Closed => "closed",
        }
    }
}

impl fmt::Display for MrState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MrState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending-review" => Ok(MrState::PendingReview),
            "pending-fix" => Ok(MrState::PendingFix),
            "pending-approval" => Ok(MrState::PendingApproval),
            "approved" => Ok(MrState::Approved),
            "merged" => Ok(MrState::Merged),
            "closed" => Ok(MrState::Closed),
            _ => Err(format!("Unknown merge request state: {}", s)),
        }
    }
}
