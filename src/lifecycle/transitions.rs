//! Transition table for the merge request lifecycle

use crate::domain::MrState::{self, *};

/// Definition of the targets reachable from one state
#[derive(Debug, Clone)]
pub struct TransitionDef {
    pub from: MrState,
    pub to: &'static [MrState],
}

/// One row per state; the only source of lifecycle rules
pub static TRANSITIONS: &[TransitionDef] = &[
    TransitionDef {
        from: PendingReview,
        to: &[PendingFix, PendingApproval, Closed],
    },
    TransitionDef {
        from: PendingFix,
        to: &[PendingReview, PendingApproval, Closed],
    },
    TransitionDef {
        from: PendingApproval,
        to: &[Approved, PendingFix, Closed],
    },
    TransitionDef {
        from: Approved,
        to: &[Merged, Closed],
    },
    TransitionDef { from: Merged, to: &[] },
    TransitionDef { from: Closed, to: &[] },
];

/// Get the allowed targets from a given state
pub fn allowed_targets(state: MrState) -> &'static [MrState] {
    TRANSITIONS
        .iter()
        .find(|def| def.from == state)
        .map(|def| def.to)
        .unwrap_or(&[])
}
