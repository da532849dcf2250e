use crate::config::default_followup_agents;
use crate::domain::{
    calculate_overall_progress, AgentDefinition, AgentProgress, AgentStatus, ContextProgress,
    ReviewPhase, ReviewProgress,
};

/// Rebuild a `ReviewProgress` from the progress mirror in a review context.
///
/// Without an agent plan the default followup plan is assumed. A completed
/// phase always reads as 100.
pub fn to_review_progress(
    snapshot: &ContextProgress,
    agents: Option<&[AgentDefinition]>,
) -> ReviewProgress {
    let fallback;
    let plan: &[AgentDefinition] = match agents {
        Some(agents) => agents,
        None => {
            fallback = default_followup_agents();
            &fallback
        }
    };

    let agents: Vec<AgentProgress> = plan
        .iter()
        .map(|definition| {
            let mut agent = AgentProgress::pending(definition);
            if snapshot.steps_completed.contains(&definition.name) {
                agent.status = AgentStatus::Completed;
            } else if snapshot.current_step.as_deref() == Some(definition.name.as_str()) {
                agent.status = AgentStatus::Running;
            }
            agent
        })
        .collect();

    let overall_progress = if snapshot.phase == ReviewPhase::Completed {
        100
    } else {
        calculate_overall_progress(&agents, snapshot.phase)
    };

    ReviewProgress {
        agents,
        current_phase: snapshot.phase,
        overall_progress,
        last_update: snapshot.updated_at,
    }
}
