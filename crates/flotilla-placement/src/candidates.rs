//! Candidate selection for installs.

use flotilla_core::{AgentFilter, AgentStatus};

/// Online agents matching `filter`, ordered by agent id.
///
/// Ordering by id keeps placement reproducible across runs regardless of
/// the order the provisioner reported instances in.
pub fn select_candidates<'a>(agents: &'a [AgentStatus], filter: &AgentFilter) -> Vec<&'a AgentStatus> {
    let mut candidates: Vec<&AgentStatus> = agents
        .iter()
        .filter(|a| a.is_online() && filter.matches(a))
        .collect();
    candidates.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
    candidates
}
