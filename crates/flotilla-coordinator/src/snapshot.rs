//! Immutable view of the fleet.
//!
//! A [`Snapshot`] is never mutated after it is published. Changes build a
//! new snapshot from the old one and swap it in whole, so a reader holding
//! an `Arc<Snapshot>` always sees one consistent fleet.

use std::time::{Duration, Instant};

use flotilla_core::{AgentStatus, Instance, SlotFilter, SlotId, SlotStatus};

/// One agent as last observed, with the instance that backs it.
#[derive(Debug, Clone)]
pub struct AgentEntry {
    pub instance: Instance,
    pub status: AgentStatus,
    /// When the agent last answered a status call, if ever.
    pub last_seen: Option<Instant>,
}

impl AgentEntry {
    /// The status as it should be reported at `now`: an online agent not
    /// heard from within `expiration` is shown OFFLINE.
    pub fn effective_status(&self, now: Instant, expiration: Duration) -> AgentStatus {
        let fresh = self
            .last_seen
            .is_some_and(|seen| now.saturating_duration_since(seen) <= expiration);
        if self.status.is_online() && !fresh {
            self.status.offline()
        } else {
            self.status.clone()
        }
    }
}

/// Agents in provisioner order, each with its slots in agent order.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    agents: Vec<AgentEntry>,
}

impl Snapshot {
    pub fn new(agents: Vec<AgentEntry>) -> Self {
        Self { agents }
    }

    pub fn entries(&self) -> &[AgentEntry] {
        &self.agents
    }

    pub fn entry(&self, instance_id: &str) -> Option<&AgentEntry> {
        self.agents.iter().find(|e| e.instance.id == instance_id)
    }

    pub fn entry_by_agent_id(&self, agent_id: &str) -> Option<&AgentEntry> {
        self.agents.iter().find(|e| e.status.agent_id == agent_id)
    }

    /// Agent statuses with expiration applied.
    pub fn agents(&self, now: Instant, expiration: Duration) -> Vec<AgentStatus> {
        self.agents
            .iter()
            .map(|e| e.effective_status(now, expiration))
            .collect()
    }

    /// Matching slots, paired with the instance hosting each.
    pub fn slots<'a>(&'a self, filter: &'a SlotFilter) -> impl Iterator<Item = (&'a Instance, &'a SlotStatus)> {
        self.agents.iter().flat_map(move |e| {
            e.status
                .slots
                .iter()
                .filter(move |s| filter.matches(s))
                .map(move |s| (&e.instance, s))
        })
    }

    /// Copy with `slot` inserted into (or replaced on) an agent.
    pub fn with_slot(&self, instance_id: &str, slot: SlotStatus) -> Snapshot {
        let mut next = self.clone();
        if let Some(entry) = next.agents.iter_mut().find(|e| e.instance.id == instance_id) {
            match entry.status.slots.iter_mut().find(|s| s.id == slot.id) {
                Some(existing) => *existing = slot,
                None => entry.status.slots.push(slot),
            }
        }
        next
    }

    /// Copy with a slot removed wherever it appears.
    pub fn without_slot(&self, slot_id: SlotId) -> Snapshot {
        let mut next = self.clone();
        for entry in &mut next.agents {
            entry.status.slots.retain(|s| s.id != slot_id);
        }
        next
    }

    /// Copy without the agent backed by `instance_id`.
    pub fn without_agent(&self, instance_id: &str) -> Snapshot {
        let mut next = self.clone();
        next.agents.retain(|e| e.instance.id != instance_id);
        next
    }
}
