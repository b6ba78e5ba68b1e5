//! Wire representations.
//!
//! Short ids are computed over the set being returned, so the same slot
//! may show a longer `shortId` in a larger listing.

use std::collections::HashMap;

use serde::Serialize;

use flotilla_core::{
    AgentLifecycleState, AgentStatus, MIN_PREFIX_SIZE, Resources, SlotId, SlotLifecycleState,
    SlotStatus, shortest_unique_prefix,
};
use flotilla_coordinator::ExpectedSlotStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotRepresentation {
    pub id: SlotId,
    pub short_id: String,
    pub name: String,
    pub binary: Option<String>,
    pub config: Option<String>,
    #[serde(rename = "self")]
    pub self_uri: String,
    pub external_uri: String,
    pub instance_id: String,
    pub location: String,
    pub status: SlotLifecycleState,
    pub install_path: String,
    pub resources: Resources,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_status: Option<SlotLifecycleState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

impl SlotRepresentation {
    fn new(slot: &SlotStatus, short_len: usize, expected: Option<&ExpectedSlotStatus>) -> Self {
        let id = slot.id.to_string();
        Self {
            id: slot.id,
            short_id: id.chars().take(short_len).collect(),
            name: slot.name.clone(),
            binary: slot.assignment.as_ref().map(|a| a.binary.clone()),
            config: slot.assignment.as_ref().map(|a| a.config.clone()),
            self_uri: slot.self_uri.clone(),
            external_uri: slot.external_uri.clone(),
            instance_id: slot.instance_id.clone(),
            location: slot.location.clone(),
            status: slot.state,
            install_path: slot.install_path.clone(),
            resources: slot.resources.clone(),
            expected_status: expected.map(|e| e.state),
            status_message: expected.and_then(|e| status_message(slot, e)),
        }
    }

    /// Represent a result set, with expectations where recorded.
    pub fn from_slots(slots: &[SlotStatus], expected: &HashMap<SlotId, ExpectedSlotStatus>) -> Vec<Self> {
        let ids: Vec<String> = slots.iter().map(|s| s.id.to_string()).collect();
        let short_len = shortest_unique_prefix(&ids, MIN_PREFIX_SIZE);
        slots
            .iter()
            .map(|s| Self::new(s, short_len, expected.get(&s.id)))
            .collect()
    }
}

fn status_message(slot: &SlotStatus, expected: &ExpectedSlotStatus) -> Option<String> {
    if expected.assignment.is_some() && expected.assignment != slot.assignment {
        let show = |a: &Option<flotilla_core::Assignment>| {
            a.as_ref().map_or_else(|| "none".to_string(), ToString::to_string)
        };
        return Some(format!(
            "Expected assignment to be {} but was {}",
            show(&expected.assignment),
            show(&slot.assignment)
        ));
    }
    if expected.state != slot.state {
        return Some(format!(
            "Expected state to be {} but was {}",
            expected.state, slot.state
        ));
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRepresentation {
    pub agent_id: String,
    pub short_agent_id: String,
    pub state: AgentLifecycleState,
    pub instance_id: String,
    #[serde(rename = "self")]
    pub self_uri: String,
    pub external_uri: String,
    pub location: String,
    pub instance_type: String,
    pub resources: Resources,
    pub slot_count: usize,
}

impl AgentRepresentation {
    pub fn from_agents(agents: &[AgentStatus]) -> Vec<Self> {
        let ids: Vec<&str> = agents.iter().map(|a| a.agent_id.as_str()).collect();
        let short_len = shortest_unique_prefix(&ids, MIN_PREFIX_SIZE);
        agents
            .iter()
            .map(|a| Self {
                agent_id: a.agent_id.clone(),
                short_agent_id: a.agent_id.chars().take(short_len).collect(),
                state: a.state,
                instance_id: a.instance_id.clone(),
                self_uri: a.internal_uri.clone(),
                external_uri: a.external_uri.clone(),
                location: a.location.clone(),
                instance_type: a.instance_type.clone(),
                resources: a.resources.clone(),
                slot_count: a.slots.len(),
            })
            .collect()
    }
}
