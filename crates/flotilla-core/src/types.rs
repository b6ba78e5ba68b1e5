//! Domain types for the Flotilla coordinator.
//!
//! These types describe the observed state of agents and the slots they
//! host. All of them round-trip through JSON: the same shapes are spoken
//! by remote agents and persisted by the state manager.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Stable identity of an agent, independent of its backing instance.
pub type AgentId = String;

/// Provider-assigned identifier of a compute instance.
pub type InstanceId = String;

/// Globally unique identifier of a slot.
pub type SlotId = Uuid;

// ── Instance ───────────────────────────────────────────────────────

/// A provisioned compute handle backing an agent or a coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: InstanceId,
    /// Opaque zone/region descriptor.
    pub location: String,
    pub internal_uri: String,
    /// Equal to `internal_uri` when the instance has no public address.
    pub external_uri: String,
}

impl Instance {
    /// Build an instance, falling back to the internal URI when there is
    /// no external address.
    pub fn new(
        id: impl Into<String>,
        location: impl Into<String>,
        internal_uri: impl Into<String>,
        external_uri: Option<String>,
    ) -> Self {
        let internal_uri = internal_uri.into();
        let external_uri = external_uri.unwrap_or_else(|| internal_uri.clone());
        Self {
            id: id.into(),
            location: location.into(),
            internal_uri,
            external_uri,
        }
    }
}

/// Role a provisioned instance plays in the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceRole {
    Agent,
    Coordinator,
}

impl fmt::Display for InstanceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceRole::Agent => f.write_str("agent"),
            InstanceRole::Coordinator => f.write_str("coordinator"),
        }
    }
}

impl FromStr for InstanceRole {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "agent" => Ok(InstanceRole::Agent),
            "coordinator" => Ok(InstanceRole::Coordinator),
            _ => Err(CoreError::InvalidRole(s.to_string())),
        }
    }
}

// ── Resources ──────────────────────────────────────────────────────

/// Named resource quantities, e.g. `{cpu: 8, memory: 1024}`.
///
/// Dimensions are open-ended. A key that is absent counts as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resources(BTreeMap<String, u64>);

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, name: impl Into<String>, quantity: u64) -> Self {
        self.0.insert(name.into(), quantity);
        self
    }

    /// Quantity for `name`, zero when absent.
    pub fn get(&self, name: &str) -> u64 {
        self.0.get(name).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|&q| q == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, &v)| (k.as_str(), v))
    }

    /// True when every dimension of `self` is covered by `available`.
    pub fn fits_within(&self, available: &Resources) -> bool {
        self.0.iter().all(|(name, &qty)| available.get(name) >= qty)
    }

    /// Add `other` dimension-wise.
    pub fn add(&mut self, other: &Resources) {
        for (name, &qty) in &other.0 {
            let entry = self.0.entry(name.clone()).or_insert(0);
            *entry = entry.saturating_add(qty);
        }
    }

    /// Subtract `other` dimension-wise, clamping at zero.
    ///
    /// Only the dimensions of `self` are kept.
    pub fn saturating_sub(&self, other: &Resources) -> Resources {
        Resources(
            self.0
                .iter()
                .map(|(name, &qty)| (name.clone(), qty.saturating_sub(other.get(name))))
                .collect(),
        )
    }

    /// Dimension-wise sum of many resource maps.
    pub fn sum<'a>(items: impl IntoIterator<Item = &'a Resources>) -> Resources {
        let mut total = Resources::new();
        for r in items {
            total.add(r);
        }
        total
    }
}

impl FromIterator<(String, u64)> for Resources {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Resources(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[(&str, u64); N]> for Resources {
    fn from(entries: [(&str, u64); N]) -> Self {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, qty)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {qty}")?;
        }
        f.write_str("}")
    }
}

// ── Assignment ─────────────────────────────────────────────────────

/// What a slot runs: a binary coordinate plus a config coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignment {
    pub binary: String,
    pub config: String,
}

impl Assignment {
    pub fn new(binary: impl Into<String>, config: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            config: config.into(),
        }
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.binary, self.config)
    }
}

// ── Slot ───────────────────────────────────────────────────────────

/// Last observed lifecycle state of a slot. Owned by the remote agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotLifecycleState {
    Stopped,
    Running,
    Restarting,
    Killing,
    Unknown,
}

impl fmt::Display for SlotLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotLifecycleState::Stopped => "STOPPED",
            SlotLifecycleState::Running => "RUNNING",
            SlotLifecycleState::Restarting => "RESTARTING",
            SlotLifecycleState::Killing => "KILLING",
            SlotLifecycleState::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

impl FromStr for SlotLifecycleState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stopped" | "s" => Ok(SlotLifecycleState::Stopped),
            "running" | "r" => Ok(SlotLifecycleState::Running),
            "restarting" => Ok(SlotLifecycleState::Restarting),
            "killing" => Ok(SlotLifecycleState::Killing),
            "unknown" => Ok(SlotLifecycleState::Unknown),
            _ => Err(CoreError::InvalidSlotState(s.to_string())),
        }
    }
}

/// A transition the coordinator may request from an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotAction {
    Start,
    Stop,
    Restart,
    Kill,
}

impl SlotAction {
    /// The state a slot is expected to settle in after this action.
    pub fn expected_state(self) -> SlotLifecycleState {
        match self {
            SlotAction::Start | SlotAction::Restart => SlotLifecycleState::Running,
            SlotAction::Stop | SlotAction::Kill => SlotLifecycleState::Stopped,
        }
    }
}

impl fmt::Display for SlotAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotAction::Start => "start",
            SlotAction::Stop => "stop",
            SlotAction::Restart => "restart",
            SlotAction::Kill => "kill",
        };
        f.write_str(s)
    }
}

impl FromStr for SlotAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" | "running" => Ok(SlotAction::Start),
            "stop" | "stopped" => Ok(SlotAction::Stop),
            "restart" => Ok(SlotAction::Restart),
            "kill" => Ok(SlotAction::Kill),
            _ => Err(CoreError::InvalidSlotAction(s.to_string())),
        }
    }
}

/// One runnable unit hosted by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotStatus {
    pub id: SlotId,
    /// Human label, not guaranteed unique.
    pub name: String,
    #[serde(rename = "self")]
    pub self_uri: String,
    pub external_uri: String,
    pub instance_id: InstanceId,
    pub location: String,
    pub state: SlotLifecycleState,
    /// Unassigned slots are always stopped.
    pub assignment: Option<Assignment>,
    pub install_path: String,
    /// Reserved at install time, empty once the slot is cleared.
    #[serde(default)]
    pub resources: Resources,
}

impl SlotStatus {
    /// Copy of this status with a new observed state.
    pub fn with_state(&self, state: SlotLifecycleState) -> SlotStatus {
        SlotStatus {
            state,
            ..self.clone()
        }
    }
}

// ── Agent ──────────────────────────────────────────────────────────

/// Reachability of an agent as seen by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentLifecycleState {
    Online,
    Offline,
}

impl fmt::Display for AgentLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentLifecycleState::Online => f.write_str("ONLINE"),
            AgentLifecycleState::Offline => f.write_str("OFFLINE"),
        }
    }
}

impl FromStr for AgentLifecycleState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "online" => Ok(AgentLifecycleState::Online),
            "offline" => Ok(AgentLifecycleState::Offline),
            _ => Err(CoreError::InvalidAgentState(s.to_string())),
        }
    }
}

/// Observed state of one agent and the slots it hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub agent_id: AgentId,
    pub state: AgentLifecycleState,
    pub instance_id: InstanceId,
    pub internal_uri: String,
    pub external_uri: String,
    pub location: String,
    pub instance_type: String,
    #[serde(default)]
    pub slots: Vec<SlotStatus>,
    /// Total capacity per resource dimension.
    #[serde(default)]
    pub resources: Resources,
}

impl AgentStatus {
    /// Placeholder status for an instance that has never answered.
    pub fn unreachable(instance: &Instance) -> Self {
        Self {
            agent_id: instance.id.clone(),
            state: AgentLifecycleState::Offline,
            instance_id: instance.id.clone(),
            internal_uri: instance.internal_uri.clone(),
            external_uri: instance.external_uri.clone(),
            location: instance.location.clone(),
            instance_type: String::new(),
            slots: Vec::new(),
            resources: Resources::new(),
        }
    }

    /// Copy of this status marked offline, keeping the last known slots.
    pub fn offline(&self) -> Self {
        Self {
            state: AgentLifecycleState::Offline,
            ..self.clone()
        }
    }

    pub fn is_online(&self) -> bool {
        self.state == AgentLifecycleState::Online
    }

    /// Sum of the resources reserved by every hosted slot.
    pub fn reserved(&self) -> Resources {
        Resources::sum(self.slots.iter().map(|s| &s.resources))
    }

    /// Capacity minus reserved, per dimension.
    pub fn free(&self) -> Resources {
        self.resources.saturating_sub(&self.reserved())
    }

    pub fn slot(&self, id: SlotId) -> Option<&SlotStatus> {
        self.slots.iter().find(|s| s.id == id)
    }
}
