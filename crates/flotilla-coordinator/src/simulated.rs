//! In-process fleet for local runs and tests.
//!
//! [`SimulatedFleet`] is both the [`Provisioner`] and the
//! [`AgentClientFactory`]: provisioning adds simulated agents, and the
//! clients it hands out operate on those agents' slot tables directly.
//! Individual agents can be made unreachable, slow, or made to reject
//! slot creation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use flotilla_core::{
    AgentLifecycleState, AgentStatus, Instance, InstanceId, InstanceRole, Resources, SlotAction,
    SlotId, SlotLifecycleState, SlotStatus,
};

use crate::agent_client::{AgentClient, AgentClientError, AgentClientFactory, AgentClientResult};
use crate::provisioner::{ProvisionRequest, Provisioner, ProvisionerError, ProvisionerResult};
use crate::repository::ResolvedAssignment;

#[derive(Debug)]
struct SimulatedAgent {
    instance: Instance,
    agent_id: String,
    instance_type: String,
    capacity: Resources,
    slots: Vec<SlotStatus>,
    next_slot: usize,
    reachable: bool,
    reject_creates: bool,
    status_delay: Option<Duration>,
}

impl SimulatedAgent {
    fn status(&self) -> AgentStatus {
        AgentStatus {
            agent_id: self.agent_id.clone(),
            state: AgentLifecycleState::Online,
            instance_id: self.instance.id.clone(),
            internal_uri: self.instance.internal_uri.clone(),
            external_uri: self.instance.external_uri.clone(),
            location: self.instance.location.clone(),
            instance_type: self.instance_type.clone(),
            slots: self.slots.clone(),
            resources: self.capacity.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct FleetState {
    agents: BTreeMap<InstanceId, SimulatedAgent>,
    coordinators: Vec<Instance>,
    next_instance: usize,
    default_capacity: Resources,
    provisioning_failure: Option<String>,
}

/// A fleet of simulated agents sharing one lock.
#[derive(Debug, Clone, Default)]
pub struct SimulatedFleet {
    inner: Arc<Mutex<FleetState>>,
}

impl SimulatedFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capacity given to agents created through [`Provisioner::provision`].
    pub fn with_default_capacity(self, capacity: Resources) -> Self {
        self.lock().default_capacity = capacity;
        self
    }

    fn lock(&self) -> MutexGuard<'_, FleetState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an agent reachable at `http://{host}:7770/`.
    pub fn add_agent(&self, host: &str, capacity: Resources) -> Instance {
        insert_agent(&mut self.lock(), host, capacity, "simulated")
    }

    /// Drop an instance as if the provider lost it.
    pub fn remove_instance(&self, instance_id: &str) {
        let mut state = self.lock();
        state.agents.remove(instance_id);
        state.coordinators.retain(|c| c.id != instance_id);
    }

    pub fn set_reachable(&self, instance_id: &str, reachable: bool) {
        if let Some(agent) = self.lock().agents.get_mut(instance_id) {
            agent.reachable = reachable;
        }
    }

    pub fn set_reject_creates(&self, instance_id: &str, reject: bool) {
        if let Some(agent) = self.lock().agents.get_mut(instance_id) {
            agent.reject_creates = reject;
        }
    }

    /// Delay every status answer from this agent.
    pub fn set_status_delay(&self, instance_id: &str, delay: Option<Duration>) {
        if let Some(agent) = self.lock().agents.get_mut(instance_id) {
            agent.status_delay = delay;
        }
    }

    /// Make provisioning calls fail with `message` until cleared.
    pub fn fail_provisioning(&self, message: Option<String>) {
        self.lock().provisioning_failure = message;
    }

    /// Slots an agent actually hosts, bypassing the coordinator.
    pub fn slots(&self, instance_id: &str) -> Vec<SlotStatus> {
        self.lock()
            .agents
            .get(instance_id)
            .map(|a| a.slots.clone())
            .unwrap_or_default()
    }

    /// Capacity an agent advertises.
    pub fn capacity(&self, instance_id: &str) -> Resources {
        self.lock()
            .agents
            .get(instance_id)
            .map(|a| a.capacity.clone())
            .unwrap_or_default()
    }

    fn with_agent<T>(
        &self,
        instance_id: &str,
        f: impl FnOnce(&mut SimulatedAgent) -> AgentClientResult<T>,
    ) -> AgentClientResult<T> {
        let mut state = self.lock();
        let agent = state
            .agents
            .get_mut(instance_id)
            .filter(|a| a.reachable)
            .ok_or_else(|| AgentClientError::Unreachable(instance_id.to_string()))?;
        f(agent)
    }
}

fn insert_agent(
    state: &mut FleetState,
    host: &str,
    capacity: Resources,
    instance_type: &str,
) -> Instance {
    state.next_instance += 1;
    let instance = Instance::new(
        format!("i-{:04}", state.next_instance),
        "/simulated/zone-a",
        format!("http://{host}:7770/"),
        None,
    );
    state.agents.insert(
        instance.id.clone(),
        SimulatedAgent {
            instance: instance.clone(),
            agent_id: Uuid::new_v4().to_string(),
            instance_type: instance_type.to_string(),
            capacity,
            slots: Vec::new(),
            next_slot: 0,
            reachable: true,
            reject_creates: false,
            status_delay: None,
        },
    );
    debug!(instance_id = %instance.id, %host, "simulated agent added");
    instance
}

#[async_trait]
impl Provisioner for SimulatedFleet {
    async fn list_instances(&self, role: InstanceRole) -> ProvisionerResult<Vec<Instance>> {
        let state = self.lock();
        Ok(match role {
            InstanceRole::Agent => state.agents.values().map(|a| a.instance.clone()).collect(),
            InstanceRole::Coordinator => state.coordinators.clone(),
        })
    }

    async fn provision(
        &self,
        role: InstanceRole,
        request: &ProvisionRequest,
    ) -> ProvisionerResult<Vec<Instance>> {
        if let Some(message) = self.lock().provisioning_failure.clone() {
            return Err(ProvisionerError::Partial {
                requested: request.count,
                provisioned: 0,
                message,
            });
        }

        let mut created = Vec::with_capacity(request.count);
        match role {
            InstanceRole::Agent => {
                let mut state = self.lock();
                let capacity = state.default_capacity.clone();
                let instance_type = request.instance_type.as_deref().unwrap_or("simulated");
                for _ in 0..request.count {
                    let host = format!("agent-{}", Uuid::new_v4().simple());
                    created.push(insert_agent(&mut state, &host, capacity.clone(), instance_type));
                }
            }
            InstanceRole::Coordinator => {
                let mut state = self.lock();
                for _ in 0..request.count {
                    state.next_instance += 1;
                    let id = format!("i-{:04}", state.next_instance);
                    let instance = Instance::new(
                        id.clone(),
                        "/simulated/zone-a",
                        format!("http://coordinator-{id}:7771/"),
                        None,
                    );
                    state.coordinators.push(instance.clone());
                    created.push(instance);
                }
            }
        }
        info!(%role, count = created.len(), "simulated instances provisioned");
        Ok(created)
    }

    async fn terminate(&self, instance_ids: &[InstanceId]) -> ProvisionerResult<()> {
        for id in instance_ids {
            self.remove_instance(id);
        }
        Ok(())
    }
}

impl AgentClientFactory for SimulatedFleet {
    fn client_for(&self, instance: &Instance) -> AgentClientResult<Arc<dyn AgentClient>> {
        Ok(Arc::new(SimulatedAgentClient {
            fleet: self.clone(),
            instance_id: instance.id.clone(),
        }))
    }
}

struct SimulatedAgentClient {
    fleet: SimulatedFleet,
    instance_id: InstanceId,
}

#[async_trait]
impl AgentClient for SimulatedAgentClient {
    async fn status(&self) -> AgentClientResult<AgentStatus> {
        let delay = self
            .fleet
            .lock()
            .agents
            .get(&self.instance_id)
            .and_then(|a| a.status_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.fleet.with_agent(&self.instance_id, |agent| Ok(agent.status()))
    }

    async fn create_slot(&self, installation: &ResolvedAssignment) -> AgentClientResult<SlotStatus> {
        self.fleet.with_agent(&self.instance_id, |agent| {
            if agent.reject_creates {
                return Err(AgentClientError::Rejected {
                    status: 503,
                    message: "slot creation disabled".to_string(),
                });
            }
            agent.next_slot += 1;
            let name = format!("slot{}", agent.next_slot);
            let uri = format!("{}v1/agent/slot/{name}", agent.instance.internal_uri);
            let slot = SlotStatus {
                id: Uuid::new_v4(),
                self_uri: uri.clone(),
                external_uri: uri,
                instance_id: agent.instance.id.clone(),
                location: agent.instance.location.clone(),
                state: SlotLifecycleState::Stopped,
                assignment: Some(installation.assignment.clone()),
                install_path: format!("/var/lib/flotilla/{name}"),
                resources: installation.resources.clone(),
                name,
            };
            agent.slots.push(slot.clone());
            Ok(slot)
        })
    }

    async fn change_slot_state(
        &self,
        slot_id: SlotId,
        action: SlotAction,
    ) -> AgentClientResult<SlotStatus> {
        self.fleet.with_agent(&self.instance_id, |agent| {
            let slot = agent
                .slots
                .iter_mut()
                .find(|s| s.id == slot_id)
                .ok_or(AgentClientError::SlotNotFound(slot_id))?;
            if slot.assignment.is_none() && action.expected_state() == SlotLifecycleState::Running {
                return Err(AgentClientError::Rejected {
                    status: 409,
                    message: "slot has no assignment".to_string(),
                });
            }
            slot.state = action.expected_state();
            Ok(slot.clone())
        })
    }

    async fn destroy_slot(&self, slot_id: SlotId) -> AgentClientResult<SlotStatus> {
        self.fleet.with_agent(&self.instance_id, |agent| {
            let idx = agent
                .slots
                .iter()
                .position(|s| s.id == slot_id)
                .ok_or(AgentClientError::SlotNotFound(slot_id))?;
            let mut slot = agent.slots.remove(idx);
            slot.state = SlotLifecycleState::Unknown;
            slot.assignment = None;
            slot.resources = Resources::new();
            Ok(slot)
        })
    }
}
