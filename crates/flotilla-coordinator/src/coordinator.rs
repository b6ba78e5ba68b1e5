//! Coordinator — the authoritative view of the fleet.
//!
//! The `Coordinator`:
//! - Refreshes agent status from the provisioner's instance list
//! - Places assignments onto agents within their resource capacity
//! - Forwards lifecycle changes and terminations to agents
//! - Records the expected state of every slot it touches
//!
//! Reads go against an immutable [`Snapshot`] that is replaced whole.
//! Resource accounting lives in one [`AgentLedger`] per agent, each behind
//! its own mutex, kept outside the snapshot so that in-flight installs
//! survive a refresh.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{self, StreamExt};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use flotilla_core::{
    AgentFilter, AgentLifecycleState, AgentStatus, Assignment, Instance, InstanceId, InstanceRole,
    SlotAction, SlotFilter, SlotId, SlotLifecycleState, SlotStatus,
};
use flotilla_placement::{AgentLedger, select_candidates};
use flotilla_state::{ExpectedSlotStatus, StateManager};

use crate::agent_client::{AgentClientError, AgentClientFactory, AgentClientResult};
use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::provisioner::{ProvisionRequest, Provisioner};
use crate::repository::{Repository, ResolvedAssignment};
use crate::snapshot::{AgentEntry, Snapshot};

type SharedLedger = Arc<Mutex<AgentLedger>>;

pub struct Coordinator {
    config: CoordinatorConfig,
    provisioner: Arc<dyn Provisioner>,
    repository: Arc<dyn Repository>,
    state: Arc<dyn StateManager>,
    clients: Arc<dyn AgentClientFactory>,
    snapshot: RwLock<Arc<Snapshot>>,
    /// instance id → ledger. Pruned together with the agent.
    ledgers: RwLock<HashMap<InstanceId, SharedLedger>>,
    /// Serializes refreshes.
    refreshing: Mutex<()>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        provisioner: Arc<dyn Provisioner>,
        repository: Arc<dyn Repository>,
        state: Arc<dyn StateManager>,
        clients: Arc<dyn AgentClientFactory>,
    ) -> Self {
        info!(
            environment = %config.environment,
            agent_timeout = ?config.agent_timeout,
            status_expiration = ?config.status_expiration,
            "coordinator created"
        );
        Self {
            config,
            provisioner,
            repository,
            state,
            clients,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            ledgers: RwLock::new(HashMap::new()),
            refreshing: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// The current snapshot. Cheap; never blocks on a refresh in progress.
    pub async fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().await.clone()
    }

    async fn publish(&self, update: impl FnOnce(&Snapshot) -> Snapshot) {
        let mut current = self.snapshot.write().await;
        *current = Arc::new(update(&current));
    }

    async fn ledger(&self, instance_id: &str) -> Option<SharedLedger> {
        self.ledgers.read().await.get(instance_id).cloned()
    }

    async fn ledger_or_insert(&self, instance_id: &str, seed: &AgentStatus) -> SharedLedger {
        self.ledgers
            .write()
            .await
            .entry(instance_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(AgentLedger::from_status(seed))))
            .clone()
    }

    /// Run an agent call under the per-call deadline.
    async fn agent_call<T>(&self, call: impl Future<Output = AgentClientResult<T>>) -> AgentClientResult<T> {
        let timeout = self.config.agent_timeout;
        tokio::time::timeout(timeout, call)
            .await
            .unwrap_or(Err(AgentClientError::Timeout(timeout)))
    }

    async fn fetch_status(&self, instance: &Instance) -> AgentClientResult<AgentStatus> {
        let client = self.clients.client_for(instance)?;
        self.agent_call(client.status()).await
    }

    fn record_expected(&self, expected: ExpectedSlotStatus) {
        if let Err(e) = self.state.record_expected(&expected) {
            warn!(slot_id = %expected.id, error = %e, "failed to record expected state");
        }
    }

    fn forget_expected(&self, slot_id: SlotId) {
        if let Err(e) = self.state.delete_expected(slot_id) {
            warn!(%slot_id, error = %e, "failed to delete expected state");
        }
    }

    // ── Refresh ────────────────────────────────────────────────────

    /// Rebuild the snapshot from the provisioner and live agent status.
    ///
    /// Agents that fail, time out, or have never answered are kept as
    /// OFFLINE with their last known slots. Agents whose instance is gone
    /// are dropped along with their ledger. Remote state is never changed.
    pub async fn refresh(&self) -> CoordinatorResult<()> {
        let _serial = self.refreshing.lock().await;
        let started = Instant::now();

        let instances = self.provisioner.list_instances(InstanceRole::Agent).await?;
        let previous = self.snapshot().await;

        let fetched: Vec<_> = stream::iter(instances)
            .map(|instance| async move {
                let fetched_at = Instant::now();
                let result = self.fetch_status(&instance).await;
                (instance, fetched_at, result)
            })
            .buffered(self.config.max_concurrent_refreshes)
            .collect()
            .await;

        let mut entries = Vec::with_capacity(fetched.len());
        let mut ledgers = HashMap::with_capacity(fetched.len());
        for (instance, fetched_at, result) in fetched {
            let entry = match result {
                Ok(mut status) => {
                    status.state = AgentLifecycleState::Online;
                    status.instance_id = instance.id.clone();
                    let ledger = self.ledger_or_insert(&instance.id, &status).await;
                    ledger.lock().await.reconcile(&status, fetched_at);
                    ledgers.insert(instance.id.clone(), ledger);
                    AgentEntry {
                        instance,
                        status,
                        last_seen: Some(fetched_at),
                    }
                }
                Err(e) => {
                    let (status, last_seen) = match previous.entry(&instance.id) {
                        Some(prev) => (prev.status.offline(), prev.last_seen),
                        None => (AgentStatus::unreachable(&instance), None),
                    };
                    if previous.entry(&instance.id).is_none_or(|p| p.status.is_online()) {
                        warn!(instance_id = %instance.id, error = %e, "agent unreachable, marking offline");
                    } else {
                        debug!(instance_id = %instance.id, error = %e, "agent still unreachable");
                    }
                    let ledger = self.ledger_or_insert(&instance.id, &status).await;
                    ledgers.insert(instance.id.clone(), ledger);
                    AgentEntry {
                        instance,
                        status,
                        last_seen,
                    }
                }
            };
            entries.push(entry);
        }

        let live: HashSet<&str> = entries.iter().map(|e| e.instance.id.as_str()).collect();
        for gone in previous.entries().iter().filter(|e| !live.contains(e.instance.id.as_str())) {
            info!(
                agent_id = %gone.status.agent_id,
                instance_id = %gone.instance.id,
                "instance gone, agent pruned"
            );
        }
        self.ledgers
            .write()
            .await
            .retain(|id, _| live.contains(id.as_str()));

        // Slots created since their agent's status was fetched are only in
        // the ledger; carry them over so they stay visible.
        let mut current = self.snapshot.write().await;
        for entry in &mut entries {
            if let Some(ledger) = ledgers.get(&entry.instance.id) {
                for slot in ledger.lock().await.unconfirmed() {
                    if !entry.status.slots.iter().any(|s| s.id == slot.id) {
                        entry.status.slots.push(slot);
                    }
                }
            }
        }
        let online = entries.iter().filter(|e| e.status.is_online()).count();
        let total = entries.len();
        *current = Arc::new(Snapshot::new(entries));
        drop(current);

        debug!(agents = total, online, elapsed = ?started.elapsed(), "refresh complete");
        Ok(())
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Slots matching `filter`, in agent order then slot order.
    pub async fn query(&self, filter: &SlotFilter) -> Vec<SlotStatus> {
        let snapshot = self.snapshot().await;
        snapshot.slots(filter).map(|(_, s)| s.clone()).collect()
    }

    /// Agents matching `filter`, with status expiration applied.
    pub async fn agents(&self, filter: &AgentFilter) -> Vec<AgentStatus> {
        let snapshot = self.snapshot().await;
        snapshot
            .agents(Instant::now(), self.config.status_expiration)
            .into_iter()
            .filter(|a| filter.matches(a))
            .collect()
    }

    /// Recorded expectations for `slots`, keyed by slot. Slots without one
    /// are absent.
    pub fn expected_states(
        &self,
        slots: &[SlotStatus],
    ) -> CoordinatorResult<HashMap<SlotId, ExpectedSlotStatus>> {
        let mut expected = HashMap::with_capacity(slots.len());
        for slot in slots {
            if let Some(e) = self.state.get_expected(slot.id)? {
                expected.insert(slot.id, e);
            }
        }
        Ok(expected)
    }

    // ── Placement ──────────────────────────────────────────────────

    /// Install `assignment` on up to `limit` agents matching `filter`.
    ///
    /// Agents are tried in agent-id order. An agent that lacks capacity or
    /// fails to create the slot is skipped. Fewer than `limit` results
    /// (including none) is still success.
    pub async fn install(
        &self,
        assignment: &Assignment,
        limit: usize,
        filter: &AgentFilter,
    ) -> CoordinatorResult<Vec<SlotStatus>> {
        let resolved = self.repository.resolve(assignment).await?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let snapshot = self.snapshot().await;
        let agents = snapshot.agents(Instant::now(), self.config.status_expiration);
        let candidates = select_candidates(&agents, filter);
        debug!(
            %assignment,
            limit,
            candidates = candidates.len(),
            demand = %resolved.resources,
            "placing assignment"
        );

        let mut installed = Vec::new();
        for agent in candidates {
            if installed.len() >= limit {
                break;
            }
            let Some(entry) = snapshot.entry(&agent.instance_id) else {
                continue;
            };
            let Some(ledger) = self.ledger(&entry.instance.id).await else {
                continue;
            };

            let reservation = ledger.lock().await.try_reserve(&resolved.resources);
            let Some(reservation) = reservation else {
                continue;
            };

            match self.create_slot(&entry.instance, &resolved).await {
                Ok(mut slot) => {
                    if slot.resources.is_empty() {
                        slot.resources = resolved.resources.clone();
                    }
                    ledger
                        .lock()
                        .await
                        .commit(reservation, slot.clone(), Instant::now());
                    self.record_expected(ExpectedSlotStatus::new(
                        slot.id,
                        SlotLifecycleState::Stopped,
                        slot.assignment.clone(),
                    ));
                    let instance_id = entry.instance.id.clone();
                    let published = slot.clone();
                    self.publish(|s| s.with_slot(&instance_id, published)).await;

                    info!(agent_id = %agent.agent_id, slot_id = %slot.id, %assignment, "slot installed");
                    installed.push(slot);
                }
                Err(e) => {
                    ledger.lock().await.cancel(reservation);
                    warn!(agent_id = %agent.agent_id, error = %e, "slot creation failed, skipping agent");
                }
            }
        }

        if installed.len() < limit {
            debug!(%assignment, limit, installed = installed.len(), "placement shortfall");
        }
        Ok(installed)
    }

    async fn create_slot(
        &self,
        instance: &Instance,
        resolved: &ResolvedAssignment,
    ) -> AgentClientResult<SlotStatus> {
        let client = self.clients.client_for(instance)?;
        self.agent_call(client.create_slot(resolved)).await
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    fn targeted(filter: &SlotFilter) -> CoordinatorResult<()> {
        if filter.is_empty() {
            return Err(CoordinatorError::InvalidRequest(
                "a slot filter is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Snapshot slots matching `filter`, each paired with its instance.
    async fn targets(&self, filter: &SlotFilter) -> Vec<(Instance, SlotStatus)> {
        let snapshot = self.snapshot().await;
        snapshot
            .slots(filter)
            .map(|(i, s)| (i.clone(), s.clone()))
            .collect()
    }

    /// Ask every matching slot's agent to apply `action`.
    ///
    /// Returns the slots the agents acknowledged. Per-slot failures are
    /// logged and left out of the result.
    pub async fn set_state(
        &self,
        filter: &SlotFilter,
        action: SlotAction,
    ) -> CoordinatorResult<Vec<SlotStatus>> {
        Self::targeted(filter)?;
        let targets = self.targets(filter).await;
        let requested = targets.len();

        let results: Vec<_> = stream::iter(targets)
            .map(|(instance, slot)| async move {
                let result = match self.clients.client_for(&instance) {
                    Ok(client) => self.agent_call(client.change_slot_state(slot.id, action)).await,
                    Err(e) => Err(e),
                };
                (instance, slot, result)
            })
            .buffered(self.config.max_concurrent_refreshes)
            .collect()
            .await;

        let mut updated = Vec::with_capacity(results.len());
        for (instance, slot, result) in results {
            match result {
                Ok(status) => {
                    self.record_expected(ExpectedSlotStatus::new(
                        slot.id,
                        action.expected_state(),
                        status.assignment.clone(),
                    ));
                    let published = status.clone();
                    self.publish(|s| s.with_slot(&instance.id, published)).await;
                    updated.push(status);
                }
                Err(e) => {
                    warn!(slot_id = %slot.id, %action, error = %e, "lifecycle change failed");
                }
            }
        }

        info!(%action, requested, updated = updated.len(), "lifecycle change complete");
        Ok(updated)
    }

    /// Destroy every matching slot and release its resources.
    pub async fn terminate(&self, filter: &SlotFilter) -> CoordinatorResult<Vec<SlotStatus>> {
        Self::targeted(filter)?;
        let targets = self.targets(filter).await;
        let requested = targets.len();

        let results: Vec<_> = stream::iter(targets)
            .map(|(instance, slot)| async move {
                let result = match self.clients.client_for(&instance) {
                    Ok(client) => self.agent_call(client.destroy_slot(slot.id)).await,
                    Err(e) => Err(e),
                };
                (instance, slot, result)
            })
            .buffered(self.config.max_concurrent_refreshes)
            .collect()
            .await;

        let mut terminated = Vec::with_capacity(results.len());
        for (instance, slot, result) in results {
            let status = match result {
                Ok(status) => status,
                // Already gone on the agent; finish the bookkeeping.
                Err(AgentClientError::SlotNotFound(_)) => slot.with_state(SlotLifecycleState::Unknown),
                Err(e) => {
                    warn!(slot_id = %slot.id, error = %e, "slot termination failed");
                    continue;
                }
            };

            if let Some(ledger) = self.ledger(&instance.id).await {
                ledger.lock().await.release(slot.id);
            }
            self.forget_expected(slot.id);
            self.publish(|s| s.without_slot(slot.id)).await;
            terminated.push(status);
        }

        info!(requested, terminated = terminated.len(), "slot termination complete");
        Ok(terminated)
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Terminate the instance behind an agent and drop the agent.
    pub async fn terminate_agent(&self, agent_id: &str) -> CoordinatorResult<AgentStatus> {
        let snapshot = self.snapshot().await;
        let entry = snapshot
            .entry_by_agent_id(agent_id)
            .ok_or_else(|| CoordinatorError::AgentNotFound(agent_id.to_string()))?;

        self.provisioner
            .terminate(std::slice::from_ref(&entry.instance.id))
            .await?;

        self.ledgers.write().await.remove(&entry.instance.id);
        for slot in &entry.status.slots {
            self.forget_expected(slot.id);
        }
        let instance_id = entry.instance.id.clone();
        self.publish(|s| s.without_agent(&instance_id)).await;

        info!(%agent_id, %instance_id, "agent terminated");
        Ok(entry.status.clone())
    }

    /// Provision new agents. They appear after the next refresh.
    pub async fn provision_agents(&self, request: &ProvisionRequest) -> CoordinatorResult<Vec<Instance>> {
        self.provision(InstanceRole::Agent, request).await
    }

    pub async fn provision_coordinators(
        &self,
        request: &ProvisionRequest,
    ) -> CoordinatorResult<Vec<Instance>> {
        self.provision(InstanceRole::Coordinator, request).await
    }

    async fn provision(
        &self,
        role: InstanceRole,
        request: &ProvisionRequest,
    ) -> CoordinatorResult<Vec<Instance>> {
        if request.count == 0 {
            return Err(CoordinatorError::InvalidRequest(
                "count must be at least 1".to_string(),
            ));
        }
        let instances = self.provisioner.provision(role, request).await?;
        info!(%role, count = instances.len(), "instances provisioned");
        Ok(instances)
    }

    pub async fn list_coordinators(&self) -> CoordinatorResult<Vec<Instance>> {
        Ok(self
            .provisioner
            .list_instances(InstanceRole::Coordinator)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use flotilla_core::{Glob, Resources};
    use flotilla_state::InMemoryStateManager;

    use crate::repository::StaticRepository;
    use crate::simulated::SimulatedFleet;

    fn apple() -> Assignment {
        Assignment::new("food.fruit:apple:1.0", "@apple:1.0")
    }

    fn banana() -> Assignment {
        Assignment::new("food.fruit:banana:2.0-SNAPSHOT", "@banana:2.0-SNAPSHOT")
    }

    fn fruit_size() -> Resources {
        Resources::from([("cpu", 1), ("memory", 512)])
    }

    fn large() -> Resources {
        Resources::from([("cpu", 8), ("memory", 1024)])
    }

    fn repository() -> StaticRepository {
        StaticRepository::new("http://repo.example/maven", "http://repo.example/config")
            .with_assignment(apple(), fruit_size())
            .with_assignment(banana(), fruit_size())
    }

    fn coordinator_with(fleet: &SimulatedFleet, config: CoordinatorConfig) -> Coordinator {
        Coordinator::new(
            config,
            Arc::new(fleet.clone()),
            Arc::new(repository()),
            Arc::new(InMemoryStateManager::new()),
            Arc::new(fleet.clone()),
        )
    }

    fn coordinator(fleet: &SimulatedFleet) -> Coordinator {
        coordinator_with(fleet, CoordinatorConfig::default())
    }

    fn state_filter(state: SlotLifecycleState) -> SlotFilter {
        SlotFilter::all().with_state(state)
    }

    #[tokio::test]
    async fn install_one_slot_per_agent_up_to_limit() {
        let fleet = SimulatedFleet::new();
        for host in ["apple1", "apple2", "banana1"] {
            fleet.add_agent(host, large());
        }
        let c = coordinator(&fleet);
        c.refresh().await.unwrap();

        let installed = c.install(&apple(), 10, &AgentFilter::all()).await.unwrap();

        // Each agent can fit 2 slots by memory, but one pass places one
        // slot per agent.
        assert_eq!(installed.len(), 3);
        for slot in &installed {
            assert_eq!(slot.state, SlotLifecycleState::Stopped);
            assert_eq!(slot.assignment, Some(apple()));
        }
        let on_agents: HashSet<_> = installed.iter().map(|s| s.instance_id.clone()).collect();
        assert_eq!(on_agents.len(), 3);
    }

    #[tokio::test]
    async fn install_respects_limit() {
        let fleet = SimulatedFleet::new();
        for host in ["apple1", "apple2", "banana1"] {
            fleet.add_agent(host, large());
        }
        let c = coordinator(&fleet);
        c.refresh().await.unwrap();

        let installed = c.install(&apple(), 2, &AgentFilter::all()).await.unwrap();
        assert_eq!(installed.len(), 2);
    }

    #[tokio::test]
    async fn install_honours_agent_filter() {
        let fleet = SimulatedFleet::new();
        for host in ["apple1", "apple2", "banana1"] {
            fleet.add_agent(host, large());
        }
        let c = coordinator(&fleet);
        c.refresh().await.unwrap();

        let filter = AgentFilter::all().with_host(Glob::case_insensitive("apple*").unwrap());
        let installed = c.install(&apple(), 10, &filter).await.unwrap();

        assert_eq!(installed.len(), 2);
        for slot in &installed {
            assert!(slot.self_uri.contains("apple"));
        }
    }

    #[tokio::test]
    async fn second_install_does_not_fit() {
        let fleet = SimulatedFleet::new();
        fleet.add_agent("apple", fruit_size());
        let c = coordinator(&fleet);
        c.refresh().await.unwrap();

        let first = c.install(&apple(), 1, &AgentFilter::all()).await.unwrap();
        assert_eq!(first.len(), 1);

        let second = c.install(&banana(), 1, &AgentFilter::all()).await.unwrap();
        assert!(second.is_empty());

        // Still full after the agent confirms the first slot.
        c.refresh().await.unwrap();
        let third = c.install(&banana(), 1, &AgentFilter::all()).await.unwrap();
        assert!(third.is_empty());
    }

    #[tokio::test]
    async fn agent_without_resources_gets_nothing() {
        let fleet = SimulatedFleet::new();
        fleet.add_agent("apple", Resources::new());
        let c = coordinator(&fleet);
        c.refresh().await.unwrap();

        let installed = c.install(&apple(), 1, &AgentFilter::all()).await.unwrap();
        assert!(installed.is_empty());
    }

    #[tokio::test]
    async fn unresolvable_assignment_is_rejected() {
        let fleet = SimulatedFleet::new();
        fleet.add_agent("apple", large());
        let c = coordinator(&fleet);
        c.refresh().await.unwrap();

        let err = c
            .install(&Assignment::new("food.fruit:cherry:1.0", "@cherry:1.0"), 1, &AgentFilter::all())
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Unresolvable(_)));
        assert!(fleet.slots("i-0001").is_empty());
    }

    #[tokio::test]
    async fn query_unknown_state_is_empty() {
        let fleet = SimulatedFleet::new();
        fleet.add_agent("apple", large());
        let c = coordinator(&fleet);
        c.refresh().await.unwrap();
        c.install(&apple(), 1, &AgentFilter::all()).await.unwrap();

        assert!(c.query(&state_filter(SlotLifecycleState::Unknown)).await.is_empty());
        assert_eq!(c.query(&state_filter(SlotLifecycleState::Stopped)).await.len(), 1);
    }

    #[tokio::test]
    async fn installed_slot_visible_before_and_after_refresh() {
        let fleet = SimulatedFleet::new();
        fleet.add_agent("apple", large());
        let c = coordinator(&fleet);
        c.refresh().await.unwrap();

        let installed = c.install(&apple(), 1, &AgentFilter::all()).await.unwrap();
        let id = installed[0].id;

        let before = c.query(&SlotFilter::all().with_uuid(&id.to_string())).await;
        assert_eq!(before.len(), 1);

        c.refresh().await.unwrap();
        let after = c.query(&SlotFilter::all()).await;
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, id);

        let expected = c.expected_states(&after).unwrap();
        assert_eq!(expected[&id].state, SlotLifecycleState::Stopped);
    }

    #[tokio::test]
    async fn concurrent_installs_never_overcommit() {
        let fleet = SimulatedFleet::new();
        let instance = fleet.add_agent("apple", Resources::from([("cpu", 4), ("memory", 4096)]));
        let c = Arc::new(coordinator(&fleet));
        c.refresh().await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..12 {
            let c = Arc::clone(&c);
            handles.push(tokio::spawn(async move {
                c.install(&apple(), 1, &AgentFilter::all()).await.unwrap().len()
            }));
        }
        let mut total = 0;
        for h in handles {
            total += h.await.unwrap();
        }

        assert_eq!(total, 4);
        let hosted = fleet.slots(&instance.id);
        let reserved = Resources::sum(hosted.iter().map(|s| &s.resources));
        assert!(reserved.fits_within(&fleet.capacity(&instance.id)));
    }

    #[tokio::test]
    async fn unreachable_agent_goes_offline_and_is_skipped() {
        let fleet = SimulatedFleet::new();
        let down = fleet.add_agent("apple1", large());
        fleet.add_agent("apple2", large());
        let c = coordinator(&fleet);
        c.refresh().await.unwrap();
        let on_down = AgentFilter::all().with_instance(&down.id);
        assert_eq!(c.install(&apple(), 1, &on_down).await.unwrap().len(), 1);

        fleet.set_reachable(&down.id, false);
        c.refresh().await.unwrap();

        let offline = c
            .agents(&AgentFilter::all().with_state(AgentLifecycleState::Offline))
            .await;
        assert_eq!(offline.len(), 1);
        assert_eq!(offline[0].instance_id, down.id);
        // Last known slots are kept.
        assert_eq!(offline[0].slots.len(), 1);

        let installed = c.install(&apple(), 10, &AgentFilter::all()).await.unwrap();
        assert_eq!(installed.len(), 1);
        assert_ne!(installed[0].instance_id, down.id);
    }

    #[tokio::test]
    async fn slow_agent_times_out_without_blocking_others() {
        let fleet = SimulatedFleet::new();
        let slow = fleet.add_agent("apple1", large());
        fleet.add_agent("apple2", large());
        fleet.set_status_delay(&slow.id, Some(Duration::from_secs(5)));

        let config = CoordinatorConfig::default().with_agent_timeout(Duration::from_millis(50));
        let c = coordinator_with(&fleet, config);

        tokio::time::timeout(Duration::from_secs(2), c.refresh())
            .await
            .expect("refresh should not wait for the slow agent")
            .unwrap();

        let agents = c.agents(&AgentFilter::all()).await;
        assert_eq!(agents.len(), 2);
        assert_eq!(agents.iter().filter(|a| a.is_online()).count(), 1);
    }

    #[tokio::test]
    async fn stale_status_expires_to_offline() {
        let fleet = SimulatedFleet::new();
        fleet.add_agent("apple", large());
        let config = CoordinatorConfig::default().with_status_expiration(Duration::from_millis(20));
        let c = coordinator_with(&fleet, config);
        c.refresh().await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;

        let agents = c.agents(&AgentFilter::all()).await;
        assert_eq!(agents[0].state, AgentLifecycleState::Offline);
        assert!(c.install(&apple(), 1, &AgentFilter::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn vanished_instance_is_pruned_with_its_ledger() {
        let fleet = SimulatedFleet::new();
        let gone = fleet.add_agent("apple1", large());
        fleet.add_agent("apple2", large());
        let c = coordinator(&fleet);
        c.refresh().await.unwrap();

        fleet.remove_instance(&gone.id);
        c.refresh().await.unwrap();

        let agents = c.agents(&AgentFilter::all()).await;
        assert_eq!(agents.len(), 1);
        assert!(c.ledger(&gone.id).await.is_none());
    }

    #[tokio::test]
    async fn failed_creation_releases_reservation() {
        let fleet = SimulatedFleet::new();
        let instance = fleet.add_agent("apple", fruit_size());
        let c = coordinator(&fleet);
        c.refresh().await.unwrap();

        fleet.set_reject_creates(&instance.id, true);
        assert!(c.install(&apple(), 1, &AgentFilter::all()).await.unwrap().is_empty());

        fleet.set_reject_creates(&instance.id, false);
        assert_eq!(c.install(&apple(), 1, &AgentFilter::all()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn set_state_updates_slots_and_expectations() {
        let fleet = SimulatedFleet::new();
        fleet.add_agent("apple", large());
        let c = coordinator(&fleet);
        c.refresh().await.unwrap();
        let installed = c.install(&apple(), 1, &AgentFilter::all()).await.unwrap();

        let filter = SlotFilter::all().with_binary(Glob::new("*:apple:*").unwrap());
        let updated = c.set_state(&filter, SlotAction::Start).await.unwrap();

        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].state, SlotLifecycleState::Running);
        assert_eq!(c.query(&state_filter(SlotLifecycleState::Running)).await.len(), 1);
        assert_eq!(
            c.expected_states(&updated).unwrap()[&installed[0].id].state,
            SlotLifecycleState::Running
        );
    }

    #[tokio::test]
    async fn expected_states_cover_only_requested_slots() {
        let fleet = SimulatedFleet::new();
        fleet.add_agent("apple1", large());
        fleet.add_agent("apple2", large());
        let c = coordinator(&fleet);
        c.refresh().await.unwrap();
        let installed = c.install(&apple(), 2, &AgentFilter::all()).await.unwrap();
        assert_eq!(installed.len(), 2);

        let one = c.expected_states(&installed[..1]).unwrap();
        assert_eq!(one.len(), 1);
        assert!(one.contains_key(&installed[0].id));
        assert!(c.expected_states(&[]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn terminate_releases_capacity() {
        let fleet = SimulatedFleet::new();
        let instance = fleet.add_agent("apple", fruit_size());
        let c = coordinator(&fleet);
        c.refresh().await.unwrap();
        let installed = c.install(&apple(), 1, &AgentFilter::all()).await.unwrap();

        let filter = SlotFilter::all().with_uuid(&installed[0].id.to_string());
        let terminated = c.terminate(&filter).await.unwrap();

        assert_eq!(terminated.len(), 1);
        assert!(fleet.slots(&instance.id).is_empty());
        assert!(c.query(&SlotFilter::all()).await.is_empty());
        assert!(c.expected_states(&installed).unwrap().is_empty());

        // Capacity is free again.
        assert_eq!(c.install(&banana(), 1, &AgentFilter::all()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unfiltered_destructive_calls_are_refused() {
        let fleet = SimulatedFleet::new();
        let c = coordinator(&fleet);

        assert!(matches!(
            c.terminate(&SlotFilter::all()).await,
            Err(CoordinatorError::InvalidRequest(_))
        ));
        assert!(matches!(
            c.set_state(&SlotFilter::all(), SlotAction::Kill).await,
            Err(CoordinatorError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn terminate_agent_removes_it() {
        let fleet = SimulatedFleet::new();
        fleet.add_agent("apple", large());
        let c = coordinator(&fleet);
        c.refresh().await.unwrap();

        let agent_id = c.agents(&AgentFilter::all()).await[0].agent_id.clone();
        let terminated = c.terminate_agent(&agent_id).await.unwrap();
        assert_eq!(terminated.agent_id, agent_id);
        assert!(c.agents(&AgentFilter::all()).await.is_empty());

        c.refresh().await.unwrap();
        assert!(c.agents(&AgentFilter::all()).await.is_empty());

        assert!(matches!(
            c.terminate_agent(&agent_id).await,
            Err(CoordinatorError::AgentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn provisioned_agents_appear_after_refresh() {
        let fleet = SimulatedFleet::new().with_default_capacity(large());
        let c = coordinator(&fleet);

        let created = c.provision_agents(&ProvisionRequest::count(2)).await.unwrap();
        assert_eq!(created.len(), 2);
        assert!(c.agents(&AgentFilter::all()).await.is_empty());

        c.refresh().await.unwrap();
        assert_eq!(c.agents(&AgentFilter::all()).await.len(), 2);
    }

    #[tokio::test]
    async fn provisioning_failure_propagates() {
        let fleet = SimulatedFleet::new();
        fleet.fail_provisioning(Some("quota exceeded".to_string()));
        let c = coordinator(&fleet);

        let err = c
            .provision_coordinators(&ProvisionRequest::count(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Provisioning(_)));

        fleet.fail_provisioning(None);
        c.provision_coordinators(&ProvisionRequest::count(1)).await.unwrap();
        assert_eq!(c.list_coordinators().await.unwrap().len(), 1);
    }
}
