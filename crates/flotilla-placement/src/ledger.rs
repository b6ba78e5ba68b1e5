//! Per-agent resource ledger.
//!
//! The ledger is the single source of truth for "how much of this agent is
//! spoken for". It counts three kinds of debit:
//!
//! - **observed**: slots the agent reported on its last status
//! - **created**: slots the coordinator created that the agent has not
//!   yet reported (the status fetch was already in flight)
//! - **pending**: reservations for creations still in progress
//!
//! Callers hold the ledger behind a lock; `try_reserve` evaluates fit and
//! debits in one call, so two installs can never both see the same free
//! capacity.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, warn};

use flotilla_core::{AgentId, AgentStatus, Resources, SlotId, SlotStatus};

/// A debit taken against an agent for a slot that is being created.
///
/// Must be handed back through [`AgentLedger::commit`] or
/// [`AgentLedger::cancel`].
#[derive(Debug)]
#[must_use = "a reservation holds capacity until committed or cancelled"]
pub struct Reservation {
    id: u64,
    resources: Resources,
}

impl Reservation {
    pub fn resources(&self) -> &Resources {
        &self.resources
    }
}

#[derive(Debug, Clone)]
struct CreatedSlot {
    status: SlotStatus,
    charged: Resources,
    created_at: Instant,
}

/// Capacity and debits for a single agent.
#[derive(Debug)]
pub struct AgentLedger {
    agent_id: AgentId,
    capacity: Resources,
    observed: BTreeMap<SlotId, Resources>,
    created: BTreeMap<SlotId, CreatedSlot>,
    pending: BTreeMap<u64, Resources>,
    next_reservation: u64,
}

impl AgentLedger {
    /// Empty ledger for an agent with the given capacity.
    pub fn new(agent_id: impl Into<AgentId>, capacity: Resources) -> Self {
        Self {
            agent_id: agent_id.into(),
            capacity,
            observed: BTreeMap::new(),
            created: BTreeMap::new(),
            pending: BTreeMap::new(),
            next_reservation: 0,
        }
    }

    /// Ledger seeded from an agent's reported status.
    pub fn from_status(status: &AgentStatus) -> Self {
        let mut ledger = Self::new(status.agent_id.clone(), status.resources.clone());
        ledger.observed = observed_slots(status);
        ledger
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn capacity(&self) -> &Resources {
        &self.capacity
    }

    /// Everything currently debited against this agent.
    pub fn reserved(&self) -> Resources {
        Resources::sum(
            self.observed
                .values()
                .chain(self.created.values().map(|c| &c.charged))
                .chain(self.pending.values()),
        )
    }

    /// Capacity not yet debited.
    pub fn available(&self) -> Resources {
        self.capacity.saturating_sub(&self.reserved())
    }

    /// Debit `demand` if it fits in what is left; otherwise leave the
    /// ledger untouched and return `None`.
    pub fn try_reserve(&mut self, demand: &Resources) -> Option<Reservation> {
        if !demand.fits_within(&self.available()) {
            debug!(
                agent_id = %self.agent_id,
                %demand,
                available = %self.available(),
                "demand does not fit"
            );
            return None;
        }

        let id = self.next_reservation;
        self.next_reservation += 1;
        self.pending.insert(id, demand.clone());

        // Only the demanded dimensions are checked: an agent may already
        // report more than its capacity in others.
        debug_assert!(
            {
                let reserved = self.reserved();
                demand
                    .iter()
                    .all(|(name, q)| q == 0 || reserved.get(name) <= self.capacity.get(name))
            },
            "ledger for {} overcommitted",
            self.agent_id
        );

        Some(Reservation {
            id,
            resources: demand.clone(),
        })
    }

    /// Turn a reservation into a created slot.
    pub fn commit(&mut self, reservation: Reservation, slot: SlotStatus, created_at: Instant) {
        self.pending.remove(&reservation.id);
        debug!(agent_id = %self.agent_id, slot_id = %slot.id, "reservation committed");
        self.created.insert(
            slot.id,
            CreatedSlot {
                status: slot,
                charged: reservation.resources,
                created_at,
            },
        );
    }

    /// Give a reservation's resources back.
    pub fn cancel(&mut self, reservation: Reservation) {
        self.pending.remove(&reservation.id);
        debug!(agent_id = %self.agent_id, "reservation cancelled");
    }

    /// Credit back a slot that has been destroyed. Returns true if the slot
    /// was debited here.
    pub fn release(&mut self, slot_id: SlotId) -> bool {
        let observed = self.observed.remove(&slot_id).is_some();
        let created = self.created.remove(&slot_id).is_some();
        observed || created
    }

    /// Replace observed slots with a fresh status fetched at `fetched_at`.
    ///
    /// Created slots the agent now reports move to observed. Created slots
    /// it does not report are kept only if they were created after the
    /// fetch began; older ones are gone and are dropped. Returns the slots
    /// still awaiting confirmation so they can stay visible.
    pub fn reconcile(&mut self, status: &AgentStatus, fetched_at: Instant) -> Vec<SlotStatus> {
        self.capacity = status.resources.clone();
        self.observed = observed_slots(status);

        let observed = &self.observed;
        let agent_id = &self.agent_id;
        self.created.retain(|slot_id, created| {
            if observed.contains_key(slot_id) {
                false
            } else if created.created_at < fetched_at {
                warn!(%agent_id, %slot_id, "created slot missing from agent status, dropping");
                false
            } else {
                true
            }
        });

        if !self.reserved().fits_within(&self.capacity) {
            warn!(
                agent_id = %self.agent_id,
                capacity = %self.capacity,
                reserved = %self.reserved(),
                "agent reports more reserved than capacity"
            );
        }

        self.unconfirmed()
    }

    /// Created slots not yet confirmed by the agent.
    pub fn unconfirmed(&self) -> Vec<SlotStatus> {
        self.created.values().map(|c| c.status.clone()).collect()
    }
}

fn observed_slots(status: &AgentStatus) -> BTreeMap<SlotId, Resources> {
    status
        .slots
        .iter()
        .map(|s| (s.id, s.resources.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use flotilla_core::{AgentLifecycleState, Assignment, SlotLifecycleState};
    use uuid::Uuid;

    fn apple() -> Resources {
        Resources::from([("cpu", 1), ("memory", 512)])
    }

    fn slot(resources: Resources) -> SlotStatus {
        SlotStatus {
            id: Uuid::new_v4(),
            name: "slot".to_string(),
            self_uri: "fake://apple/v1/agent/slot/slot".to_string(),
            external_uri: "fake://apple/v1/agent/slot/slot".to_string(),
            instance_id: "i-1".to_string(),
            location: "/zone-a".to_string(),
            state: SlotLifecycleState::Stopped,
            assignment: Some(Assignment::new("food.fruit:apple:1.0", "@apple:1.0")),
            install_path: "/slot".to_string(),
            resources,
        }
    }

    fn status(capacity: Resources, slots: Vec<SlotStatus>) -> AgentStatus {
        AgentStatus {
            agent_id: "agent-1".to_string(),
            state: AgentLifecycleState::Online,
            instance_id: "i-1".to_string(),
            internal_uri: "fake://apple/".to_string(),
            external_uri: "fake://apple/".to_string(),
            location: "/zone-a".to_string(),
            instance_type: "t1.small".to_string(),
            slots,
            resources: capacity,
        }
    }

    #[test]
    fn reserve_until_full() {
        let mut ledger = AgentLedger::new("agent-1", Resources::from([("cpu", 2), ("memory", 1024)]));

        let r1 = ledger.try_reserve(&apple());
        let r2 = ledger.try_reserve(&apple());
        let r3 = ledger.try_reserve(&apple());

        assert!(r1.is_some());
        assert!(r2.is_some());
        assert!(r3.is_none());
        assert_eq!(ledger.available(), Resources::from([("cpu", 0), ("memory", 0)]));

        ledger.cancel(r1.unwrap());
        ledger.cancel(r2.unwrap());
    }

    #[test]
    fn cancel_returns_capacity() {
        let mut ledger = AgentLedger::new("agent-1", apple());
        let r = ledger.try_reserve(&apple()).unwrap();
        assert!(ledger.try_reserve(&apple()).is_none());

        ledger.cancel(r);
        assert!(ledger.try_reserve(&apple()).is_some());
    }

    #[test]
    fn commit_keeps_debit() {
        let mut ledger = AgentLedger::new("agent-1", apple());
        let r = ledger.try_reserve(&apple()).unwrap();
        ledger.commit(r, slot(apple()), Instant::now());

        assert!(ledger.try_reserve(&apple()).is_none());
        assert_eq!(ledger.unconfirmed().len(), 1);
    }

    #[test]
    fn empty_capacity_rejects_demand() {
        let mut ledger = AgentLedger::new("agent-1", Resources::new());
        assert!(ledger.try_reserve(&apple()).is_none());
    }

    #[test]
    fn seeded_from_status_counts_existing_slots() {
        let agent = status(apple(), vec![slot(apple())]);
        let mut ledger = AgentLedger::from_status(&agent);
        assert!(ledger.try_reserve(&apple()).is_none());
    }

    #[test]
    fn over_capacity_agent_accepts_demand_in_other_dimensions() {
        let capacity = Resources::from([("cpu", 8), ("memory", 1024)]);
        let agent = status(capacity, vec![slot(Resources::from([("memory", 2048)]))]);
        let mut ledger = AgentLedger::from_status(&agent);

        let cpu_only = Resources::from([("cpu", 1)]);
        assert!(ledger.try_reserve(&cpu_only).is_some());
        assert!(ledger.try_reserve(&apple()).is_none());
    }

    #[test]
    fn release_credits_back() {
        let existing = slot(apple());
        let agent = status(apple(), vec![existing.clone()]);
        let mut ledger = AgentLedger::from_status(&agent);

        assert!(ledger.release(existing.id));
        assert!(!ledger.release(existing.id));
        assert!(ledger.try_reserve(&apple()).is_some());
    }

    #[test]
    fn reconcile_confirms_reported_slot() {
        let mut ledger = AgentLedger::new("agent-1", apple());
        let r = ledger.try_reserve(&apple()).unwrap();
        let created = slot(apple());
        ledger.commit(r, created.clone(), Instant::now());

        let unconfirmed = ledger.reconcile(&status(apple(), vec![created]), Instant::now());
        assert!(unconfirmed.is_empty());
        // Still debited, now as observed.
        assert!(ledger.try_reserve(&apple()).is_none());
    }

    #[test]
    fn reconcile_keeps_slot_created_after_fetch_started() {
        let fetch_started = Instant::now();
        let mut ledger = AgentLedger::new("agent-1", apple());
        let r = ledger.try_reserve(&apple()).unwrap();
        ledger.commit(r, slot(apple()), fetch_started + Duration::from_millis(10));

        let unconfirmed = ledger.reconcile(&status(apple(), Vec::new()), fetch_started);
        assert_eq!(unconfirmed.len(), 1);
        assert!(ledger.try_reserve(&apple()).is_none());
    }

    #[test]
    fn reconcile_drops_slot_missing_from_newer_status() {
        let created_at = Instant::now();
        let mut ledger = AgentLedger::new("agent-1", apple());
        let r = ledger.try_reserve(&apple()).unwrap();
        ledger.commit(r, slot(apple()), created_at);

        let unconfirmed = ledger.reconcile(
            &status(apple(), Vec::new()),
            created_at + Duration::from_millis(10),
        );
        assert!(unconfirmed.is_empty());
        assert!(ledger.try_reserve(&apple()).is_some());
    }

    #[test]
    fn reconcile_keeps_pending_reservations() {
        let mut ledger = AgentLedger::new("agent-1", apple());
        let r = ledger.try_reserve(&apple()).unwrap();

        ledger.reconcile(&status(apple(), Vec::new()), Instant::now());
        assert!(ledger.try_reserve(&apple()).is_none());

        ledger.cancel(r);
    }

    #[test]
    fn reconcile_updates_capacity() {
        let mut ledger = AgentLedger::new("agent-1", Resources::new());
        ledger.reconcile(&status(apple(), Vec::new()), Instant::now());
        assert_eq!(ledger.capacity(), &apple());
        assert!(ledger.try_reserve(&apple()).is_some());
    }
}
