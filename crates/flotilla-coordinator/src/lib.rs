//! flotilla-coordinator — fleet reconciliation and slot placement.
//!
//! The [`Coordinator`] owns the in-memory view of every agent and slot.
//! It reaches the outside world only through three contracts:
//!
//! - **`provisioner`** — which instances exist ([`Provisioner`])
//! - **`repository`** — what an assignment needs ([`Repository`])
//! - **`agent_client`** — per-agent RPC ([`AgentClient`])
//!
//! plus a [`StateManager`](flotilla_state::StateManager) for expected
//! state. Backends are picked by the caller at construction time.
//!
//! # Architecture
//!
//! ```text
//! Coordinator
//!   ├── Provisioner         (static | simulated)
//!   ├── Repository          (static table)
//!   ├── AgentClientFactory  (http | simulated)
//!   ├── StateManager        (memory | redb)
//!   ├── Arc<Snapshot>       (swapped whole on refresh)
//!   └── AgentLedger per agent (behind its own mutex)
//! ```

pub mod agent_client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod provisioner;
pub mod repository;
pub mod simulated;
pub mod snapshot;

pub use agent_client::{
    AgentClient, AgentClientError, AgentClientFactory, HttpAgentClient, HttpAgentClientFactory,
};
pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use error::{CoordinatorError, CoordinatorResult};
pub use provisioner::{ProvisionRequest, Provisioner, ProvisionerError, StaticProvisioner};
pub use repository::{Repository, RepositoryError, ResolvedAssignment, StaticRepository};
pub use simulated::SimulatedFleet;
pub use snapshot::{AgentEntry, Snapshot};

pub use flotilla_state::ExpectedSlotStatus;
