//! flotilla-state — expected (desired) slot state for the coordinator.
//!
//! The coordinator records what it asked each slot to do, and consults
//! those records when reporting slots whose observed state has drifted.
//!
//! Two backends implement [`StateManager`]:
//!
//! - [`InMemoryStateManager`] — non-durable, for tests and local runs
//! - [`DurableStateManager`] — backed by [redb](https://docs.rs/redb),
//!   survives coordinator restarts
//!
//! Both are `Clone` + `Send` + `Sync` and can be shared across tasks.

pub mod error;
pub mod memory;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use memory::InMemoryStateManager;
pub use store::DurableStateManager;
pub use types::ExpectedSlotStatus;

use flotilla_core::SlotId;

/// Store of expected slot state, keyed by slot id.
pub trait StateManager: Send + Sync {
    /// Insert or replace the expectation for a slot.
    fn record_expected(&self, expected: &ExpectedSlotStatus) -> StateResult<()>;

    fn get_expected(&self, slot_id: SlotId) -> StateResult<Option<ExpectedSlotStatus>>;

    /// Forget a slot. Returns true if an entry existed.
    fn delete_expected(&self, slot_id: SlotId) -> StateResult<bool>;

    fn list_expected(&self) -> StateResult<Vec<ExpectedSlotStatus>>;
}
