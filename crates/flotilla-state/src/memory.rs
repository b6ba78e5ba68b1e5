//! Non-durable state manager held entirely in memory.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use flotilla_core::SlotId;

use crate::error::{StateError, StateResult};
use crate::types::ExpectedSlotStatus;
use crate::StateManager;

/// In-memory [`StateManager`]. Contents are lost on restart.
#[derive(Clone, Default)]
pub struct InMemoryStateManager {
    entries: Arc<RwLock<HashMap<SlotId, ExpectedSlotStatus>>>,
}

impl InMemoryStateManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateManager for InMemoryStateManager {
    fn record_expected(&self, expected: &ExpectedSlotStatus) -> StateResult<()> {
        let mut entries = self.entries.write().map_err(|_| StateError::Poisoned)?;
        entries.insert(expected.id, expected.clone());
        debug!(slot_id = %expected.id, state = %expected.state, "expected state recorded");
        Ok(())
    }

    fn get_expected(&self, slot_id: SlotId) -> StateResult<Option<ExpectedSlotStatus>> {
        let entries = self.entries.read().map_err(|_| StateError::Poisoned)?;
        Ok(entries.get(&slot_id).cloned())
    }

    fn delete_expected(&self, slot_id: SlotId) -> StateResult<bool> {
        let mut entries = self.entries.write().map_err(|_| StateError::Poisoned)?;
        Ok(entries.remove(&slot_id).is_some())
    }

    fn list_expected(&self) -> StateResult<Vec<ExpectedSlotStatus>> {
        let entries = self.entries.read().map_err(|_| StateError::Poisoned)?;
        Ok(entries.values().cloned().collect())
    }
}
