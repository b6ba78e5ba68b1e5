//! Records held by the state manager.

use serde::{Deserialize, Serialize};

use flotilla_core::{Assignment, SlotId, SlotLifecycleState};

/// What the coordinator last asked a slot to be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedSlotStatus {
    pub id: SlotId,
    pub state: SlotLifecycleState,
    pub assignment: Option<Assignment>,
}

impl ExpectedSlotStatus {
    pub fn new(id: SlotId, state: SlotLifecycleState, assignment: Option<Assignment>) -> Self {
        Self {
            id,
            state,
            assignment,
        }
    }

    /// Build the key for the expected-slots table.
    pub fn table_key(&self) -> String {
        self.id.to_string()
    }
}
