//! DurableStateManager — redb-backed expected-state persistence.
//!
//! Values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use flotilla_core::SlotId;

use crate::StateManager;
use crate::error::{StateError, StateResult};
use crate::tables::EXPECTED_SLOTS;
use crate::types::ExpectedSlotStatus;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe [`StateManager`] backed by redb.
#[derive(Clone)]
pub struct DurableStateManager {
    db: Arc<Database>,
}

impl DurableStateManager {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory redb database (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(EXPECTED_SLOTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

impl StateManager for DurableStateManager {
    fn record_expected(&self, expected: &ExpectedSlotStatus) -> StateResult<()> {
        let key = expected.table_key();
        let value = serde_json::to_vec(expected).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(EXPECTED_SLOTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, state = %expected.state, "expected state stored");
        Ok(())
    }

    fn get_expected(&self, slot_id: SlotId) -> StateResult<Option<ExpectedSlotStatus>> {
        let key = slot_id.to_string();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EXPECTED_SLOTS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let expected: ExpectedSlotStatus =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(expected))
            }
            None => Ok(None),
        }
    }

    fn delete_expected(&self, slot_id: SlotId) -> StateResult<bool> {
        let key = slot_id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(EXPECTED_SLOTS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "expected state deleted");
        Ok(existed)
    }

    fn list_expected(&self) -> StateResult<Vec<ExpectedSlotStatus>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EXPECTED_SLOTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let expected: ExpectedSlotStatus =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(expected);
        }
        Ok(results)
    }
}
