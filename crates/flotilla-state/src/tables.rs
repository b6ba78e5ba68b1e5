//! redb table definitions for the durable state manager.
//!
//! Keys are hyphenated slot UUIDs, values JSON-serialized records.

use redb::TableDefinition;

/// Expected slot state keyed by `{slot_id}`.
pub const EXPECTED_SLOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("expected_slots");
