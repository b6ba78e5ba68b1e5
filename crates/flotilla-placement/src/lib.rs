//! Flotilla placement — resource accounting for slot installs.
//!
//! This crate holds the synchronous half of placement. It does NOT talk
//! to agents (that's `flotilla-coordinator`). Instead, it decides which
//! agents are eligible and keeps the books on what each agent has left.
//!
//! # Components
//!
//! - **`candidates`** — eligible agents in deterministic order
//! - **`ledger`** — per-agent capacity, reservations, and reconciliation

pub mod candidates;
pub mod ledger;

pub use candidates::select_candidates;
pub use ledger::{AgentLedger, Reservation};
