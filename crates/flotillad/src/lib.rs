//! flotillad — the Flotilla coordinator daemon.
//!
//! Reads `flotilla.toml`, wires the coordinator to its backends, serves
//! the REST API and keeps agent status fresh in the background.

pub mod config;
pub mod daemon;
