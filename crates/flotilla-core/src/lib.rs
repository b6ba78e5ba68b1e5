//! flotilla-core — shared domain model for the Flotilla fleet coordinator.
//!
//! Every other crate in the workspace speaks in these types:
//!
//! - **`types`** — instances, agents, slots, assignments, resources
//! - **`prefix`** — shortest-unique-prefix display helper
//! - **`filter`** — glob-based slot and agent filters

pub mod error;
pub mod filter;
pub mod prefix;
pub mod types;

pub use error::{CoreError, CoreResult};
pub use filter::{AgentFilter, Glob, SlotFilter};
pub use prefix::{MIN_PREFIX_SIZE, shortest_unique_prefix};
pub use types::*;
