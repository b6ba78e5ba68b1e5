//! Coordinator error types.

use thiserror::Error;

use crate::provisioner::ProvisionerError;
use crate::repository::RepositoryError;

/// Errors surfaced by [`Coordinator`](crate::Coordinator) operations.
///
/// Per-agent call failures are logged and skipped, never returned.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("provisioning failed: {0}")]
    Provisioning(#[from] ProvisionerError),

    #[error("unresolvable assignment: {0}")]
    Unresolvable(#[from] RepositoryError),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("state store error: {0}")]
    State(#[from] flotilla_state::StateError),
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
