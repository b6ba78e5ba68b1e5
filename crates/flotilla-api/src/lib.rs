//! flotilla-api — REST API for Flotilla.
//!
//! Provides axum route handlers that forward to a shared
//! [`Coordinator`]. No state lives here beyond the coordinator handle.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/v1/slot` | List slots matching a slot filter |
//! | DELETE | `/v1/slot` | Terminate slots matching a slot filter |
//! | POST | `/v1/slot/assignment` | Install an assignment (`limit`, agent filter) |
//! | PUT | `/v1/slot/lifecycle` | Start, stop, restart, or kill matching slots |
//! | GET | `/v1/agent` | List agents matching an agent filter |
//! | POST | `/v1/admin/agent` | Provision agents |
//! | DELETE | `/v1/admin/agent/{agent_id}` | Terminate an agent's instance |
//! | GET | `/v1/admin/coordinator` | List coordinator instances |
//! | POST | `/v1/admin/coordinator` | Provision coordinators |
//! | POST | `/v1/admin/refresh` | Refresh agent status now |

pub mod handlers;
pub mod representation;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};

use flotilla_coordinator::Coordinator;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<Coordinator>,
}

/// Build the complete API router.
pub fn build_router(coordinator: Arc<Coordinator>) -> Router {
    let api_state = ApiState { coordinator };

    let api_routes = Router::new()
        .route("/slot", get(handlers::list_slots).delete(handlers::terminate_slots))
        .route("/slot/assignment", post(handlers::install))
        .route("/slot/lifecycle", put(handlers::set_lifecycle))
        .route("/agent", get(handlers::list_agents))
        .route("/admin/agent", post(handlers::provision_agents))
        .route("/admin/agent/{agent_id}", delete(handlers::terminate_agent))
        .route(
            "/admin/coordinator",
            get(handlers::list_coordinators).post(handlers::provision_coordinators),
        )
        .route("/admin/refresh", post(handlers::refresh))
        .with_state(api_state);

    Router::new().nest("/v1", api_routes)
}
