//! REST API handlers.
//!
//! Handlers only translate between HTTP and [`Coordinator`] calls. Every
//! successful call answers with a plain JSON array; failures use the
//! `{"success": false, "error": "..."}` envelope.

use std::collections::HashMap;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use flotilla_core::{AgentFilter, Assignment, SlotAction, SlotFilter, SlotId, SlotStatus};
use flotilla_coordinator::{
    Coordinator, CoordinatorError, ExpectedSlotStatus, ProvisionRequest,
};

use crate::ApiState;
use crate::representation::{AgentRepresentation, SlotRepresentation};

/// Decoded query string, repeated keys kept in order.
pub type QueryPairs = Vec<(String, String)>;

/// Error envelope.
#[derive(serde::Serialize)]
struct ApiResponse {
    success: bool,
    error: String,
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse {
            success: false,
            error: msg.to_string(),
        }),
    )
        .into_response()
}

fn coordinator_error(e: CoordinatorError) -> Response {
    let status = match &e {
        CoordinatorError::Unresolvable(_) | CoordinatorError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        CoordinatorError::AgentNotFound(_) => StatusCode::NOT_FOUND,
        CoordinatorError::Provisioning(_) => StatusCode::BAD_GATEWAY,
        CoordinatorError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(error = %e, %status, "request failed");
    }
    error_response(&e.to_string(), status)
}

fn bad_request(msg: impl std::fmt::Display) -> Response {
    error_response(&msg.to_string(), StatusCode::BAD_REQUEST)
}

fn pairs(query: &QueryPairs) -> impl Iterator<Item = (&str, &str)> {
    query.iter().map(|(k, v)| (k.as_str(), v.as_str()))
}

fn slot_filter(query: Result<Query<QueryPairs>, QueryRejection>) -> Result<SlotFilter, Response> {
    let Query(query) = query.map_err(|e| bad_request(e.body_text()))?;
    SlotFilter::from_query(pairs(&query)).map_err(bad_request)
}

/// Expectations for the slots being returned. A store failure only costs
/// the `expectedStatus` fields.
fn expected(coordinator: &Coordinator, slots: &[SlotStatus]) -> HashMap<SlotId, ExpectedSlotStatus> {
    coordinator.expected_states(slots).unwrap_or_else(|e| {
        warn!(error = %e, "expected state unavailable");
        HashMap::new()
    })
}

fn slots_response(coordinator: &Coordinator, slots: &[SlotStatus]) -> Response {
    Json(SlotRepresentation::from_slots(slots, &expected(coordinator, slots))).into_response()
}

// ── Slots ──────────────────────────────────────────────────────

/// GET /v1/slot
pub async fn list_slots(
    State(state): State<ApiState>,
    query: Result<Query<QueryPairs>, QueryRejection>,
) -> Response {
    let filter = match slot_filter(query) {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let slots = state.coordinator.query(&filter).await;
    slots_response(&state.coordinator, &slots)
}

/// POST /v1/slot/assignment
pub async fn install(
    State(state): State<ApiState>,
    query: Result<Query<QueryPairs>, QueryRejection>,
    body: Result<Json<Assignment>, JsonRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(e) => return bad_request(e.body_text()),
    };
    let Json(assignment) = match body {
        Ok(b) => b,
        Err(e) => return bad_request(e.body_text()),
    };

    let mut limit = 1;
    let mut rest = Vec::with_capacity(query.len());
    for (key, value) in pairs(&query) {
        if key == "limit" {
            limit = match value.parse::<usize>() {
                Ok(n) => n,
                Err(_) => return bad_request(format!("invalid limit: {value}")),
            };
        } else {
            rest.push((key, value));
        }
    }
    let filter = match AgentFilter::from_query(rest) {
        Ok(f) => f,
        Err(e) => return bad_request(e),
    };

    match state.coordinator.install(&assignment, limit, &filter).await {
        Ok(slots) => slots_response(&state.coordinator, &slots),
        Err(e) => coordinator_error(e),
    }
}

/// PUT /v1/slot/lifecycle
///
/// The body is the action, either bare (`start`) or as a JSON string.
pub async fn set_lifecycle(
    State(state): State<ApiState>,
    query: Result<Query<QueryPairs>, QueryRejection>,
    body: String,
) -> Response {
    let filter = match slot_filter(query) {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let action: SlotAction = match body.trim().trim_matches('"').parse() {
        Ok(a) => a,
        Err(e) => return bad_request(e),
    };

    match state.coordinator.set_state(&filter, action).await {
        Ok(slots) => slots_response(&state.coordinator, &slots),
        Err(e) => coordinator_error(e),
    }
}

/// DELETE /v1/slot
pub async fn terminate_slots(
    State(state): State<ApiState>,
    query: Result<Query<QueryPairs>, QueryRejection>,
) -> Response {
    let filter = match slot_filter(query) {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    match state.coordinator.terminate(&filter).await {
        // Expected state is gone by now; represent without it.
        Ok(slots) => Json(SlotRepresentation::from_slots(&slots, &HashMap::new())).into_response(),
        Err(e) => coordinator_error(e),
    }
}

// ── Agents ─────────────────────────────────────────────────────

/// GET /v1/agent
pub async fn list_agents(
    State(state): State<ApiState>,
    query: Result<Query<QueryPairs>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(e) => return bad_request(e.body_text()),
    };
    let filter = match AgentFilter::from_query(pairs(&query)) {
        Ok(f) => f,
        Err(e) => return bad_request(e),
    };
    let agents = state.coordinator.agents(&filter).await;
    Json(AgentRepresentation::from_agents(&agents)).into_response()
}

// ── Admin ──────────────────────────────────────────────────────

fn provision_request(body: Result<Json<ProvisionRequest>, JsonRejection>) -> Result<ProvisionRequest, Response> {
    match body {
        Ok(Json(req)) => Ok(req),
        // An empty body means "one instance with defaults".
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(ProvisionRequest::default()),
        Err(e) => Err(bad_request(e.body_text())),
    }
}

/// POST /v1/admin/agent
pub async fn provision_agents(
    State(state): State<ApiState>,
    body: Result<Json<ProvisionRequest>, JsonRejection>,
) -> Response {
    let request = match provision_request(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.coordinator.provision_agents(&request).await {
        Ok(instances) => Json(instances).into_response(),
        Err(e) => coordinator_error(e),
    }
}

/// POST /v1/admin/coordinator
pub async fn provision_coordinators(
    State(state): State<ApiState>,
    body: Result<Json<ProvisionRequest>, JsonRejection>,
) -> Response {
    let request = match provision_request(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match state.coordinator.provision_coordinators(&request).await {
        Ok(instances) => Json(instances).into_response(),
        Err(e) => coordinator_error(e),
    }
}

/// GET /v1/admin/coordinator
pub async fn list_coordinators(State(state): State<ApiState>) -> Response {
    match state.coordinator.list_coordinators().await {
        Ok(instances) => Json(instances).into_response(),
        Err(e) => coordinator_error(e),
    }
}

/// DELETE /v1/admin/agent/{agent_id}
pub async fn terminate_agent(
    State(state): State<ApiState>,
    Path(agent_id): Path<String>,
) -> Response {
    match state.coordinator.terminate_agent(&agent_id).await {
        Ok(agent) => Json(AgentRepresentation::from_agents(std::slice::from_ref(&agent))).into_response(),
        Err(e) => coordinator_error(e),
    }
}

/// POST /v1/admin/refresh
pub async fn refresh(State(state): State<ApiState>) -> Response {
    match state.coordinator.refresh().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => coordinator_error(e),
    }
}
