//! Axum Handlers for the REST API
//!
//! A REST mirror of the JSON-RPC task and agent methods, plus the agent card
//! discovery endpoint. It uses `utoipa` doc comments to generate OpenAPI
//! documentation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chorus_core::capability::AgentDescriptor;
use chorus_core::task::{Task, TaskError};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::{
    models::{AgentList, ErrorResponse, SendTaskPayload},
    state::{AGENT_NAME, AppState},
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Conflict(message) => {
                (StatusCode::CONFLICT, Json(ErrorResponse { message })).into_response()
            }
        }
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        debug!(error = %err, "Task request rejected");
        match err {
            TaskError::NotFound(_) => ApiError::NotFound(err.to_string()),
            TaskError::IllegalTransition { .. } => ApiError::Conflict(err.to_string()),
        }
    }
}

/// Create a task and run it to completion.
///
/// A skill that fails still answers 201; the failure is recorded on the task.
#[utoipa::path(
    post,
    path = "/tasks",
    request_body = SendTaskPayload,
    responses(
        (status = 201, description = "Task created and dispatched", body = Task),
        (status = 400, description = "No provider declares the skill", body = ErrorResponse)
    ),
    tag = "Tasks"
)]
pub async fn send_task(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SendTaskPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let orchestrator = &state.orchestrator;
    if !orchestrator.registry.has_skill(&payload.skill_id) {
        return Err(ApiError::BadRequest(format!(
            "No provider for skill: {}",
            payload.skill_id
        )));
    }
    let task = orchestrator
        .tasks
        .send(payload.skill_id, payload.input, payload.session_id)
        .await;
    Ok((StatusCode::CREATED, Json(task)))
}

/// Get a task by id.
#[utoipa::path(
    get,
    path = "/tasks/{id}",
    responses(
        (status = 200, description = "Task details", body = Task),
        (status = 404, description = "Task not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Task ID")
    ),
    tag = "Tasks"
)]
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.orchestrator.tasks.get_task(id)?))
}

/// Cancel a task that has not finished yet.
#[utoipa::path(
    post,
    path = "/tasks/{id}/cancel",
    responses(
        (status = 200, description = "Task canceled", body = Task),
        (status = 404, description = "Task not found", body = ErrorResponse),
        (status = 409, description = "Task already finished", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Task ID")
    ),
    tag = "Tasks"
)]
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.orchestrator.tasks.cancel(id)?))
}

/// List the orchestrator's own card followed by every registered provider.
#[utoipa::path(
    get,
    path = "/agents",
    responses(
        (status = 200, description = "Orchestrator and registered providers", body = AgentList)
    ),
    tag = "Agents"
)]
pub async fn list_agents(State(state): State<Arc<AppState>>) -> Json<AgentList> {
    Json(AgentList {
        agents: state.agents(),
    })
}

/// Get one provider's agent card.
#[utoipa::path(
    get,
    path = "/agents/{id}",
    responses(
        (status = 200, description = "Agent card", body = AgentDescriptor),
        (status = 404, description = "Agent not found", body = ErrorResponse)
    ),
    params(
        ("id" = String, Path, description = "Provider name")
    ),
    tag = "Agents"
)]
pub async fn get_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AgentDescriptor>, ApiError> {
    if id == AGENT_NAME {
        return Ok(Json(state.descriptor()));
    }
    state
        .orchestrator
        .registry
        .get_card(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Agent not found: {id}")))
}

/// The orchestrator's own agent card.
#[utoipa::path(
    get,
    path = "/.well-known/agent.json",
    responses(
        (status = 200, description = "Agent card", body = AgentDescriptor)
    ),
    tag = "Agents"
)]
pub async fn agent_card(State(state): State<Arc<AppState>>) -> Json<AgentDescriptor> {
    Json(state.descriptor())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use chorus_core::events::SessionId;
    use chorus_core::task::TaskState;
    use serde_json::json;

    fn payload(skill_id: &str, input: serde_json::Value) -> SendTaskPayload {
        SendTaskPayload {
            skill_id: skill_id.to_string(),
            input,
            session_id: SessionId::new("s1"),
        }
    }

    #[tokio::test]
    async fn test_send_task_returns_created() {
        let state = test_support::app_state();

        let response = send_task(State(state.clone()), Json(payload("play_by_mood", json!({ "mood": "calm" }))))
            .await
            .map(IntoResponse::into_response)
            .unwrap_or_else(IntoResponse::into_response);

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(state.orchestrator.tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_send_task_unknown_skill_is_bad_request() {
        let state = test_support::app_state();

        let response = send_task(State(state), Json(payload("teleport", json!({}))))
            .await
            .map(IntoResponse::into_response)
            .unwrap_or_else(IntoResponse::into_response);

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_and_cancel_task() {
        let state = test_support::app_state();
        let task = state
            .orchestrator
            .tasks
            .create_task("pause_playback", json!({}), SessionId::new("s1"));

        let Json(found) = get_task(State(state.clone()), Path(task.id)).await.ok().unwrap();
        assert_eq!(found.state, TaskState::Submitted);

        let Json(canceled) = cancel_task(State(state.clone()), Path(task.id)).await.ok().unwrap();
        assert_eq!(canceled.state, TaskState::Canceled);

        let conflict = cancel_task(State(state.clone()), Path(task.id))
            .await
            .unwrap_err()
            .into_response();
        assert_eq!(conflict.status(), StatusCode::CONFLICT);

        let missing = get_task(State(state), Path(Uuid::now_v7()))
            .await
            .unwrap_err()
            .into_response();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_agent_lookup() {
        let state = test_support::app_state();

        let Json(list) = list_agents(State(state.clone())).await;
        let names: Vec<_> = list.agents.iter().map(|card| card.name.as_str()).collect();
        assert_eq!(names, vec![AGENT_NAME, "playback"]);

        // Every listed name resolves by id.
        for name in names {
            assert!(get_agent(State(state.clone()), Path(name.to_string())).await.is_ok());
        }

        let Json(card) = get_agent(State(state.clone()), Path("playback".to_string()))
            .await
            .ok()
            .unwrap();
        assert_eq!(card.skills.len(), 4);

        let missing = get_agent(State(state.clone()), Path("radio".to_string()))
            .await
            .unwrap_err()
            .into_response();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let Json(own) = agent_card(State(state)).await;
        assert_eq!(own.name, AGENT_NAME);
        assert_eq!(own.default_input_modes, vec!["audio".to_string(), "text".to_string()]);
    }
}
