//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the JSON-RPC and REST surfaces, the WebSocket endpoint, and the
//! OpenAPI documentation.

use crate::{
    handlers,
    models::{
        AgentIdParams, AgentList, ErrorResponse, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
        SendTaskPayload, TaskIdParams,
    },
    rpc,
    state::AppState,
    ws::ws_handler,
};
use chorus_core::capability::{
    AgentCapabilities, AgentDescriptor, ParameterSchema, PropertySchema, Skill,
};
use chorus_core::task::{HistoryEntry, Task, TaskState};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        rpc::rpc_handler,
        handlers::send_task,
        handlers::get_task,
        handlers::cancel_task,
        handlers::list_agents,
        handlers::get_agent,
        handlers::agent_card,
    ),
    components(
        schemas(
            Task, TaskState, HistoryEntry, SendTaskPayload, TaskIdParams, AgentIdParams, AgentList,
            AgentDescriptor, AgentCapabilities, Skill, ParameterSchema, PropertySchema,
            JsonRpcRequest, JsonRpcResponse, JsonRpcError, ErrorResponse
        )
    ),
    tags(
        (name = "JSON-RPC", description = "Task and agent methods over JSON-RPC 2.0"),
        (name = "Tasks", description = "REST mirror of the task methods"),
        (name = "Agents", description = "Capability provider discovery")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/rpc", post(rpc::rpc_handler))
        .route("/tasks", post(handlers::send_task))
        .route("/tasks/{id}", get(handlers::get_task))
        .route("/tasks/{id}/cancel", post(handlers::cancel_task))
        .route("/agents", get(handlers::list_agents))
        .route("/agents/{id}", get(handlers::get_agent))
        .route("/.well-known/agent.json", get(handlers::agent_card))
        .route("/ws", get(ws_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_document_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        for expected in [
            "/rpc",
            "/tasks",
            "/tasks/{id}",
            "/tasks/{id}/cancel",
            "/agents",
            "/agents/{id}",
            "/.well-known/agent.json",
        ] {
            assert!(paths.iter().any(|p| p.as_str() == expected), "missing {expected}");
        }
    }
}
