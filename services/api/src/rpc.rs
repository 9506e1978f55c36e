//! JSON-RPC 2.0 endpoint over the task manager and capability registry.
//!
//! Protocol problems are reported as JSON-RPC errors and never become task
//! failures. A skill that runs and fails still yields a successful response
//! carrying the failed task.

use crate::models::{
    AgentIdParams, AgentList, JSONRPC_VERSION, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    SendTaskPayload, TaskIdParams, error_codes,
};
use crate::state::{AGENT_NAME, AppState};
use axum::{extract::State, response::Json};
use chorus_core::task::TaskError;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Handle one JSON-RPC 2.0 request.
#[utoipa::path(
    post,
    path = "/rpc",
    request_body = JsonRpcRequest,
    responses(
        (status = 200, description = "JSON-RPC response; protocol errors are carried in `error`", body = JsonRpcResponse)
    ),
    tag = "JSON-RPC"
)]
pub async fn rpc_handler(State(state): State<Arc<AppState>>, body: String) -> Json<JsonRpcResponse> {
    let value: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "Unparseable JSON-RPC body");
            return Json(JsonRpcResponse::failure(
                Value::Null,
                JsonRpcError::new(error_codes::PARSE_ERROR, format!("Parse error: {e}")),
            ));
        }
    };
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let request = match serde_json::from_value::<JsonRpcRequest>(value) {
        Ok(request) => request,
        Err(e) => {
            return Json(JsonRpcResponse::failure(
                id,
                JsonRpcError::new(error_codes::INVALID_REQUEST, format!("Invalid request: {e}")),
            ));
        }
    };
    Json(dispatch(&state, request).await)
}

/// Routes a parsed request to its method.
#[instrument(name = "rpc", skip_all, fields(method = %request.method))]
pub async fn dispatch(state: &AppState, request: JsonRpcRequest) -> JsonRpcResponse {
    let JsonRpcRequest {
        jsonrpc,
        id,
        method,
        params,
    } = request;
    if jsonrpc != JSONRPC_VERSION {
        return JsonRpcResponse::failure(
            id,
            JsonRpcError::new(
                error_codes::INVALID_REQUEST,
                format!("Unsupported jsonrpc version: {jsonrpc}"),
            ),
        );
    }
    match call(state, &method, params).await {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(error) => {
            debug!(code = error.code, message = %error.message, "JSON-RPC call failed");
            JsonRpcResponse::failure(id, error)
        }
    }
}

async fn call(state: &AppState, method: &str, params: Value) -> Result<Value, JsonRpcError> {
    let orchestrator = &state.orchestrator;
    match method {
        "tasks/send" => {
            let SendTaskPayload {
                skill_id,
                input,
                session_id,
            } = parse_params(params)?;
            if !orchestrator.registry.has_skill(&skill_id) {
                return Err(JsonRpcError::new(
                    error_codes::NO_PROVIDER,
                    format!("No provider for skill: {skill_id}"),
                ));
            }
            let task = orchestrator.tasks.send(skill_id, input, session_id).await;
            to_result(&task)
        }
        "tasks/get" => {
            let TaskIdParams { task_id } = parse_params(params)?;
            let task = orchestrator.tasks.get_task(task_id).map_err(task_error)?;
            to_result(&task)
        }
        "tasks/cancel" => {
            let TaskIdParams { task_id } = parse_params(params)?;
            let task = orchestrator.tasks.cancel(task_id).map_err(task_error)?;
            to_result(&task)
        }
        "agents/list" => to_result(&AgentList {
            agents: state.agents(),
        }),
        "agents/get" => {
            let AgentIdParams { agent_id } = parse_params(params)?;
            let card = if agent_id == AGENT_NAME {
                Some(state.descriptor())
            } else {
                orchestrator.registry.get_card(&agent_id)
            };
            match card {
                Some(card) => to_result(&card),
                None => Err(JsonRpcError::new(
                    error_codes::AGENT_NOT_FOUND,
                    format!("Agent not found: {agent_id}"),
                )),
            }
        }
        other => Err(JsonRpcError::new(
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        )),
    }
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, JsonRpcError> {
    serde_json::from_value(params)
        .map_err(|e| JsonRpcError::new(error_codes::INVALID_PARAMS, format!("Invalid params: {e}")))
}

fn to_result<T: Serialize>(value: &T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::new(error_codes::INTERNAL_ERROR, e.to_string()))
}

fn task_error(error: TaskError) -> JsonRpcError {
    let code = match error {
        TaskError::NotFound(_) => error_codes::TASK_NOT_FOUND,
        TaskError::IllegalTransition { .. } => error_codes::INVALID_PARAMS,
    };
    JsonRpcError::new(code, error.to_string())
}
