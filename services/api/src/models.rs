//! API Models
//!
//! Request/response bodies for the REST mirror and the JSON-RPC envelope,
//! annotated for OpenAPI generation with `utoipa`.

use chorus_core::capability::AgentDescriptor;
use chorus_core::events::SessionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error codes used by the envelope.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const AGENT_NOT_FOUND: i32 = -32001;
    pub const TASK_NOT_FOUND: i32 = -32002;
    pub const NO_PROVIDER: i32 = -32003;
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    pub message: String,
}

#[derive(Deserialize, Serialize, ToSchema, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SendTaskPayload {
    #[schema(example = "play_by_mood")]
    pub skill_id: String,
    #[serde(default)]
    #[schema(value_type = Object, example = json!({"mood": "happy"}))]
    pub input: Value,
    #[schema(value_type = String, example = "0f9b1c1e-session")]
    pub session_id: SessionId,
}

#[derive(Deserialize, Serialize, ToSchema, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TaskIdParams {
    pub task_id: Uuid,
}

#[derive(Deserialize, Serialize, ToSchema, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdParams {
    #[schema(example = "playback")]
    pub agent_id: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct AgentList {
    pub agents: Vec<AgentDescriptor>,
}

#[derive(Deserialize, Serialize, ToSchema, Debug, Clone)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub id: Value,
    #[schema(example = "tasks/send")]
    pub method: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub params: Value,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[schema(value_type = Object)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_response_serialization() {
        let error = ErrorResponse {
            message: "Task not found".to_string(),
        };

        let json = serde_json::to_string(&error).unwrap();
        assert_eq!(json, r#"{"message":"Task not found"}"#);
    }

    #[test]
    fn test_send_task_payload_deserialization() {
        let json = r#"{"skillId": "play_by_mood", "input": {"mood": "happy"}, "sessionId": "s1"}"#;
        let payload: SendTaskPayload = serde_json::from_str(json).unwrap();

        assert_eq!(payload.skill_id, "play_by_mood");
        assert_eq!(payload.input, json!({ "mood": "happy" }));
        assert_eq!(payload.session_id, SessionId::new("s1"));
    }

    #[test]
    fn test_send_task_payload_input_defaults_to_null() {
        let payload: SendTaskPayload =
            serde_json::from_str(r#"{"skillId": "skip_track", "sessionId": "s1"}"#).unwrap();
        assert_eq!(payload.input, Value::Null);
    }

    #[test]
    fn test_send_task_payload_missing_field() {
        let result: Result<SendTaskPayload, _> = serde_json::from_str(r#"{"input": {}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_task_id_params_rejects_non_uuid() {
        let result: Result<TaskIdParams, _> = serde_json::from_str(r#"{"taskId": "nope"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_rpc_response_omits_absent_members() {
        let ok = serde_json::to_value(JsonRpcResponse::success(json!(1), json!({ "a": 1 }))).unwrap();
        assert_eq!(ok, json!({ "jsonrpc": "2.0", "id": 1, "result": { "a": 1 } }));

        let err = serde_json::to_value(JsonRpcResponse::failure(
            json!("x"),
            JsonRpcError::new(error_codes::METHOD_NOT_FOUND, "Method not found"),
        ))
        .unwrap();
        assert_eq!(
            err,
            json!({
                "jsonrpc": "2.0",
                "id": "x",
                "error": { "code": -32601, "message": "Method not found" }
            })
        );
    }

    #[test]
    fn test_rpc_request_defaults() {
        let request: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc": "2.0", "method": "agents/list"}"#).unwrap();
        assert_eq!(request.id, Value::Null);
        assert_eq!(request.params, Value::Null);
    }
}
