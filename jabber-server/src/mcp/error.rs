//! MCP error types and JSON-RPC mapping
//!
//! Protocol-level failures use the standard JSON-RPC codes. Application
//! failures (back-pressure, resolution, connection state) all map to
//! `-32603` with a structured `data.kind` the caller can branch on.

use std::io;

use jabber_protocol::{ErrorKind, JsonRpcError};

/// MCP dispatcher errors
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// IO error (stdin/stdout)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Method not found
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Unknown tool name in tools/call
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Invalid parameters
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Application error surfaced with a structured kind
    #[error("{message}")]
    App {
        kind: ErrorKind,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl McpError {
    /// Application error with just a kind and message
    pub fn app(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::App {
            kind,
            message: message.into(),
            data: None,
        }
    }

    /// Application error carrying extra structured data (e.g. candidates)
    pub fn app_with_data(
        kind: ErrorKind,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self::App {
            kind,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl From<McpError> for JsonRpcError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::MethodNotFound(method) => JsonRpcError::new(
                JsonRpcError::METHOD_NOT_FOUND,
                format!("Method not found: {}", method),
            ),
            McpError::UnknownTool(name) => JsonRpcError::new(
                JsonRpcError::METHOD_NOT_FOUND,
                format!("Unknown tool: {}", name),
            ),
            McpError::InvalidParams(msg) => {
                JsonRpcError::new(JsonRpcError::INVALID_PARAMS, msg)
            }
            McpError::App {
                kind,
                message,
                data,
            } => {
                let mut payload = serde_json::Map::new();
                payload.insert("kind".into(), serde_json::json!(kind.as_str()));
                if let Some(serde_json::Value::Object(extra)) = data {
                    payload.extend(extra);
                }
                JsonRpcError::with_data(
                    JsonRpcError::INTERNAL_ERROR,
                    message,
                    serde_json::Value::Object(payload),
                )
            }
            McpError::Json(err) => JsonRpcError::new(
                JsonRpcError::PARSE_ERROR,
                format!("JSON error: {}", err),
            ),
            McpError::Io(err) => JsonRpcError::new(
                JsonRpcError::INTERNAL_ERROR,
                format!("IO error: {}", err),
            ),
            McpError::Internal(msg) => JsonRpcError::new(JsonRpcError::INTERNAL_ERROR, msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_not_found_code() {
        let err: JsonRpcError = McpError::MethodNotFound("nope".into()).into();
        assert_eq!(err.code, JsonRpcError::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_invalid_params_code() {
        let err: JsonRpcError = McpError::InvalidParams("missing alias".into()).into();
        assert_eq!(err.code, JsonRpcError::INVALID_PARAMS);
    }

    #[test]
    fn test_app_error_carries_kind() {
        let err: JsonRpcError =
            McpError::app(ErrorKind::Overloaded, "queue full").into();
        assert_eq!(err.code, JsonRpcError::INTERNAL_ERROR);
        assert_eq!(err.data.unwrap()["kind"], "overloaded");
    }

    #[test]
    fn test_app_error_merges_data() {
        let err: JsonRpcError = McpError::app_with_data(
            ErrorKind::AmbiguousAlias,
            "ambiguous",
            serde_json::json!({"candidates": [{"alias": "a"}]}),
        )
        .into();
        let data = err.data.unwrap();
        assert_eq!(data["kind"], "ambiguous_alias");
        assert!(data["candidates"].is_array());
    }
}
