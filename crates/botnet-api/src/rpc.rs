//! JSON-RPC 2.0 envelopes and the error mapping used on the wire.

use axum::http::StatusCode;
use botnet_types::error::{codes, BotNetError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

impl RpcRequest {
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
            id: Value::String(uuid::Uuid::new_v4().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(default)]
    pub id: Value,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Error response. Internal failures carry no detail.
    pub fn failure(id: Value, err: &BotNetError) -> Self {
        let data = match err {
            BotNetError::RateLimited { retry_after } => {
                Some(serde_json::json!({ "retry_after_secs": retry_after_secs(*retry_after) }))
            }
            BotNetError::FriendshipConflict { current, attempted } => {
                Some(serde_json::json!({ "current": current, "attempted": attempted }))
            }
            _ => None,
        };
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(RpcError {
                code: err.code(),
                message: err.public_message(),
                data,
            }),
            id,
        }
    }
}

/// Whole seconds to wait, never zero.
pub fn retry_after_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}

/// HTTP status carrying an error.
pub fn http_status(err: &BotNetError) -> StatusCode {
    match err {
        BotNetError::MalformedRequest(_) | BotNetError::DomainInvalid(_) => StatusCode::BAD_REQUEST,
        BotNetError::MethodNotFound(_) => StatusCode::NOT_FOUND,
        BotNetError::AuthRequired(_)
        | BotNetError::InvalidToken(_)
        | BotNetError::TokenExpired(_) => StatusCode::UNAUTHORIZED,
        BotNetError::PermissionDenied(_) | BotNetError::ChallengeFailed(_) => StatusCode::FORBIDDEN,
        BotNetError::FriendshipConflict { .. } => StatusCode::CONFLICT,
        BotNetError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        BotNetError::Storage(_) | BotNetError::Config(_) | BotNetError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Rebuild a typed error from a remote node's error object.
pub fn remote_error(err: RpcError) -> BotNetError {
    let RpcError {
        code,
        message,
        data,
    } = err;
    let field = |key: &str| {
        data.as_ref()
            .and_then(|d| d.get(key))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    match code {
        codes::MALFORMED_REQUEST => BotNetError::MalformedRequest(message),
        codes::METHOD_NOT_FOUND => BotNetError::MethodNotFound(message),
        codes::AUTH_REQUIRED => BotNetError::AuthRequired(message),
        codes::INVALID_TOKEN => BotNetError::InvalidToken(message),
        codes::TOKEN_EXPIRED => BotNetError::TokenExpired(message),
        codes::PERMISSION_DENIED => BotNetError::PermissionDenied(message),
        codes::DOMAIN_INVALID => BotNetError::DomainInvalid(message),
        codes::CHALLENGE_FAILED => BotNetError::ChallengeFailed(message),
        codes::FRIENDSHIP_CONFLICT => BotNetError::conflict(field("current"), field("attempted")),
        codes::RATE_LIMITED => BotNetError::RateLimited {
            retry_after: Duration::from_secs(
                data.as_ref()
                    .and_then(|d| d.get("retry_after_secs"))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(1),
            ),
        },
        _ => BotNetError::Internal(format!("remote error {code}: {message}")),
    }
}
