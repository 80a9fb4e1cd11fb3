//! Shared error types for the BotNet trust layer.
//!
//! Every variant except [`BotNetError::Storage`] and [`BotNetError::Internal`]
//! is an expected, caller-recoverable condition and maps to a stable
//! JSON-RPC error code.

use std::time::Duration;
use thiserror::Error;

/// JSON-RPC error codes, stable across releases.
pub mod codes {
    pub const MALFORMED_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INTERNAL: i32 = -32603;
    pub const AUTH_REQUIRED: i32 = -32001;
    pub const INVALID_TOKEN: i32 = -32002;
    pub const TOKEN_EXPIRED: i32 = -32003;
    pub const PERMISSION_DENIED: i32 = -32004;
    pub const DOMAIN_INVALID: i32 = -32010;
    pub const CHALLENGE_FAILED: i32 = -32011;
    pub const FRIENDSHIP_CONFLICT: i32 = -32012;
    pub const RATE_LIMITED: i32 = -32029;
}

/// Top-level error type for the trust layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BotNetError {
    /// The request could not be parsed or has the wrong shape.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// The method name is not part of the protocol.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// A credential is needed and none was presented.
    #[error("Authentication required: {0}")]
    AuthRequired(String),

    /// The credential has the wrong tier, wrong shape, is unknown or was revoked.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// The credential was valid but its lifetime is over.
    #[error("Token expired: {0}")]
    TokenExpired(String),

    /// The session is valid but lacks the permission the method needs.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The caller exhausted its budget for this method class.
    #[error("Rate limit exceeded, retry after {}s", retry_after.as_secs().max(1))]
    RateLimited {
        /// How long until the next call would be admitted.
        retry_after: Duration,
    },

    /// A dotted peer identifier outside the federation namespace.
    #[error("Invalid peer domain: {0}")]
    DomainInvalid(String),

    /// Domain ownership could not be proven.
    #[error("Domain challenge failed: {0}")]
    ChallengeFailed(String),

    /// The friendship is in a state that does not allow the transition.
    #[error("Friendship in state '{current}' cannot {attempted}")]
    FriendshipConflict {
        /// The current friendship state.
        current: String,
        /// The transition that was attempted.
        attempted: String,
    },

    /// A persistence failure. Never shown to callers.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An internal error occurred. Never shown to callers.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BotNetError {
    /// Stable JSON-RPC code for this error.
    pub fn code(&self) -> i32 {
        match self {
            BotNetError::MalformedRequest(_) => codes::MALFORMED_REQUEST,
            BotNetError::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            BotNetError::AuthRequired(_) => codes::AUTH_REQUIRED,
            BotNetError::InvalidToken(_) => codes::INVALID_TOKEN,
            BotNetError::TokenExpired(_) => codes::TOKEN_EXPIRED,
            BotNetError::PermissionDenied(_) => codes::PERMISSION_DENIED,
            BotNetError::RateLimited { .. } => codes::RATE_LIMITED,
            BotNetError::DomainInvalid(_) => codes::DOMAIN_INVALID,
            BotNetError::ChallengeFailed(_) => codes::CHALLENGE_FAILED,
            BotNetError::FriendshipConflict { .. } => codes::FRIENDSHIP_CONFLICT,
            BotNetError::Storage(_) | BotNetError::Config(_) | BotNetError::Internal(_) => {
                codes::INTERNAL
            }
        }
    }

    /// Whether this error must be logged and hidden from the caller.
    pub fn is_internal(&self) -> bool {
        self.code() == codes::INTERNAL
    }

    /// Message safe to send over the wire. Internal failures are opaque.
    pub fn public_message(&self) -> String {
        if self.is_internal() {
            "Internal error".to_string()
        } else {
            self.to_string()
        }
    }

    /// Shorthand for a [`BotNetError::FriendshipConflict`].
    pub fn conflict(current: impl ToString, attempted: impl Into<String>) -> Self {
        BotNetError::FriendshipConflict {
            current: current.to_string(),
            attempted: attempted.into(),
        }
    }
}

/// Alias for Result with BotNetError.
pub type BotNetResult<T> = Result<T, BotNetError>;
