//! Error taxonomy and wire error codes.
//!
//! Wire codes follow JSON-RPC 2.0 conventions:
//! - -32700 to -32600: Standard JSON-RPC errors
//! - -32099 to -32000: Server errors (agent-specific)
//!
//! Callers always see a typed [`A2AError`]; the variants are never collapsed
//! into a generic failure.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::envelope::ResponseEnvelope;

/// Error codes carried in the `error` body of a response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    // JSON-RPC 2.0 Standard Errors
    /// Invalid JSON was received by the callee.
    ParseError = -32700,
    /// The envelope is not a valid request.
    InvalidRequest = -32600,
    /// The callee does not handle the requested intent.
    IntentNotFound = -32601,
    /// Invalid payload for the intent.
    InvalidParams = -32602,
    /// Internal callee error.
    InternalError = -32603,

    // Agent-specific errors
    /// The requested protocol version is not supported.
    UnsupportedVersion = -32009,
    /// The callee is overloaded or temporarily unavailable.
    Unavailable = -32013,
    /// The callee timed out while processing.
    TaskTimeout = -32014,
    /// The callee rejected the request on domain grounds.
    BusinessRuleRejected = -32020,
}

impl ErrorCode {
    /// Get the default error message for this code.
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid request",
            Self::IntentNotFound => "Intent not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::UnsupportedVersion => "Unsupported protocol version",
            Self::Unavailable => "Agent unavailable",
            Self::TaskTimeout => "Task execution timed out",
            Self::BusinessRuleRejected => "Request rejected",
        }
    }

    /// Look up a known code from its integer value.
    pub fn from_i32(code: i32) -> Option<Self> {
        let known = [
            Self::ParseError,
            Self::InvalidRequest,
            Self::IntentNotFound,
            Self::InvalidParams,
            Self::InternalError,
            Self::UnsupportedVersion,
            Self::Unavailable,
            Self::TaskTimeout,
            Self::BusinessRuleRejected,
        ];
        known.into_iter().find(|c| *c as i32 == code)
    }
}

/// Check if an error code is a client-side error (the caller sent something
/// the callee could not accept).
pub fn is_client_error(code: i32) -> bool {
    matches!(
        code,
        -32700 | // ParseError
        -32600 | // InvalidRequest
        -32601 | // IntentNotFound
        -32602 | // InvalidParams
        -32009   // UnsupportedVersion
    )
}

/// Check if an error code indicates a fault on the target side.
///
/// Only these count against the target's circuit breaker.
pub fn is_target_fault(code: i32) -> bool {
    matches!(
        code,
        -32603 | // InternalError
        -32013 | // Unavailable
        -32014   // TaskTimeout
    )
}

/// Every error the registry, envelope codec and client can surface.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum A2AError {
    /// Malformed envelope or payload. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Raw bytes could not be decoded into an envelope.
    #[error("decode error: {0}")]
    Decode(String),

    /// Registration was rejected.
    #[error("registration error: {0}")]
    Registration(String),

    /// No active agent provides the capability.
    #[error("no active agent provides capability '{capability}'")]
    NoAgentFound { capability: String },

    /// The agent id was never registered or has been deregistered.
    #[error("unknown agent: {agent_id}")]
    UnknownAgent { agent_id: String },

    /// The target's breaker rejected the call without a network attempt.
    #[error("circuit open for target {target}")]
    CircuitOpen { target: String },

    /// The transport did not answer within the attempt timeout.
    #[error("timed out after {timeout:?} calling {target}")]
    TransportTimeout { target: String, timeout: Duration },

    /// The transport could not reach the target.
    #[error("connection to {target} failed: {message}")]
    Connection { target: String, message: String },

    /// The target answered with `status=error`.
    #[error("{target} rejected the request: {}", business_message(.response))]
    Business {
        target: String,
        response: Box<ResponseEnvelope>,
    },

    /// Transient failures persisted until the attempt bound was reached.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<A2AError> },

    /// The caller's deadline passed before a result was available.
    #[error("deadline exceeded after {attempts} attempts")]
    DeadlineExceeded { attempts: u32 },

    /// The registry itself could not be reached or answered garbage.
    #[error("registry error: {0}")]
    Registry(String),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),

    /// The client has been closed.
    #[error("client is closed")]
    Closed,
}

fn business_message(response: &ResponseEnvelope) -> String {
    match &response.error {
        Some(err) => format!("[{}] {}", err.code, err.message),
        None => "unspecified error".to_string(),
    }
}

impl A2AError {
    /// Whether the error is a transient transport-level failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransportTimeout { .. } | Self::Connection { .. } | Self::CircuitOpen { .. }
        )
    }

    /// Stable snake_case tag, used by the registry server's error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Decode(_) => "decode",
            Self::Registration(_) => "registration",
            Self::NoAgentFound { .. } => "no_agent_found",
            Self::UnknownAgent { .. } => "unknown_agent",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::TransportTimeout { .. } => "transport_timeout",
            Self::Connection { .. } => "connection",
            Self::Business { .. } => "business",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::Registry(_) => "registry",
            Self::Config(_) => "config",
            Self::Closed => "closed",
        }
    }

    /// The innermost error, looking through `RetriesExhausted`.
    pub fn root(&self) -> &A2AError {
        match self {
            Self::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for A2AError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
