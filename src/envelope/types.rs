//! Wire types for request and response envelopes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::errors::{is_target_fault, ErrorCode};
use crate::trace::TraceContext;

/// Protocol version stamped on every envelope this crate builds.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Versions `parse` accepts.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["1.0"];

/// Identifies one side of an exchange.
///
/// A target may be addressed by capability before it is resolved; once the
/// client picks a concrete agent the id and name are filled in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
}

impl AgentRef {
    /// Reference a concrete agent.
    pub fn agent(agent_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            agent_name: Some(agent_name.into()),
            capability: None,
        }
    }

    /// Reference whichever agent provides a capability.
    pub fn capability(capability: impl Into<String>) -> Self {
        Self {
            agent_id: None,
            agent_name: None,
            capability: Some(capability.into()),
        }
    }

    /// Human-readable label for logs and error messages.
    pub fn label(&self) -> String {
        match (&self.agent_name, &self.agent_id, &self.capability) {
            (Some(name), Some(id), _) => format!("{} ({})", name, id),
            (None, Some(id), _) => id.clone(),
            (_, None, Some(cap)) => format!("capability:{}", cap),
            _ => "<anonymous>".to_string(),
        }
    }
}

/// Metadata attached to a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// Per-attempt timeout the caller is applying, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceContext>,
    /// Arbitrary key/value extensions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, Value>,
}

/// A request sent to a target agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique per send attempt. A retry gets a new one.
    pub message_id: String,
    /// Shared by every attempt of one logical call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub protocol_version: String,
    pub timestamp: DateTime<Utc>,
    pub source: AgentRef,
    pub target: AgentRef,
    /// Requested operation, e.g. `account.get_balance`.
    pub intent: String,
    /// Opaque to this crate.
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub metadata: RequestMetadata,
}

impl RequestEnvelope {
    /// Set the logical-call correlation id.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// A key that is on the wire is `Some`, even when it holds `null`. Only an
/// absent key falls back to `None` through `#[serde(default)]`.
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Outcome reported by the callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Structured error returned by a callee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,
}

impl ErrorBody {
    /// Create an error body from a code with its default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code: code as i32,
            message: code.default_message().to_string(),
            data: None,
        }
    }

    /// Create an error body with a custom message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code as i32,
            message: message.into(),
            data: None,
        }
    }

    /// Attach additional data.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Whether this error should count against the target's breaker.
    pub fn is_target_fault(&self) -> bool {
        is_target_fault(self.code)
    }
}

/// Metadata attached to a response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Time the callee spent processing, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceContext>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, Value>,
}

/// A response returned by a target agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub message_id: String,
    /// The `message_id` of the request being answered.
    pub correlation_id: String,
    pub protocol_version: String,
    pub timestamp: DateTime<Utc>,
    pub status: ResponseStatus,
    /// Present iff `status == success`. A `null` result is still present.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub response: Option<Value>,
    /// Present iff `status == error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(default)]
    pub metadata: ResponseMetadata,
}

impl ResponseEnvelope {
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

/// Either side of an exchange, as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    Request(RequestEnvelope),
    Response(ResponseEnvelope),
}

impl Envelope {
    pub fn protocol_version(&self) -> &str {
        match self {
            Self::Request(r) => &r.protocol_version,
            Self::Response(r) => &r.protocol_version,
        }
    }

    pub fn message_id(&self) -> &str {
        match self {
            Self::Request(r) => &r.message_id,
            Self::Response(r) => &r.message_id,
        }
    }
}

impl From<RequestEnvelope> for Envelope {
    fn from(request: RequestEnvelope) -> Self {
        Self::Request(request)
    }
}

impl From<ResponseEnvelope> for Envelope {
    fn from(response: ResponseEnvelope) -> Self {
        Self::Response(response)
    }
}
