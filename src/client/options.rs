//! Per-send addressing and options.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use crate::trace::TraceContext;

/// Where a send goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// Any active provider of a capability, resolved through the registry.
    Capability(String),
    /// One concrete agent; no resolution, no rotation.
    Agent(String),
}

impl Target {
    pub fn capability(capability: impl Into<String>) -> Self {
        Self::Capability(capability.into())
    }

    pub fn agent(agent_id: impl Into<String>) -> Self {
        Self::Agent(agent_id.into())
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Capability(c) => write!(f, "capability:{}", c),
            Self::Agent(id) => write!(f, "agent:{}", id),
        }
    }
}

/// Options for one `send`.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Overall budget for the send, retries and backoff included.
    pub deadline: Option<Duration>,
    /// Parent trace. A child span is derived from it; without one a new
    /// trace is started.
    pub trace: Option<TraceContext>,
    /// Per-attempt timeout instead of the configured one.
    pub timeout: Option<Duration>,
    /// Retry error responses like transient failures.
    pub retry_on_business_error: bool,
    /// Extra request metadata.
    pub extensions: BTreeMap<String, Value>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry_on_business_error(mut self, enabled: bool) -> Self {
        self.retry_on_business_error = enabled;
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }
}
