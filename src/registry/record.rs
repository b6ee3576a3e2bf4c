//! Registered agent records and the registration wire types.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::capability::{validate_capability, validate_endpoints};
use crate::errors::A2AError;

/// Plain HTTP channel.
pub const CHANNEL_HTTP: &str = "http";
/// Liveness probe channel.
pub const CHANNEL_HEALTH: &str = "health";
/// Envelope invocation channel.
pub const CHANNEL_A2A: &str = "a2a";

/// Lifecycle status of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Unhealthy,
    /// Tombstone. The record is kept so in-flight lookups never race a
    /// hard delete.
    Deregistered,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Deregistered => write!(f, "deregistered"),
        }
    }
}

/// One registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Assigned at registration; never reused.
    pub agent_id: String,
    pub agent_name: String,
    /// Role tag, e.g. "domain" or "supervisor".
    pub agent_type: String,
    /// Never empty.
    pub capabilities: BTreeSet<String>,
    /// Channel name ("http", "health", "a2a") → address. Never empty.
    pub endpoints: BTreeMap<String, String>,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub status: AgentStatus,
}

impl AgentRecord {
    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn endpoint(&self, channel: &str) -> Option<&str> {
        self.endpoints.get(channel).map(String::as_str)
    }

    /// Address to send envelopes to: the preferred channel, else plain http.
    pub fn invocation_endpoint(&self, preferred: &str) -> Option<&str> {
        self.endpoint(preferred).or_else(|| self.endpoint(CHANNEL_HTTP))
    }
}

/// Body of a registration call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub agent_name: String,
    #[serde(default = "default_agent_type")]
    pub agent_type: String,
    pub capabilities: BTreeSet<String>,
    pub endpoints: BTreeMap<String, String>,
}

fn default_agent_type() -> String {
    "domain".to_string()
}

impl RegistrationRequest {
    pub fn new(
        agent_name: impl Into<String>,
        agent_type: impl Into<String>,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
        endpoints: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            agent_type: agent_type.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            endpoints: endpoints
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Fails with [`A2AError::Registration`] on an empty name, an empty or
    /// malformed capability set, or a malformed endpoint.
    pub fn validate(&self) -> Result<(), A2AError> {
        if self.agent_name.trim().is_empty() {
            return Err(A2AError::Registration("agent_name must not be empty".to_string()));
        }
        if self.capabilities.is_empty() {
            return Err(A2AError::Registration(
                "at least one capability is required".to_string(),
            ));
        }
        for capability in &self.capabilities {
            validate_capability(capability)?;
        }
        validate_endpoints(&self.endpoints)
    }
}

/// Body returned by a successful registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub agent_id: String,
}

/// Error body returned by the registry server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryErrorBody {
    pub error: RegistryErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryErrorDetail {
    /// [`A2AError::kind`] of the error.
    pub kind: String,
    pub message: String,
    /// The capability or agent id the error is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl RegistryErrorBody {
    pub fn from_error(err: &A2AError) -> Self {
        let subject = match err {
            A2AError::NoAgentFound { capability } => Some(capability.clone()),
            A2AError::UnknownAgent { agent_id } => Some(agent_id.clone()),
            _ => None,
        };
        Self {
            error: RegistryErrorDetail {
                kind: err.kind().to_string(),
                message: err.to_string(),
                subject,
            },
        }
    }

    /// Rebuild the typed error on the client side.
    pub fn into_error(self) -> A2AError {
        let RegistryErrorDetail { kind, message, subject } = self.error;
        match (kind.as_str(), subject) {
            ("no_agent_found", Some(capability)) => A2AError::NoAgentFound { capability },
            ("unknown_agent", Some(agent_id)) => A2AError::UnknownAgent { agent_id },
            ("registration", _) => A2AError::Registration(message),
            ("validation", _) => A2AError::Validation(message),
            _ => A2AError::Registry(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RegistrationRequest {
        RegistrationRequest::new(
            "accounts",
            "domain",
            ["account.balance"],
            [("http", "http://localhost:8001"), ("health", "http://localhost:8001/health")],
        )
    }

    #[test]
    fn test_valid_request() {
        request().validate().unwrap();
    }

    #[test]
    fn test_empty_capabilities_rejected() {
        let mut req = request();
        req.capabilities.clear();
        assert!(matches!(req.validate(), Err(A2AError::Registration(_))));
    }

    #[test]
    fn test_malformed_endpoint_rejected() {
        let mut req = request();
        req.endpoints.insert("a2a".into(), "::nope".into());
        assert!(matches!(req.validate(), Err(A2AError::Registration(_))));
    }

    #[test]
    fn test_invocation_endpoint_falls_back_to_http() {
        let now = Utc::now();
        let req = request();
        let record = AgentRecord {
            agent_id: "a-1".into(),
            agent_name: req.agent_name,
            agent_type: req.agent_type,
            capabilities: req.capabilities,
            endpoints: req.endpoints,
            registered_at: now,
            last_heartbeat_at: now,
            status: AgentStatus::Active,
        };
        assert_eq!(record.invocation_endpoint(CHANNEL_A2A), Some("http://localhost:8001"));
        assert_eq!(record.endpoint(CHANNEL_HEALTH), Some("http://localhost:8001/health"));
    }

    #[test]
    fn test_error_body_round_trip() {
        let err = A2AError::NoAgentFound { capability: "x.y".into() };
        let body = RegistryErrorBody::from_error(&err);
        assert_eq!(body.error.kind, "no_agent_found");
        assert_eq!(body.into_error(), err);

        let err = A2AError::UnknownAgent { agent_id: "a-9".into() };
        assert_eq!(RegistryErrorBody::from_error(&err).into_error(), err);
    }
}
