//! Envelope construction, serialization and parsing.
//!
//! Law: `parse(&serialize(&x)?)? == x` for every envelope these builders
//! produce.

use bytes::Bytes;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use super::schema::SchemaRegistry;
use super::types::{
    AgentRef, Envelope, ErrorBody, RequestEnvelope, RequestMetadata, ResponseEnvelope,
    ResponseMetadata, ResponseStatus, PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::errors::A2AError;
use crate::registry::capability::validate_capability;

/// Build a request envelope with a fresh `message_id` and the current time.
///
/// Fails with [`A2AError::Validation`] when the intent is empty, the target
/// has neither an agent id nor a well-formed capability, the trace context
/// is malformed, or (when `schemas` is supplied) the payload does not match
/// the intent's schema.
pub fn build_request(
    source: AgentRef,
    target: AgentRef,
    intent: &str,
    payload: Value,
    metadata: RequestMetadata,
    schemas: Option<&SchemaRegistry>,
) -> Result<RequestEnvelope, A2AError> {
    let intent = intent.trim();
    if intent.is_empty() {
        return Err(A2AError::Validation("intent must not be empty".to_string()));
    }

    let has_agent = target.agent_id.as_deref().is_some_and(|id| !id.trim().is_empty());
    if !has_agent {
        match target.capability.as_deref() {
            Some(cap) => validate_capability(cap)
                .map_err(|e| A2AError::Validation(format!("unresolvable target: {}", e)))?,
            None => {
                return Err(A2AError::Validation(
                    "target needs an agent_id or a capability".to_string(),
                ))
            }
        }
    }

    if let Some(trace) = &metadata.trace {
        trace
            .validate()
            .map_err(|e| A2AError::Validation(format!("bad trace context: {}", e)))?;
    }

    if let Some(schemas) = schemas {
        schemas.validate(intent, &payload)?;
    }

    Ok(RequestEnvelope {
        message_id: Uuid::new_v4().to_string(),
        correlation_id: None,
        protocol_version: PROTOCOL_VERSION.to_string(),
        timestamp: Utc::now(),
        source,
        target,
        intent: intent.to_string(),
        payload,
        metadata,
    })
}

/// Build a response envelope answering the request whose `message_id` is
/// `correlation_id`.
///
/// `response` must be present iff `status` is success, `error` iff it is
/// error.
pub fn build_response(
    correlation_id: &str,
    status: ResponseStatus,
    response: Option<Value>,
    error: Option<ErrorBody>,
    metadata: ResponseMetadata,
) -> Result<ResponseEnvelope, A2AError> {
    if correlation_id.trim().is_empty() {
        return Err(A2AError::Validation("correlation_id must not be empty".to_string()));
    }
    check_status_consistency(status, response.is_some(), error.is_some())
        .map_err(A2AError::Validation)?;

    Ok(ResponseEnvelope {
        message_id: Uuid::new_v4().to_string(),
        correlation_id: correlation_id.to_string(),
        protocol_version: PROTOCOL_VERSION.to_string(),
        timestamp: Utc::now(),
        status,
        response,
        error,
        metadata,
    })
}

/// Shorthand for a successful response.
pub fn success_response(correlation_id: &str, response: Value) -> Result<ResponseEnvelope, A2AError> {
    build_response(
        correlation_id,
        ResponseStatus::Success,
        Some(response),
        None,
        ResponseMetadata::default(),
    )
}

/// Shorthand for an error response.
pub fn error_response(correlation_id: &str, error: ErrorBody) -> Result<ResponseEnvelope, A2AError> {
    build_response(
        correlation_id,
        ResponseStatus::Error,
        None,
        Some(error),
        ResponseMetadata::default(),
    )
}

/// Serialize an envelope to its JSON wire form.
pub fn serialize(envelope: &Envelope) -> Result<Bytes, A2AError> {
    serde_json::to_vec(envelope)
        .map(Bytes::from)
        .map_err(|e| A2AError::Validation(format!("failed to serialize envelope: {}", e)))
}

/// Decode an envelope from raw bytes.
///
/// Fails with [`A2AError::Decode`] on malformed JSON, a missing or
/// inconsistent field, or an unsupported protocol version.
pub fn parse(raw: &[u8]) -> Result<Envelope, A2AError> {
    let envelope: Envelope = serde_json::from_slice(raw)
        .map_err(|e| A2AError::Decode(format!("malformed envelope: {}", e)))?;

    let version = envelope.protocol_version();
    if !SUPPORTED_PROTOCOL_VERSIONS.contains(&version) {
        return Err(A2AError::Decode(format!(
            "unsupported protocol version '{}'",
            version
        )));
    }
    if envelope.message_id().is_empty() {
        return Err(A2AError::Decode("message_id must not be empty".to_string()));
    }

    match &envelope {
        Envelope::Request(req) => {
            if req.intent.trim().is_empty() {
                return Err(A2AError::Decode("request has an empty intent".to_string()));
            }
        }
        Envelope::Response(resp) => {
            check_status_consistency(resp.status, resp.response.is_some(), resp.error.is_some())
                .map_err(A2AError::Decode)?;
        }
    }

    Ok(envelope)
}

/// Decode bytes that must hold a request.
pub fn parse_request(raw: &[u8]) -> Result<RequestEnvelope, A2AError> {
    match parse(raw)? {
        Envelope::Request(req) => Ok(req),
        Envelope::Response(_) => Err(A2AError::Decode("expected a request envelope".to_string())),
    }
}

/// Decode bytes that must hold a response.
pub fn parse_response(raw: &[u8]) -> Result<ResponseEnvelope, A2AError> {
    match parse(raw)? {
        Envelope::Response(resp) => Ok(resp),
        Envelope::Request(_) => Err(A2AError::Decode("expected a response envelope".to_string())),
    }
}

fn check_status_consistency(
    status: ResponseStatus,
    has_response: bool,
    has_error: bool,
) -> Result<(), String> {
    match status {
        ResponseStatus::Success if !has_response => {
            Err("status=success requires a response".to_string())
        }
        ResponseStatus::Success if has_error => {
            Err("status=success must not carry an error".to_string())
        }
        ResponseStatus::Error if !has_error => Err("status=error requires an error".to_string()),
        ResponseStatus::Error if has_response => {
            Err("status=error must not carry a response".to_string())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use crate::trace::TraceContext;
    use serde_json::json;

    fn caller() -> AgentRef {
        AgentRef::agent("agent-supervisor", "supervisor")
    }

    #[test]
    fn test_build_request_stamps_ids() {
        let a = build_request(
            caller(),
            AgentRef::capability("account.balance"),
            "account.get_balance",
            json!({"account": "12345678"}),
            RequestMetadata::default(),
            None,
        )
        .unwrap();
        let b = build_request(
            caller(),
            AgentRef::capability("account.balance"),
            "account.get_balance",
            json!({}),
            RequestMetadata::default(),
            None,
        )
        .unwrap();
        assert_ne!(a.message_id, b.message_id);
        assert_eq!(a.protocol_version, PROTOCOL_VERSION);
        assert!(a.correlation_id.is_none());
    }

    #[test]
    fn test_build_request_rejects_empty_intent() {
        let err = build_request(
            caller(),
            AgentRef::capability("account.balance"),
            "  ",
            Value::Null,
            RequestMetadata::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, A2AError::Validation(_)));
    }

    #[test]
    fn test_build_request_rejects_unaddressable_target() {
        let err = build_request(
            caller(),
            AgentRef::default(),
            "account.get_balance",
            Value::Null,
            RequestMetadata::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, A2AError::Validation(_)));

        let err = build_request(
            caller(),
            AgentRef::capability("Not A Capability"),
            "account.get_balance",
            Value::Null,
            RequestMetadata::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, A2AError::Validation(_)));
    }

    #[test]
    fn test_build_request_applies_schema() {
        let schemas = SchemaRegistry::from_yaml_str(
            "account.get_balance:\n  fields:\n    account: { type: \"string\", required: true }\n",
        )
        .unwrap();
        let err = build_request(
            caller(),
            AgentRef::agent("agent-1", "accounts"),
            "account.get_balance",
            json!({}),
            RequestMetadata::default(),
            Some(&schemas),
        )
        .unwrap_err();
        assert!(matches!(err, A2AError::Validation(_)));

        // Same payload passes with validation disabled.
        build_request(
            caller(),
            AgentRef::agent("agent-1", "accounts"),
            "account.get_balance",
            json!({}),
            RequestMetadata::default(),
            None,
        )
        .unwrap();
    }

    #[test]
    fn test_build_response_status_consistency() {
        assert!(build_response("m-1", ResponseStatus::Success, None, None, Default::default()).is_err());
        assert!(build_response("m-1", ResponseStatus::Error, None, None, Default::default()).is_err());
        assert!(build_response(
            "m-1",
            ResponseStatus::Error,
            Some(json!(1)),
            Some(ErrorBody::from_code(ErrorCode::InternalError)),
            Default::default()
        )
        .is_err());
        assert!(build_response("", ResponseStatus::Success, Some(json!(1)), None, Default::default())
            .is_err());

        let ok = success_response("m-1", json!({"balance": 10})).unwrap();
        assert!(ok.is_success());
        assert_eq!(ok.correlation_id, "m-1");
    }

    #[test]
    fn test_request_round_trip() {
        let mut metadata = RequestMetadata {
            timeout_seconds: Some(2.5),
            trace: Some(TraceContext::new_root().with_baggage("user", "u-7")),
            ..Default::default()
        };
        metadata.extensions.insert("priority".to_string(), json!("high"));

        let request = build_request(
            caller(),
            AgentRef::agent("agent-1", "accounts"),
            "account.get_balance",
            json!({"account": "12345678", "nested": {"list": [1, 2.5, null, true]}}),
            metadata,
            None,
        )
        .unwrap()
        .with_correlation_id("call-1");

        let envelope = Envelope::from(request);
        let bytes = serialize(&envelope).unwrap();
        assert_eq!(parse(&bytes).unwrap(), envelope);
    }

    #[test]
    fn test_response_round_trip() {
        let success = Envelope::from(success_response("m-1", json!({"balance": 42})).unwrap());
        assert_eq!(parse(&serialize(&success).unwrap()).unwrap(), success);

        let error = Envelope::from(
            error_response(
                "m-2",
                ErrorBody::new(ErrorCode::BusinessRuleRejected, "insufficient funds")
                    .with_data(json!({"available": 3})),
            )
            .unwrap(),
        );
        assert_eq!(parse(&serialize(&error).unwrap()).unwrap(), error);
    }

    #[test]
    fn test_null_result_and_null_error_data_survive_round_trip() {
        let success = Envelope::from(success_response("m-1", Value::Null).unwrap());
        let bytes = serialize(&success).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains("\"response\":null"));
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed, success);
        match parsed {
            Envelope::Response(resp) => assert_eq!(resp.response, Some(Value::Null)),
            other => panic!("expected a response, got {:?}", other),
        }

        let error = Envelope::from(
            error_response(
                "m-2",
                ErrorBody::new(ErrorCode::BusinessRuleRejected, "rejected").with_data(Value::Null),
            )
            .unwrap(),
        );
        assert_eq!(parse(&serialize(&error).unwrap()).unwrap(), error);
    }

    #[test]
    fn test_absent_error_data_stays_absent() {
        let raw = json!({
            "kind": "response",
            "message_id": "r-1",
            "correlation_id": "m-1",
            "protocol_version": "1.0",
            "timestamp": "2026-01-01T00:00:00Z",
            "status": "error",
            "error": {"code": 400, "message": "bad"}
        });
        let resp = parse_response(&serde_json::to_vec(&raw).unwrap()).unwrap();
        assert_eq!(resp.response, None);
        assert_eq!(resp.error.unwrap().data, None);
    }

    #[test]
    fn test_parse_rejects_garbage_and_unknown_version() {
        assert!(matches!(parse(b"{not json"), Err(A2AError::Decode(_))));
        assert!(matches!(parse(b"{\"kind\":\"request\"}"), Err(A2AError::Decode(_))));

        let mut response = success_response("m-1", json!(true)).unwrap();
        response.protocol_version = "9.9".to_string();
        let bytes = serialize(&Envelope::from(response)).unwrap();
        let err = parse(&bytes).unwrap_err();
        assert!(matches!(err, A2AError::Decode(ref m) if m.contains("9.9")));
    }

    #[test]
    fn test_parse_rejects_inconsistent_response() {
        let raw = json!({
            "kind": "response",
            "message_id": "r-1",
            "correlation_id": "m-1",
            "protocol_version": "1.0",
            "timestamp": "2026-01-01T00:00:00Z",
            "status": "success"
        });
        let bytes = serde_json::to_vec(&raw).unwrap();
        assert!(matches!(parse(&bytes), Err(A2AError::Decode(_))));
    }

    #[test]
    fn test_typed_parse_helpers() {
        let response = success_response("m-1", json!(1)).unwrap();
        let bytes = serialize(&Envelope::from(response.clone())).unwrap();
        assert_eq!(parse_response(&bytes).unwrap(), response);
        assert!(parse_request(&bytes).is_err());
    }
}
