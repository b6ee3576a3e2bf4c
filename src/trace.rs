//! Trace context propagated through agent-to-agent calls.
//!
//! Ids use the W3C trace-context widths (16-byte trace id, 8-byte span id)
//! so a context can be exported as a `traceparent` header and picked up by
//! an OpenTelemetry pipeline on the other side.

use std::collections::BTreeMap;

use opentelemetry::trace::{SpanId, TraceId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::A2AError;

/// Correlation data threaded through a chain of calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    /// 32 lowercase hex chars, shared by every span in the trace.
    pub trace_id: String,
    /// 16 lowercase hex chars identifying this hop.
    pub span_id: String,
    /// Span id of the caller's hop, absent on a root span.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(default = "default_sampled")]
    pub sampled: bool,
    /// Free-form key/value pairs carried along the trace.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub baggage: BTreeMap<String, String>,
}

fn default_sampled() -> bool {
    true
}

impl TraceContext {
    /// Start a new trace.
    pub fn new_root() -> Self {
        Self {
            trace_id: new_trace_id().to_string(),
            span_id: new_span_id().to_string(),
            parent_span_id: None,
            sampled: true,
            baggage: BTreeMap::new(),
        }
    }

    /// Derive the context for an outbound hop: same trace, fresh span,
    /// parented on this span. Baggage is inherited.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_span_id().to_string(),
            parent_span_id: Some(self.span_id.clone()),
            sampled: self.sampled,
            baggage: self.baggage.clone(),
        }
    }

    /// Attach a baggage item.
    pub fn with_baggage(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.baggage.insert(key.into(), value.into());
        self
    }

    /// Render as a W3C `traceparent` header value.
    pub fn to_traceparent(&self) -> String {
        let flags = if self.sampled { "01" } else { "00" };
        format!("00-{}-{}-{}", self.trace_id, self.span_id, flags)
    }

    /// Parse a W3C `traceparent` header value.
    ///
    /// The parsed span becomes the current span; call [`TraceContext::child`]
    /// before forwarding it.
    pub fn from_traceparent(header: &str) -> Result<Self, A2AError> {
        let parts: Vec<&str> = header.trim().split('-').collect();
        if parts.len() != 4 || parts[0] != "00" {
            return Err(A2AError::Decode(format!("malformed traceparent: {}", header)));
        }
        let trace_id = parse_trace_id(parts[1])?;
        let span_id = parse_span_id(parts[2])?;
        let flags = u8::from_str_radix(parts[3], 16)
            .map_err(|_| A2AError::Decode(format!("bad trace flags: {}", parts[3])))?;

        Ok(Self {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            parent_span_id: None,
            sampled: flags & 0x01 == 0x01,
            baggage: BTreeMap::new(),
        })
    }

    /// Check that ids have the right width and are not the all-zero id.
    pub fn validate(&self) -> Result<(), A2AError> {
        parse_trace_id(&self.trace_id)?;
        parse_span_id(&self.span_id)?;
        if let Some(parent) = &self.parent_span_id {
            parse_span_id(parent)?;
        }
        Ok(())
    }
}

fn new_trace_id() -> TraceId {
    TraceId::from_bytes(Uuid::new_v4().into_bytes())
}

fn new_span_id() -> SpanId {
    let bytes = Uuid::new_v4().into_bytes();
    let mut span = [0u8; 8];
    span.copy_from_slice(&bytes[..8]);
    SpanId::from_bytes(span)
}

fn parse_trace_id(hex: &str) -> Result<TraceId, A2AError> {
    if hex.len() != 32 {
        return Err(A2AError::Decode(format!("trace id must be 32 hex chars: {}", hex)));
    }
    match TraceId::from_hex(hex) {
        Ok(id) if id != TraceId::INVALID => Ok(id),
        _ => Err(A2AError::Decode(format!("invalid trace id: {}", hex))),
    }
}

fn parse_span_id(hex: &str) -> Result<SpanId, A2AError> {
    if hex.len() != 16 {
        return Err(A2AError::Decode(format!("span id must be 16 hex chars: {}", hex)));
    }
    match SpanId::from_hex(hex) {
        Ok(id) if id != SpanId::INVALID => Ok(id),
        _ => Err(A2AError::Decode(format!("invalid span id: {}", hex))),
    }
}
