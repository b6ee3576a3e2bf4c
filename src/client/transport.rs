//! Envelope transport: "send a request envelope, receive a response envelope".
//!
//! The host decides how bytes travel. [`HttpEnvelopeTransport`] POSTs the
//! serialized request to the callee's endpoint and parses the reply.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use thiserror::Error;

use crate::envelope::{codec, Envelope, RequestEnvelope, ResponseEnvelope};

/// Transport-level failure of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No answer within the attempt timeout.
    #[error("timed out")]
    Timeout,
    /// The target could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),
    /// The target answered with something that is not a response envelope.
    #[error("undecodable response: {0}")]
    Decode(String),
}

/// Moves one request envelope to an endpoint and brings back its response.
#[async_trait]
pub trait EnvelopeTransport: Send + Sync {
    async fn send(
        &self,
        endpoint: &str,
        request: &RequestEnvelope,
        timeout: Duration,
    ) -> Result<ResponseEnvelope, TransportError>;

    /// Release held resources. Called once per client close.
    async fn close(&self) {}
}

/// Envelope transport over HTTP POST with JSON bodies.
#[derive(Debug, Clone)]
pub struct HttpEnvelopeTransport {
    http: reqwest::Client,
}

impl Default for HttpEnvelopeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpEnvelopeTransport {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Use a preconfigured reqwest client (proxies, TLS, pools).
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_decode() || err.is_body() {
        TransportError::Decode(err.to_string())
    } else {
        TransportError::Connection(err.to_string())
    }
}

#[async_trait]
impl EnvelopeTransport for HttpEnvelopeTransport {
    async fn send(
        &self,
        endpoint: &str,
        request: &RequestEnvelope,
        timeout: Duration,
    ) -> Result<ResponseEnvelope, TransportError> {
        let body = codec::serialize(&Envelope::Request(request.clone()))
            .map_err(|e| TransportError::Decode(e.to_string()))?;

        let resp = self
            .http
            .post(endpoint)
            .header(CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        if matches!(
            status,
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
        ) {
            return Err(TransportError::Connection(format!("{} answered HTTP {}", endpoint, status)));
        }

        let bytes = resp.bytes().await.map_err(classify)?;
        // Callees may answer an error envelope with a non-2xx status; the
        // envelope wins when it parses.
        codec::parse_response(&bytes).map_err(|e| {
            if status.is_success() {
                TransportError::Decode(e.to_string())
            } else {
                TransportError::Decode(format!("HTTP {} without a response envelope: {}", status, e))
            }
        })
    }
}
