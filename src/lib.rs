//! # agentlink
//!
//! Communication substrate for capability-addressed agents: a service
//! registry that resolves capabilities to live endpoints, and a resilient
//! client that wraps every outbound call with circuit breaking, bounded
//! retries with backoff, and trace-context propagation.
//!
//! The typical caller builds an [`A2AClient`] and sends by capability:
//!
//! ```no_run
//! use agentlink::{A2AClient, AgentRef, ClientConfig, SendOptions, Target};
//!
//! # async fn demo() -> Result<(), agentlink::A2AError> {
//! let client = A2AClient::http(
//!     AgentRef::agent("supervisor-1", "supervisor"),
//!     "http://localhost:8500",
//!     ClientConfig::default(),
//! )?;
//! let response = client
//!     .send(
//!         Target::capability("account.balance"),
//!         "account.get_balance",
//!         serde_json::json!({"account": "42"}),
//!         SendOptions::new(),
//!     )
//!     .await?;
//! println!("{:?}", response.response);
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod envelope;
pub mod errors;
pub mod registry;
pub mod resilience;
pub mod server;
pub mod trace;

pub use client::{A2AClient, EnvelopeTransport, HttpEnvelopeTransport, SendOptions, Target, TransportError};
pub use config::{ClientConfig, Config, RegistryConfig};
pub use envelope::{
    AgentRef, Envelope, ErrorBody, RequestEnvelope, RequestMetadata, ResponseEnvelope,
    ResponseMetadata, ResponseStatus, SchemaRegistry,
};
pub use errors::{A2AError, ErrorCode};
pub use registry::{
    AgentRecord, AgentStatus, HealthMonitor, RegistryClient, RegistryStore, RegistryTransport,
};
pub use resilience::{CircuitBreaker, CircuitState, RetryPolicy};
pub use trace::TraceContext;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
